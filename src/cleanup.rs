//! Deferred, cancellable cleanup actions.
//!
//! An action runs at most once: whichever of the timer, [`CleanupHandle::run_now`], or
//! [`CleanupHandle::cancel`] gets to it first wins, and later calls are no-ops.

// crates.io
use tokio::task::JoinHandle;
// self
use crate::_prelude::*;

type Action = Box<dyn FnOnce() + Send>;

/// Handle to a scheduled cleanup action.
#[derive(Clone)]
pub struct CleanupHandle {
	action: Arc<Mutex<Option<Action>>>,
	timer: Arc<Mutex<Option<JoinHandle<()>>>>,
}
impl CleanupHandle {
	/// Schedules `action` to run after `delay` on the current Tokio runtime.
	pub fn schedule(delay: StdDuration, action: impl 'static + FnOnce() + Send) -> Self {
		let action: Arc<Mutex<Option<Action>>> = Arc::new(Mutex::new(Some(Box::new(action))));
		let slot = action.clone();
		let timer = tokio::spawn(async move {
			tokio::time::sleep(delay).await;

			let pending = slot.lock().take();

			if let Some(run) = pending {
				run();
			}
		});

		Self { action, timer: Arc::new(Mutex::new(Some(timer))) }
	}

	/// Runs the action immediately if it has not run yet.
	pub fn run_now(&self) {
		self.stop_timer();

		let pending = self.action.lock().take();

		if let Some(run) = pending {
			run();
		}
	}

	/// Drops the action without running it.
	pub fn cancel(&self) {
		self.stop_timer();
		self.action.lock().take();
	}

	/// Returns true once the action has run or been cancelled.
	pub fn is_done(&self) -> bool {
		self.action.lock().is_none()
	}

	fn stop_timer(&self) {
		if let Some(timer) = self.timer.lock().take() {
			timer.abort();
		}
	}
}
impl Debug for CleanupHandle {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CleanupHandle").field("done", &self.is_done()).finish()
	}
}
