//! Helper process seam: command specs, spawned process handles, and the Tokio implementation.

// std
use std::process::Stdio;
// crates.io
use tokio::{
	io::{AsyncBufReadExt, AsyncRead, BufReader},
	process::{Child, Command},
	sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
};
// self
use crate::_prelude::*;

/// Boxed future returned by [`HelperProcess`] calls.
pub type ProcessFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a + Send>>;

/// Program invocation with its extra environment.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandSpec {
	/// Program to run.
	pub program: String,
	/// Arguments.
	pub args: Vec<String>,
	/// Variables added to the inherited environment.
	pub env: BTreeMap<String, String>,
}
impl CommandSpec {
	/// Creates a spec with no extra environment.
	pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			program: program.into(),
			args: args.into_iter().map(Into::into).collect(),
			env: BTreeMap::new(),
		}
	}

	/// Replaces the extra environment.
	pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
		self.env = env;

		self
	}
}
impl Debug for CommandSpec {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CommandSpec")
			.field("program", &self.program)
			.field("args", &self.args)
			.field("env_keys", &self.env.keys().collect::<Vec<_>>())
			.finish()
	}
}

/// Running helper process.
pub trait HelperProcess
where
	Self: Send,
{
	/// Next line from stdout or stderr; `None` once both streams are closed.
	fn next_line(&mut self) -> ProcessFuture<'_, Option<String>>;

	/// Requests termination. Safe to call more than once and after the process exited.
	fn terminate(&mut self);

	/// Exit status summary, if the process has exited.
	fn exit_status(&mut self) -> Option<String>;
}

/// Starts helper processes.
pub trait ProcessSpawner
where
	Self: Send + Sync,
{
	/// Spawns `spec`, returning a handle that streams its output.
	fn spawn(&self, spec: &CommandSpec) -> std::io::Result<Box<dyn HelperProcess>>;
}

/// Spawner backed by `tokio::process`; stdout and stderr are merged line by line.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioSpawner;
impl ProcessSpawner for TokioSpawner {
	fn spawn(&self, spec: &CommandSpec) -> std::io::Result<Box<dyn HelperProcess>> {
		let mut child = Command::new(&spec.program)
			.args(&spec.args)
			.envs(&spec.env)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true)
			.spawn()?;
		let (tx, lines) = mpsc::unbounded_channel();

		if let Some(stdout) = child.stdout.take() {
			forward_lines(stdout, tx.clone());
		}
		if let Some(stderr) = child.stderr.take() {
			forward_lines(stderr, tx);
		}

		Ok(Box::new(TokioProcess { child, lines }))
	}
}

struct TokioProcess {
	child: Child,
	lines: UnboundedReceiver<String>,
}
impl HelperProcess for TokioProcess {
	fn next_line(&mut self) -> ProcessFuture<'_, Option<String>> {
		Box::pin(self.lines.recv())
	}

	fn terminate(&mut self) {
		if let Err(e) = self.child.start_kill() {
			tracing::debug!(error = %e, "Helper process was already gone.");
		}
	}

	fn exit_status(&mut self) -> Option<String> {
		self.child.try_wait().ok().flatten().map(|status| status.to_string())
	}
}

fn forward_lines<R>(stream: R, tx: UnboundedSender<String>)
where
	R: 'static + AsyncRead + Send + Unpin,
{
	tokio::spawn(async move {
		let mut lines = BufReader::new(stream).lines();

		while let Ok(Some(line)) = lines.next_line().await {
			if tx.send(line).is_err() {
				break;
			}
		}
	});
}
