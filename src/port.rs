//! Exclusive local callback ports for concurrent authorization flows.
//!
//! The allocator is an injectable object rather than a process-wide registry, so tests and
//! multiple orchestrators can each own one. All bookkeeping sits behind one mutex; no two live
//! flows ever hold the same port.

// std
use std::{net::TcpListener, ops::RangeInclusive};
// crates.io
use rand::Rng;
// self
use crate::{_prelude::*, auth::FlowId, cleanup::CleanupHandle};

/// Default dynamic callback range.
pub const DEFAULT_PORT_RANGE: RangeInclusive<u16> = 49200..=49999;
/// Port used by the legacy table for hosts without a dedicated entry.
pub const LEGACY_DEFAULT_PORT: u16 = 3334;
/// Legacy fixed ports keyed by hostname suffix.
pub const LEGACY_PORTS: &[(&str, u16)] = &[("atlassian.com", 5598)];

/// Errors surfaced by [`PortAllocator`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum PortAllocationError {
	/// Every port in the range is allocated or bound by another process.
	#[error("No free callback port in {start}..={end}.")]
	Exhausted {
		/// First port of the range.
		start: u16,
		/// Last port of the range.
		end: u16,
	},
	/// The legacy fixed port is held by another flow.
	#[error("Legacy callback port {port} is already in use.")]
	LegacyPortBusy {
		/// Requested fixed port.
		port: u16,
	},
}

/// Bookkeeping entry for one allocated port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortAllocation {
	/// Allocated port.
	pub port: u16,
	/// Flow that owns the port.
	pub owner: FlowId,
	/// Allocation instant.
	pub allocated_at: OffsetDateTime,
}

/// Hands out exclusive callback ports.
#[derive(Debug)]
pub struct PortAllocator {
	range: RangeInclusive<u16>,
	bind_check: bool,
	entries: Mutex<HashMap<u16, PortAllocation>>,
}
impl PortAllocator {
	/// Creates an allocator over `range` that verifies each candidate can be bound.
	pub fn new(range: RangeInclusive<u16>) -> Self {
		Self { range, bind_check: true, entries: Default::default() }
	}

	/// Toggles the bind probe; disabling it makes allocation purely bookkeeping-based.
	pub fn with_bind_check(mut self, enabled: bool) -> Self {
		self.bind_check = enabled;

		self
	}

	/// Allocates a free port from the dynamic range for `owner`.
	pub fn allocate(&self, owner: &FlowId) -> Result<u16, PortAllocationError> {
		let (start, end) = (*self.range.start(), *self.range.end());

		if start > end {
			return Err(PortAllocationError::Exhausted { start, end });
		}

		let span = u32::from(end) - u32::from(start) + 1;
		let offset = rand::rng().random_range(0..span);
		let mut entries = self.entries.lock();

		for step in 0..span {
			let candidate = u32::from(start) + (offset + step) % span;
			let Ok(port) = u16::try_from(candidate) else { continue };

			if entries.contains_key(&port) || !self.can_bind(port) {
				continue;
			}

			entries.insert(port, Self::entry(port, owner));
			tracing::debug!(port, owner = %owner, "Allocated callback port.");

			return Ok(port);
		}

		Err(PortAllocationError::Exhausted { start, end })
	}

	/// Reserves the legacy fixed port for `host`.
	pub fn allocate_legacy(&self, owner: &FlowId, host: &str) -> Result<u16, PortAllocationError> {
		let port = legacy_port_for(host);
		let mut entries = self.entries.lock();

		if entries.contains_key(&port) {
			return Err(PortAllocationError::LegacyPortBusy { port });
		}

		entries.insert(port, Self::entry(port, owner));
		tracing::debug!(port, owner = %owner, host, "Reserved legacy callback port.");

		Ok(port)
	}

	/// Releases `port`, returning whether it was allocated.
	pub fn release(&self, port: u16) -> bool {
		let released = self.entries.lock().remove(&port).is_some();

		if released {
			tracing::debug!(port, "Released callback port.");
		}

		released
	}

	/// Schedules a release after `delay`; the returned handle may run or cancel it early.
	pub fn release_after(self: &Arc<Self>, port: u16, delay: StdDuration) -> CleanupHandle {
		let allocator = self.clone();

		CleanupHandle::schedule(delay, move || {
			allocator.release(port);
		})
	}

	/// Releases entries allocated at or before `now - max_age`, returning the freed ports.
	pub fn reap_stale(&self, now: OffsetDateTime, max_age: Duration) -> Vec<u16> {
		let cutoff = now - max_age;
		let mut entries = self.entries.lock();
		let stale = entries
			.values()
			.filter(|entry| entry.allocated_at <= cutoff)
			.map(|entry| entry.port)
			.collect::<Vec<_>>();

		for port in &stale {
			entries.remove(port);
		}
		if !stale.is_empty() {
			tracing::warn!(count = stale.len(), "Reaped stale callback port allocations.");
		}

		stale
	}

	/// Returns true if `port` is currently allocated.
	pub fn is_allocated(&self, port: u16) -> bool {
		self.entries.lock().contains_key(&port)
	}

	/// Returns the allocation entry for `port`.
	pub fn allocation(&self, port: u16) -> Option<PortAllocation> {
		self.entries.lock().get(&port).cloned()
	}

	/// Number of live allocations.
	pub fn active_count(&self) -> usize {
		self.entries.lock().len()
	}

	fn entry(port: u16, owner: &FlowId) -> PortAllocation {
		PortAllocation { port, owner: owner.clone(), allocated_at: OffsetDateTime::now_utc() }
	}

	fn can_bind(&self, port: u16) -> bool {
		!self.bind_check || TcpListener::bind(("127.0.0.1", port)).is_ok()
	}
}
impl Default for PortAllocator {
	fn default() -> Self {
		Self::new(DEFAULT_PORT_RANGE)
	}
}

/// Looks up the legacy fixed port for a hostname.
pub fn legacy_port_for(host: &str) -> u16 {
	let host = host.trim_end_matches('.').to_ascii_lowercase();

	LEGACY_PORTS
		.iter()
		.find(|(suffix, _)| host == *suffix || host.ends_with(&format!(".{suffix}")))
		.map(|(_, port)| *port)
		.unwrap_or(LEGACY_DEFAULT_PORT)
}

#[cfg(test)]
mod tests {
	// std
	use std::collections::HashSet;
	// self
	use super::*;

	fn allocator(range: RangeInclusive<u16>) -> Arc<PortAllocator> {
		Arc::new(PortAllocator::new(range).with_bind_check(false))
	}

	#[test]
	fn concurrent_allocations_are_distinct() {
		let allocator = allocator(50000..=50063);
		let handles = (0..32)
			.map(|_| {
				let allocator = allocator.clone();

				std::thread::spawn(move || allocator.allocate(&FlowId::generate()))
			})
			.collect::<Vec<_>>();
		let ports = handles
			.into_iter()
			.map(|h| h.join().expect("Allocator thread should not panic."))
			.collect::<Result<Vec<_>, _>>()
			.expect("Range is large enough for every allocation.");
		let unique = ports.iter().copied().collect::<HashSet<_>>();

		assert_eq!(unique.len(), ports.len());
		assert_eq!(allocator.active_count(), 32);
	}

	#[test]
	fn exhausted_range_fails_until_release() {
		let allocator = allocator(50100..=50101);
		let flow = FlowId::generate();
		let first = allocator.allocate(&flow).expect("First port should be free.");
		let _second = allocator.allocate(&flow).expect("Second port should be free.");
		let err = allocator.allocate(&flow).expect_err("Range should be exhausted.");

		assert_eq!(err, PortAllocationError::Exhausted { start: 50100, end: 50101 });
		assert!(allocator.release(first));
		assert!(!allocator.release(first));
		assert_eq!(allocator.allocate(&flow), Ok(first));
	}

	#[test]
	fn legacy_table_matches_host_suffix() {
		assert_eq!(legacy_port_for("mcp.atlassian.com"), 5598);
		assert_eq!(legacy_port_for("atlassian.com."), 5598);
		assert_eq!(legacy_port_for("notatlassian.com"), LEGACY_DEFAULT_PORT);
		assert_eq!(legacy_port_for("mcp.example.com"), LEGACY_DEFAULT_PORT);
	}

	#[test]
	fn legacy_port_is_exclusive() {
		let allocator = allocator(DEFAULT_PORT_RANGE);
		let flow = FlowId::generate();

		assert_eq!(allocator.allocate_legacy(&flow, "mcp.atlassian.com"), Ok(5598));
		assert_eq!(
			allocator.allocate_legacy(&flow, "mcp.atlassian.com"),
			Err(PortAllocationError::LegacyPortBusy { port: 5598 })
		);
	}

	#[test]
	fn reap_stale_frees_old_entries() {
		let allocator = allocator(50200..=50210);
		let port = allocator.allocate(&FlowId::generate()).expect("Port should be free.");
		let later = OffsetDateTime::now_utc() + Duration::minutes(20);

		assert!(allocator.reap_stale(OffsetDateTime::now_utc(), Duration::minutes(15)).is_empty());
		assert_eq!(allocator.reap_stale(later, Duration::minutes(15)), vec![port]);
		assert!(!allocator.is_allocated(port));
	}

	#[tokio::test(start_paused = true)]
	async fn release_after_fires_without_explicit_cleanup() {
		let allocator = allocator(50300..=50310);
		let port = allocator.allocate(&FlowId::generate()).expect("Port should be free.");
		let _handle = allocator.release_after(port, StdDuration::from_secs(5));

		tokio::time::sleep(StdDuration::from_secs(6)).await;

		assert!(!allocator.is_allocated(port));
	}

	#[test]
	fn bind_check_skips_ports_held_by_other_processes() {
		let listener = TcpListener::bind(("127.0.0.1", 0)).expect("Ephemeral bind should succeed.");
		let held = listener.local_addr().expect("Listener should report its address.").port();
		let allocator = PortAllocator::new(held..=held);

		assert!(allocator.allocate(&FlowId::generate()).is_err());
	}
}
