//! Delegated-helper launcher for servers whose OAuth runs inside an external process.
//!
//! A launch allocates a callback port, injects it into the helper command, optionally wraps the
//! command in a sandbox, and supervises the process until it prints an authorization URL or
//! reports completion. Successful launches leave the helper running for a grace window; failed
//! ones terminate it and release the port immediately.

mod output;
mod process;
mod sandbox;

pub use output::*;
pub use process::*;
pub use sandbox::*;

// self
use crate::{
	_prelude::*,
	auth::{FlowId, ServerId},
	cleanup::CleanupHandle,
	config::OrchestratorConfig,
	port::PortAllocator,
};

/// Argument marking a server as a delegated remote-OAuth helper.
pub const REMOTE_HELPER_MARKER: &str = "mcp-remote";

/// Helper invocation for one server.
#[derive(Clone, Debug)]
pub struct LaunchRequest {
	/// Display name, used in logs.
	pub server_name: String,
	/// Server identifier.
	pub server_id: ServerId,
	/// Remote MCP endpoint the helper connects to.
	pub remote_url: Url,
	/// Base command, before port injection and sandboxing.
	pub command: CommandSpec,
}

/// Successful launch.
#[derive(Debug)]
pub struct LaunchResult {
	/// What the helper reported.
	pub signal: HelperSignal,
	/// Callback port handed to the helper.
	pub port: u16,
	/// Sandbox the helper runs in, if any.
	pub sandbox: Option<SandboxBackend>,
	/// Deferred termination and port release; fires on its own after the grace window.
	pub cleanup: CleanupHandle,
}

/// Spawns and supervises helper processes.
pub struct Launcher {
	ports: Arc<PortAllocator>,
	spawner: Arc<dyn ProcessSpawner>,
	sandbox: Sandbox,
	legacy_ports: bool,
	launch_timeout: StdDuration,
	cleanup_grace: StdDuration,
	stale_port_age: Duration,
}
impl Launcher {
	/// Creates a launcher with default timeouts and sandbox detection.
	pub fn new(ports: Arc<PortAllocator>, spawner: Arc<dyn ProcessSpawner>) -> Self {
		Self {
			ports,
			spawner,
			sandbox: Sandbox::new(),
			legacy_ports: false,
			launch_timeout: StdDuration::from_secs(60),
			cleanup_grace: StdDuration::from_secs(5),
			stale_port_age: Duration::minutes(15),
		}
	}

	/// Creates a launcher using the configured timeouts and port mode.
	pub fn from_config(
		ports: Arc<PortAllocator>,
		spawner: Arc<dyn ProcessSpawner>,
		config: &OrchestratorConfig,
	) -> Self {
		let mut launcher = Self::new(ports, spawner)
			.with_legacy_ports(config.legacy_fixed_ports)
			.with_timeouts(config.launch_timeout, config.cleanup_grace);

		launcher.stale_port_age = config.stale_port_age;

		launcher
	}

	/// Replaces the sandbox policy.
	pub fn with_sandbox(mut self, sandbox: Sandbox) -> Self {
		self.sandbox = sandbox;

		self
	}

	/// Switches between the dynamic allocator and the legacy fixed-port table.
	pub fn with_legacy_ports(mut self, enabled: bool) -> Self {
		self.legacy_ports = enabled;

		self
	}

	/// Sets the launch time box and the post-success grace window.
	pub fn with_timeouts(mut self, launch: StdDuration, grace: StdDuration) -> Self {
		self.launch_timeout = launch;
		self.cleanup_grace = grace;

		self
	}

	/// Shared port allocator.
	pub fn ports(&self) -> &Arc<PortAllocator> {
		&self.ports
	}

	/// Launches the helper and waits for its first meaningful signal.
	pub async fn launch(&self, request: &LaunchRequest) -> Result<LaunchResult> {
		let flow = FlowId::generate();

		self.ports.reap_stale(OffsetDateTime::now_utc(), self.stale_port_age);

		let port = if self.legacy_ports {
			self.ports.allocate_legacy(&flow, request.remote_url.host_str().unwrap_or_default())?
		} else {
			self.ports.allocate(&flow)?
		};
		let (command, sandbox) =
			self.sandbox.wrap(inject_port(&request.command, &request.remote_url, port));

		tracing::info!(
			server = %request.server_id,
			name = %request.server_name,
			port,
			sandbox = sandbox.map(SandboxBackend::program).unwrap_or("none"),
			"Launching OAuth helper process."
		);

		let mut process = match self.spawner.spawn(&command) {
			Ok(process) => process,
			Err(source) => {
				self.ports.release(port);

				return Err(Error::ProcessSpawnFailed { command: request.command.program.clone(), source });
			},
		};
		let watched = tokio::time::timeout(self.launch_timeout, watch(process.as_mut()))
			.await
			.unwrap_or_else(|_| {
				Err(Error::Timeout { operation: "Helper launch", after: self.launch_timeout })
			});

		match watched {
			Ok(signal) => {
				let ports = self.ports.clone();
				let cleanup = CleanupHandle::schedule(self.cleanup_grace, move || {
					process.terminate();
					ports.release(port);
				});

				Ok(LaunchResult { signal, port, sandbox, cleanup })
			},
			Err(e) => {
				tracing::warn!(server = %request.server_id, port, error = %e, "OAuth helper failed.");
				process.terminate();
				self.ports.release(port);

				Err(e)
			},
		}
	}
}
impl Debug for Launcher {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Launcher")
			.field("sandbox", &self.sandbox)
			.field("legacy_ports", &self.legacy_ports)
			.field("launch_timeout", &self.launch_timeout)
			.field("cleanup_grace", &self.cleanup_grace)
			.finish()
	}
}

/// Places `port` right after the remote URL argument, replacing a port already there.
///
/// The URL and port are appended when the URL is not among the arguments.
pub fn inject_port(spec: &CommandSpec, remote_url: &Url, port: u16) -> CommandSpec {
	let mut spec = spec.clone();
	let port_arg = port.to_string();
	let position =
		spec.args.iter().position(|arg| Url::parse(arg).is_ok_and(|url| &url == remote_url));

	match position {
		Some(index) => match spec.args.get_mut(index + 1) {
			Some(next) if next.parse::<u16>().is_ok() => *next = port_arg,
			_ => spec.args.insert(index + 1, port_arg),
		},
		None => spec.args.extend([remote_url.to_string(), port_arg]),
	}

	spec
}

async fn watch(process: &mut dyn HelperProcess) -> Result<HelperSignal> {
	let mut last_line = None;

	while let Some(line) = process.next_line().await {
		if let Some(signal) = output::parse_line(&line) {
			return Ok(signal);
		}

		last_line = Some(line);
	}

	let reason =
		process.exit_status().or(last_line).unwrap_or_else(|| "output closed without a result".into());

	Err(Error::ProcessExited { reason })
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::_preludet::{ScriptedSpawner, server_id};

	const REMOTE: &str = "https://mcp.example.com/sse";

	fn request(remote: &str) -> LaunchRequest {
		LaunchRequest {
			server_name: "Example".into(),
			server_id: server_id("srv-helper"),
			remote_url: Url::parse(remote).expect("Remote URL fixture should parse."),
			command: CommandSpec::new("npx", ["-y", REMOTE_HELPER_MARKER, remote]),
		}
	}

	fn launcher(spawner: &ScriptedSpawner) -> Launcher {
		Launcher::new(
			Arc::new(PortAllocator::new(50400..=50410).with_bind_check(false)),
			Arc::new(spawner.clone()),
		)
		.with_sandbox(Sandbox::disabled())
		.with_timeouts(StdDuration::from_secs(10), StdDuration::from_secs(5))
	}

	#[test]
	fn port_follows_remote_url() {
		let url = Url::parse(REMOTE).expect("Remote URL fixture should parse.");
		let base = CommandSpec::new("npx", ["mcp-remote", REMOTE, "--debug"]);

		assert_eq!(inject_port(&base, &url, 50401).args, ["mcp-remote", REMOTE, "50401", "--debug"]);

		let stale = CommandSpec::new("npx", ["mcp-remote", REMOTE, "3334"]);

		assert_eq!(inject_port(&stale, &url, 50402).args, ["mcp-remote", REMOTE, "50402"]);

		let bare = CommandSpec::new("npx", ["mcp-remote"]);

		assert_eq!(inject_port(&bare, &url, 50403).args, ["mcp-remote", REMOTE, "50403"]);
	}

	#[tokio::test(start_paused = true)]
	async fn authorization_url_schedules_deferred_cleanup() {
		let spawner = ScriptedSpawner::emitting([
			"Connecting to remote server: https://mcp.example.com/sse",
			"Please authorize this client by visiting:",
			"https://auth.example.com/authorize?response_type=code&client_id=helper",
		])
		.hanging();
		let launcher = launcher(&spawner);
		let result = launcher.launch(&request(REMOTE)).await.expect("Launch should succeed.");

		assert!(matches!(result.signal, HelperSignal::AuthorizationUrl(ref url) if url.path() == "/authorize"));
		assert!(launcher.ports().is_allocated(result.port));
		assert_eq!(spawner.spawned()[0].args[3], result.port.to_string());
		assert_eq!(spawner.terminations(), 0);

		tokio::time::sleep(StdDuration::from_secs(6)).await;

		assert!(!launcher.ports().is_allocated(result.port));
		assert_eq!(spawner.terminations(), 1);
		assert!(result.cleanup.is_done());
	}

	#[tokio::test]
	async fn spawn_failures_release_the_port() {
		let spawner = ScriptedSpawner::failing();
		let launcher = launcher(&spawner);
		let err = launcher.launch(&request(REMOTE)).await.expect_err("Spawn should fail.");

		assert!(matches!(err, Error::ProcessSpawnFailed { ref command, .. } if command == "npx"));
		assert_eq!(launcher.ports().active_count(), 0);
	}

	#[tokio::test]
	async fn early_exit_terminates_and_releases() {
		let spawner = ScriptedSpawner::emitting(["npm ERR! could not determine executable to run"]);
		let launcher = launcher(&spawner);
		let err = launcher.launch(&request(REMOTE)).await.expect_err("Helper should exit early.");

		assert!(matches!(err, Error::ProcessExited { .. }));
		assert_eq!(launcher.ports().active_count(), 0);
		assert_eq!(spawner.terminations(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn silent_helpers_time_out() {
		let spawner = ScriptedSpawner::emitting(Vec::<String>::new()).hanging();
		let launcher = launcher(&spawner);
		let err = launcher.launch(&request(REMOTE)).await.expect_err("Helper should time out.");

		assert!(matches!(err, Error::Timeout { operation: "Helper launch", .. }));
		assert_eq!(launcher.ports().active_count(), 0);
		assert_eq!(spawner.terminations(), 1);
	}

	#[tokio::test]
	async fn legacy_mode_uses_the_fixed_port_table() {
		let spawner = ScriptedSpawner::emitting(["Proxy established successfully"]);
		let launcher = launcher(&spawner).with_legacy_ports(true);
		let result = launcher
			.launch(&request("https://mcp.atlassian.com/v1/sse"))
			.await
			.expect("Launch should succeed.");

		assert_eq!(result.port, 5598);
		assert!(matches!(result.signal, HelperSignal::Completed(None)));

		result.cleanup.run_now();

		assert!(!launcher.ports().is_allocated(5598));
	}
}
