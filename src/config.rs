//! Orchestrator configuration: builder, defaults, and environment loading.

// std
use std::ops::RangeInclusive;
// self
use crate::{
	_prelude::*, error::ConfigError, flows::StateKey, port::DEFAULT_PORT_RANGE, ssrf::SsrfGuard,
};

/// Hard ceiling on live path probes during heuristic discovery.
pub const MAX_PATH_PROBES: usize = 2;

/// Environment variable enabling the legacy fixed-port table.
pub const ENV_LEGACY_FIXED_PORTS: &str = "MCP_OAUTH_LEGACY_FIXED_PORTS";
/// Environment variable holding the OAuth redirect URI.
pub const ENV_REDIRECT_URI: &str = "MCP_OAUTH_REDIRECT_URI";
/// Environment variable holding the generic client id used when registration fails.
pub const ENV_FALLBACK_CLIENT_ID: &str = "MCP_OAUTH_FALLBACK_CLIENT_ID";
/// Environment variable holding the base64url state signing key.
pub const ENV_STATE_KEY: &str = "MCP_OAUTH_STATE_KEY";
/// Environment variable holding the comma-separated SSRF allowlist.
pub const ENV_SSRF_ALLOW_HOSTS: &str = "MCP_OAUTH_SSRF_ALLOW_HOSTS";

const DEFAULT_REDIRECT_URI: &str = "http://localhost:8080/oauth/callback";
const DEFAULT_FALLBACK_CLIENT_ID: &str = "mcp-oauth-orchestrator";
const DEFAULT_CLIENT_NAME: &str = "MCP OAuth Orchestrator";

/// Validated orchestrator settings.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
	/// Callback URL registered with authorization servers.
	pub redirect_uri: Url,
	/// Client id used when dynamic registration is unavailable or fails.
	pub fallback_client_id: String,
	/// `client_name` sent with registration requests.
	pub client_name: String,
	/// HMAC key binding PKCE state rows.
	pub state_key: StateKey,
	/// Use the legacy fixed-port table for delegated helpers.
	pub legacy_fixed_ports: bool,
	/// Hosts exempt from SSRF checks (exact match).
	pub ssrf_allowed_hosts: Vec<String>,
	/// Resolve hostnames and check every address before requests.
	pub ssrf_resolve_dns: bool,
	/// Time box for each heuristic path probe.
	pub probe_timeout: StdDuration,
	/// Time box for handshake, metadata, registration, and token requests.
	pub request_timeout: StdDuration,
	/// Live path probes allowed per discovery, clamped to [`MAX_PATH_PROBES`].
	pub max_path_probes: usize,
	/// Lifetime of PKCE flow state rows.
	pub pkce_ttl: Duration,
	/// Time allowed for a delegated helper to produce a URL or token.
	pub launch_timeout: StdDuration,
	/// Delay before a successful helper is terminated and its port released.
	pub cleanup_grace: StdDuration,
	/// Dynamic callback port range.
	pub port_range: RangeInclusive<u16>,
	/// Age after which port allocations are considered leaked.
	pub stale_port_age: Duration,
}
impl OrchestratorConfig {
	/// Returns a builder seeded with defaults.
	pub fn builder() -> OrchestratorConfigBuilder {
		OrchestratorConfigBuilder::default()
	}

	/// Builds the SSRF guard described by these settings.
	pub fn ssrf_guard(&self) -> SsrfGuard {
		SsrfGuard::new()
			.with_allowed_hosts(&self.ssrf_allowed_hosts)
			.with_dns_resolution(self.ssrf_resolve_dns)
	}

	/// Loads settings from the process environment on top of the defaults.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Loads settings from an arbitrary variable lookup on top of the defaults.
	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
		let mut builder = Self::builder();

		if let Some(raw) = lookup(ENV_LEGACY_FIXED_PORTS) {
			builder = builder.legacy_fixed_ports(parse_bool(ENV_LEGACY_FIXED_PORTS, &raw)?);
		}
		if let Some(raw) = lookup(ENV_REDIRECT_URI) {
			builder = builder.redirect_uri(
				Url::parse(raw.trim()).map_err(|e| ConfigError::invalid_url(raw.clone(), e))?,
			);
		}
		if let Some(raw) = lookup(ENV_FALLBACK_CLIENT_ID).filter(|v| !v.trim().is_empty()) {
			builder = builder.fallback_client_id(raw.trim());
		}
		if let Some(raw) = lookup(ENV_STATE_KEY).filter(|v| !v.trim().is_empty()) {
			builder = builder.state_key(StateKey::from_base64url(raw.trim())?);
		}
		if let Some(raw) = lookup(ENV_SSRF_ALLOW_HOSTS) {
			builder = builder.ssrf_allowed_hosts(
				raw.split(',').map(str::trim).filter(|host| !host.is_empty()).map(str::to_owned),
			);
		}

		builder.build()
	}
}

/// Builder for [`OrchestratorConfig`].
#[derive(Clone, Debug)]
pub struct OrchestratorConfigBuilder {
	redirect_uri: Option<Url>,
	fallback_client_id: String,
	client_name: String,
	state_key: Option<StateKey>,
	legacy_fixed_ports: bool,
	ssrf_allowed_hosts: Vec<String>,
	ssrf_resolve_dns: bool,
	probe_timeout: StdDuration,
	request_timeout: StdDuration,
	max_path_probes: usize,
	pkce_ttl: Duration,
	launch_timeout: StdDuration,
	cleanup_grace: StdDuration,
	port_range: RangeInclusive<u16>,
	stale_port_age: Duration,
}
impl OrchestratorConfigBuilder {
	/// Sets the redirect URI.
	pub fn redirect_uri(mut self, uri: Url) -> Self {
		self.redirect_uri = Some(uri);

		self
	}

	/// Sets the generic client id.
	pub fn fallback_client_id(mut self, client_id: impl Into<String>) -> Self {
		self.fallback_client_id = client_id.into();

		self
	}

	/// Sets the registration `client_name`.
	pub fn client_name(mut self, name: impl Into<String>) -> Self {
		self.client_name = name.into();

		self
	}

	/// Sets the PKCE state signing key; a random key is generated otherwise.
	pub fn state_key(mut self, key: StateKey) -> Self {
		self.state_key = Some(key);

		self
	}

	/// Enables or disables the legacy fixed-port table.
	pub fn legacy_fixed_ports(mut self, enabled: bool) -> Self {
		self.legacy_fixed_ports = enabled;

		self
	}

	/// Replaces the SSRF allowlist.
	pub fn ssrf_allowed_hosts<I, S>(mut self, hosts: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.ssrf_allowed_hosts = hosts.into_iter().map(Into::into).collect();

		self
	}

	/// Enables or disables DNS resolution in the SSRF guard.
	pub fn ssrf_resolve_dns(mut self, enabled: bool) -> Self {
		self.ssrf_resolve_dns = enabled;

		self
	}

	/// Sets the per-probe time box.
	pub fn probe_timeout(mut self, timeout: StdDuration) -> Self {
		self.probe_timeout = timeout;

		self
	}

	/// Sets the per-request time box.
	pub fn request_timeout(mut self, timeout: StdDuration) -> Self {
		self.request_timeout = timeout;

		self
	}

	/// Sets the live path-probe budget; values above [`MAX_PATH_PROBES`] are clamped.
	pub fn max_path_probes(mut self, probes: usize) -> Self {
		self.max_path_probes = probes;

		self
	}

	/// Sets the PKCE state lifetime.
	pub fn pkce_ttl(mut self, ttl: Duration) -> Self {
		self.pkce_ttl = ttl;

		self
	}

	/// Sets the helper launch timeout.
	pub fn launch_timeout(mut self, timeout: StdDuration) -> Self {
		self.launch_timeout = timeout;

		self
	}

	/// Sets the cleanup grace window.
	pub fn cleanup_grace(mut self, grace: StdDuration) -> Self {
		self.cleanup_grace = grace;

		self
	}

	/// Sets the dynamic callback port range.
	pub fn port_range(mut self, range: RangeInclusive<u16>) -> Self {
		self.port_range = range;

		self
	}

	/// Sets the stale allocation age.
	pub fn stale_port_age(mut self, age: Duration) -> Self {
		self.stale_port_age = age;

		self
	}

	/// Validates and returns the configuration.
	pub fn build(self) -> Result<OrchestratorConfig, ConfigError> {
		let redirect_uri = match self.redirect_uri {
			Some(uri) => uri,
			None => Url::parse(DEFAULT_REDIRECT_URI)
				.map_err(|e| ConfigError::invalid_url(DEFAULT_REDIRECT_URI, e))?,
		};

		if !matches!(redirect_uri.scheme(), "http" | "https") {
			return Err(ConfigError::InvalidRedirect { uri: redirect_uri.to_string() });
		}

		let (start, end) = (*self.port_range.start(), *self.port_range.end());

		if start > end || start < 1024 {
			return Err(ConfigError::InvalidPortRange { start, end });
		}
		if self.fallback_client_id.trim().is_empty() {
			return Err(ConfigError::InvalidEnv {
				name: ENV_FALLBACK_CLIENT_ID,
				reason: "client id cannot be empty".into(),
			});
		}

		Ok(OrchestratorConfig {
			redirect_uri,
			fallback_client_id: self.fallback_client_id,
			client_name: self.client_name,
			state_key: self.state_key.unwrap_or_else(StateKey::generate),
			legacy_fixed_ports: self.legacy_fixed_ports,
			ssrf_allowed_hosts: self.ssrf_allowed_hosts,
			ssrf_resolve_dns: self.ssrf_resolve_dns,
			probe_timeout: self.probe_timeout,
			request_timeout: self.request_timeout,
			max_path_probes: self.max_path_probes.min(MAX_PATH_PROBES),
			pkce_ttl: self.pkce_ttl,
			launch_timeout: self.launch_timeout,
			cleanup_grace: self.cleanup_grace,
			port_range: self.port_range,
			stale_port_age: self.stale_port_age,
		})
	}
}
impl Default for OrchestratorConfigBuilder {
	fn default() -> Self {
		Self {
			redirect_uri: None,
			fallback_client_id: DEFAULT_FALLBACK_CLIENT_ID.into(),
			client_name: DEFAULT_CLIENT_NAME.into(),
			state_key: None,
			legacy_fixed_ports: false,
			ssrf_allowed_hosts: Vec::new(),
			ssrf_resolve_dns: true,
			probe_timeout: StdDuration::from_secs(3),
			request_timeout: StdDuration::from_secs(10),
			max_path_probes: MAX_PATH_PROBES,
			pkce_ttl: Duration::minutes(5),
			launch_timeout: StdDuration::from_secs(60),
			cleanup_grace: StdDuration::from_secs(5),
			port_range: DEFAULT_PORT_RANGE,
			stale_port_age: Duration::minutes(15),
		}
	}
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
	match raw.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Ok(true),
		"0" | "false" | "no" | "off" | "" => Ok(false),
		other => Err(ConfigError::InvalidEnv { name, reason: format!("`{other}` is not a boolean") }),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn lookup(pairs: &[(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
		let pairs = pairs.to_vec();

		move |name| pairs.iter().find(|(key, _)| *key == name).map(|(_, value)| (*value).to_owned())
	}

	#[test]
	fn defaults_match_documented_tunables() {
		let config = OrchestratorConfig::builder().build().expect("Defaults should validate.");

		assert!(!config.legacy_fixed_ports);
		assert_eq!(config.probe_timeout, StdDuration::from_secs(3));
		assert_eq!(config.max_path_probes, 2);
		assert_eq!(config.pkce_ttl, Duration::minutes(5));
		assert_eq!(config.port_range, 49200..=49999);
	}

	#[test]
	fn probe_budget_is_clamped() {
		let config = OrchestratorConfig::builder()
			.max_path_probes(10)
			.build()
			.expect("Config should validate.");

		assert_eq!(config.max_path_probes, MAX_PATH_PROBES);
	}

	#[test]
	fn environment_overrides_defaults() {
		let config = OrchestratorConfig::from_lookup(lookup(&[
			(ENV_LEGACY_FIXED_PORTS, "true"),
			(ENV_REDIRECT_URI, "https://app.example.com/oauth/callback"),
			(ENV_FALLBACK_CLIENT_ID, "platform-client"),
			(ENV_SSRF_ALLOW_HOSTS, "127.0.0.1, mcp.dev.test ,"),
		]))
		.expect("Environment should be accepted.");

		assert!(config.legacy_fixed_ports);
		assert_eq!(config.redirect_uri.as_str(), "https://app.example.com/oauth/callback");
		assert_eq!(config.fallback_client_id, "platform-client");
		assert_eq!(config.ssrf_allowed_hosts, vec!["127.0.0.1", "mcp.dev.test"]);
	}

	#[test]
	fn invalid_environment_values_are_rejected() {
		let err = OrchestratorConfig::from_lookup(lookup(&[(ENV_LEGACY_FIXED_PORTS, "maybe")]))
			.expect_err("Non-boolean toggle should fail.");

		assert!(matches!(err, ConfigError::InvalidEnv { name: ENV_LEGACY_FIXED_PORTS, .. }));

		let err = OrchestratorConfig::from_lookup(lookup(&[(ENV_STATE_KEY, "c2hvcnQ")]))
			.expect_err("Short state key should fail.");

		assert!(matches!(err, ConfigError::InvalidStateKey { .. }));
	}

	#[test]
	fn privileged_port_ranges_are_rejected() {
		let err = OrchestratorConfig::builder()
			.port_range(80..=90)
			.build()
			.expect_err("Privileged range should fail.");

		assert!(matches!(err, ConfigError::InvalidPortRange { start: 80, end: 90 }));
	}
}
