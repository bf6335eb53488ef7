//! Resource and authorization-server discovery.
//!
//! A handshake probe decides whether discovery runs at all: only a `401` continues. The chain
//! is an ordered list of strategies driven by one loop, standard metadata first and heuristics
//! last. A strategy that fails records why and yields to the next one; only exhaustion of the
//! whole list surfaces as an error.

pub mod heuristics;
pub mod metadata;
pub mod quirks;

pub use metadata::{AuthorizationServerMetadata, ProtectedResourceMetadata};

// crates.io
use oauth2::HttpResponse;
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::ScopeSet,
	config::{MAX_PATH_PROBES, OrchestratorConfig},
	error::ConfigError,
	http::{self, HttpTransport},
	ssrf::SsrfGuard,
};

const DEFAULT_PROBE_TIMEOUT: StdDuration = StdDuration::from_secs(3);
const DEFAULT_REQUEST_TIMEOUT: StdDuration = StdDuration::from_secs(10);
const HANDSHAKE_ACCEPT: &str = "application/json, text/event-stream";
const MCP_PROTOCOL_VERSION: &str = "2025-06-18";
const STRATEGY_ORDER: [DiscoveryMethod; 5] = [
	DiscoveryMethod::ProtectedResourceMetadata,
	DiscoveryMethod::AuthorizationServerMetadata,
	DiscoveryMethod::ResponseHeader,
	DiscoveryMethod::ResponseBody,
	DiscoveryMethod::PathProbe,
];

/// Strategy that produced a discovery result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
	/// RFC 9728 protected-resource metadata followed by RFC 8414 server metadata.
	ProtectedResourceMetadata,
	/// Authorization-server metadata served at the resource origin.
	AuthorizationServerMetadata,
	/// Authorization URL found in challenge or vendor headers.
	ResponseHeader,
	/// Authorization URL embedded in a JSON or event-stream body.
	ResponseBody,
	/// Conventional authorization path probing.
	PathProbe,
}
impl DiscoveryMethod {
	/// Returns a stable label suitable for logs and metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::ProtectedResourceMetadata => "protected_resource_metadata",
			Self::AuthorizationServerMetadata => "authorization_server_metadata",
			Self::ResponseHeader => "response_header",
			Self::ResponseBody => "response_body",
			Self::PathProbe => "path_probe",
		}
	}

	/// Returns true for the heuristic fallbacks.
	pub const fn is_heuristic(self) -> bool {
		matches!(self, Self::ResponseHeader | Self::ResponseBody | Self::PathProbe)
	}
}
impl Display for DiscoveryMethod {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Authorization configuration discovered for a resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveryResult {
	/// Authorization-server metadata, when a standard document was found.
	pub metadata: Option<AuthorizationServerMetadata>,
	/// Authorization-server issuer or origin.
	pub auth_server: Option<String>,
	/// RFC 8707 resource indicator.
	pub resource_id: Option<String>,
	/// Strategy that succeeded.
	pub method: DiscoveryMethod,
	/// Scopes advertised by the authorization server (or resource).
	pub scopes: ScopeSet,
	/// Authorization URL found heuristically, when no metadata exists.
	pub authorization_url: Option<Url>,
}
impl DiscoveryResult {
	/// Wraps authorization-server metadata.
	pub fn from_metadata(metadata: AuthorizationServerMetadata, method: DiscoveryMethod) -> Self {
		let scopes = metadata
			.scopes_supported
			.as_ref()
			.map(|scopes| ScopeSet::from_advertised(scopes))
			.unwrap_or_default();

		Self {
			auth_server: metadata.issuer.clone(),
			metadata: Some(metadata),
			resource_id: None,
			method,
			scopes,
			authorization_url: None,
		}
	}

	/// Wraps a heuristically found authorization URL.
	pub fn from_authorization_url(url: Url, method: DiscoveryMethod) -> Self {
		Self {
			metadata: None,
			auth_server: Some(url.origin().ascii_serialization()),
			resource_id: None,
			method,
			scopes: ScopeSet::default(),
			authorization_url: Some(url),
		}
	}

	/// Endpoint users are sent to.
	pub fn authorization_endpoint(&self) -> Option<&Url> {
		self.metadata
			.as_ref()
			.map(|metadata| &metadata.authorization_endpoint)
			.or(self.authorization_url.as_ref())
	}

	/// Advertised scopes minus the ones that need manual pre-approval.
	pub fn requestable_scopes(&self) -> ScopeSet {
		self.scopes.requestable()
	}
}

/// Result of [`Discoverer::discover`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiscoveryOutcome {
	/// The handshake succeeded; the resource needs no authorization.
	OkWithoutAuth,
	/// The handshake failed with a status other than `401`.
	ServerError {
		/// Handshake status code.
		status: u16,
	},
	/// Authorization configuration was found.
	Discovered(DiscoveryResult),
}

#[derive(Default)]
struct Failures {
	ssrf: Option<Error>,
	last: Option<String>,
}
impl Failures {
	fn note(&mut self, err: Error) {
		tracing::debug!(error = %err, "Discovery step failed; trying the next one.");

		match err {
			Error::SsrfRejected { .. } if self.ssrf.is_none() => self.ssrf = Some(err),
			other => self.last = Some(other.to_string()),
		}
	}

	fn into_error(self) -> Error {
		self.ssrf.unwrap_or_else(|| Error::DiscoveryFailed {
			reason: self
				.last
				.unwrap_or_else(|| "no OAuth metadata or authorization endpoint found".into()),
		})
	}
}

/// Runs the discovery chain against one resource.
#[derive(Clone)]
pub struct Discoverer {
	http: Arc<dyn HttpTransport>,
	guard: SsrfGuard,
	probe_timeout: StdDuration,
	request_timeout: StdDuration,
	max_path_probes: usize,
	client_name: String,
}
impl Discoverer {
	/// Creates a discoverer with the default time boxes and probe budget.
	pub fn new(http: Arc<dyn HttpTransport>, guard: SsrfGuard) -> Self {
		Self {
			http,
			guard,
			probe_timeout: DEFAULT_PROBE_TIMEOUT,
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
			max_path_probes: MAX_PATH_PROBES,
			client_name: env!("CARGO_PKG_NAME").into(),
		}
	}

	/// Creates a discoverer from orchestrator settings.
	pub fn from_config(http: Arc<dyn HttpTransport>, config: &OrchestratorConfig) -> Self {
		Self::new(http, config.ssrf_guard())
			.with_timeouts(config.probe_timeout, config.request_timeout)
			.with_max_path_probes(config.max_path_probes)
			.with_client_name(&config.client_name)
	}

	/// Overrides the per-probe and per-request time boxes.
	pub fn with_timeouts(mut self, probe: StdDuration, request: StdDuration) -> Self {
		self.probe_timeout = probe;
		self.request_timeout = request;

		self
	}

	/// Sets the live path-probe budget, clamped to [`MAX_PATH_PROBES`].
	pub fn with_max_path_probes(mut self, probes: usize) -> Self {
		self.max_path_probes = probes.min(MAX_PATH_PROBES);

		self
	}

	/// Sets the client name sent in the handshake.
	pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
		self.client_name = name.into();

		self
	}

	/// Probes `resource` and, on `401`, runs the discovery chain.
	pub async fn discover(&self, resource: &Url) -> Result<DiscoveryOutcome> {
		if let Some(quirk) = quirks::violated_quirk(resource) {
			return Err(Error::KnownServerMisconfigured { hint: quirk.hint });
		}

		self.guard.validate(resource).await?;

		let challenge = self.handshake(resource).await?;
		let status = challenge.status();

		if status.is_success() {
			return Ok(DiscoveryOutcome::OkWithoutAuth);
		}
		if status.as_u16() != 401 {
			tracing::debug!(status = status.as_u16(), "Handshake failed without an auth challenge.");

			return Ok(DiscoveryOutcome::ServerError { status: status.as_u16() });
		}

		let mut failures = Failures::default();

		for method in STRATEGY_ORDER {
			if let Some(found) = self.run(method, resource, &challenge, &mut failures).await {
				tracing::info!(method = method.as_str(), "Discovered authorization configuration.");

				return Ok(DiscoveryOutcome::Discovered(found));
			}
		}

		Err(failures.into_error())
	}

	/// Sends an MCP `initialize` request and returns the raw response.
	pub async fn handshake(&self, resource: &Url) -> Result<HttpResponse> {
		let body = serde_json::json!({
			"jsonrpc": "2.0",
			"id": 1,
			"method": "initialize",
			"params": {
				"protocolVersion": MCP_PROTOCOL_VERSION,
				"capabilities": {},
				"clientInfo": { "name": self.client_name, "version": env!("CARGO_PKG_VERSION") },
			},
		});
		let request = http::post_json(resource, &body, HANDSHAKE_ACCEPT)?;

		Ok(self.http.execute_within(request, self.request_timeout, "Resource handshake").await?)
	}

	async fn run(
		&self,
		method: DiscoveryMethod,
		resource: &Url,
		challenge: &HttpResponse,
		failures: &mut Failures,
	) -> Option<DiscoveryResult> {
		match method {
			DiscoveryMethod::ProtectedResourceMetadata =>
				self.protected_resource(resource, challenge, failures).await,
			DiscoveryMethod::AuthorizationServerMetadata =>
				self.origin_metadata(resource, failures).await,
			DiscoveryMethod::ResponseHeader => heuristics::url_from_headers(challenge)
				.map(|url| DiscoveryResult::from_authorization_url(url, method)),
			DiscoveryMethod::ResponseBody => heuristics::url_from_body(challenge.body())
				.map(|url| DiscoveryResult::from_authorization_url(url, method)),
			DiscoveryMethod::PathProbe => self.probe_paths(resource, failures).await,
		}
	}

	async fn protected_resource(
		&self,
		resource: &Url,
		challenge: &HttpResponse,
		failures: &mut Failures,
	) -> Option<DiscoveryResult> {
		let mut candidates = challenge
			.headers()
			.get_all("www-authenticate")
			.iter()
			.filter_map(|value| value.to_str().ok())
			.filter_map(metadata::resource_metadata_url)
			.collect::<Vec<_>>();

		for url in metadata::well_known_urls(resource, metadata::PROTECTED_RESOURCE_SUFFIX) {
			if !candidates.contains(&url) {
				candidates.push(url);
			}
		}

		for candidate in candidates {
			let Some(document) =
				self.fetch_json::<ProtectedResourceMetadata>(&candidate, failures).await
			else {
				continue;
			};

			for server in &document.authorization_servers {
				let issuer = match Url::parse(server) {
					Ok(issuer) => issuer,
					Err(e) => {
						failures.note(ConfigError::invalid_url(server.clone(), e).into());

						continue;
					},
				};
				let Some(found) = self.authorization_server(&issuer, failures).await else {
					continue;
				};
				let mut result =
					DiscoveryResult::from_metadata(found, DiscoveryMethod::ProtectedResourceMetadata);

				result.auth_server = Some(server.clone());
				result.resource_id = document.resource.clone();

				if result.scopes.is_empty() {
					result.scopes = document
						.scopes_supported
						.as_ref()
						.map(|scopes| ScopeSet::from_advertised(scopes))
						.unwrap_or_default();
				}

				return Some(result);
			}
		}

		None
	}

	async fn origin_metadata(
		&self,
		resource: &Url,
		failures: &mut Failures,
	) -> Option<DiscoveryResult> {
		let origin = resource.origin().ascii_serialization();
		let issuer = Url::parse(&origin).ok()?;
		let found = self.authorization_server(&issuer, failures).await?;
		let mut result =
			DiscoveryResult::from_metadata(found, DiscoveryMethod::AuthorizationServerMetadata);

		if result.auth_server.is_none() {
			result.auth_server = Some(origin);
		}

		Some(result)
	}

	async fn probe_paths(&self, resource: &Url, failures: &mut Failures) -> Option<DiscoveryResult> {
		let mut live = 0;

		for path in heuristics::PROBE_PATHS {
			if live >= self.max_path_probes {
				break;
			}

			let mut probe = resource.clone();

			probe.set_path(path);
			probe.set_query(None);
			probe.set_fragment(None);

			if let Err(e) = self.guard.validate(&probe).await {
				failures.note(e);

				continue;
			}

			let request = match http::get(&probe) {
				Ok(request) => request,
				Err(e) => {
					failures.note(e.into());

					continue;
				},
			};

			live += 1;

			match self.http.execute_within(request, self.probe_timeout, "Discovery probe").await {
				Ok(response) =>
					if let Some(url) = heuristics::url_from_probe(&probe, &response) {
						return Some(DiscoveryResult::from_authorization_url(
							url,
							DiscoveryMethod::PathProbe,
						));
					},
				Err(e) => failures.note(e.into()),
			}
		}

		None
	}

	async fn authorization_server(
		&self,
		issuer: &Url,
		failures: &mut Failures,
	) -> Option<AuthorizationServerMetadata> {
		for candidate in metadata::authorization_server_urls(issuer) {
			if let Some(found) = self.fetch_json(&candidate, failures).await {
				return Some(found);
			}
		}

		None
	}

	async fn fetch_json<T>(&self, url: &Url, failures: &mut Failures) -> Option<T>
	where
		T: DeserializeOwned,
	{
		if let Err(e) = self.guard.validate(url).await {
			failures.note(e);

			return None;
		}

		let request = match http::get_json(url) {
			Ok(request) => request,
			Err(e) => {
				failures.note(e.into());

				return None;
			},
		};
		let response =
			match self.http.execute_within(request, self.request_timeout, "Metadata fetch").await {
				Ok(response) => response,
				Err(e) => {
					failures.note(e.into());

					return None;
				},
			};

		if !response.status().is_success() {
			return None;
		}

		match metadata::parse_document(response.body()) {
			Ok(document) => Some(document),
			Err(reason) => {
				failures.note(Error::DiscoveryFailed { reason });

				None
			},
		}
	}
}
impl Debug for Discoverer {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Discoverer")
			.field("guard", &self.guard)
			.field("probe_timeout", &self.probe_timeout)
			.field("request_timeout", &self.request_timeout)
			.field("max_path_probes", &self.max_path_probes)
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::_preludet::ScriptedTransport;

	const RESOURCE: &str = "https://mcp.example.com/mcp";

	fn discoverer(transport: &ScriptedTransport) -> Discoverer {
		Discoverer::new(Arc::new(transport.clone()), SsrfGuard::new().with_dns_resolution(false))
	}

	fn resource() -> Url {
		Url::parse(RESOURCE).expect("Resource fixture should parse.")
	}

	#[tokio::test]
	async fn successful_handshake_skips_discovery() {
		let transport = ScriptedTransport::default().respond(RESOURCE, 200, "{}");
		let outcome =
			discoverer(&transport).discover(&resource()).await.expect("Handshake should succeed.");

		assert_eq!(outcome, DiscoveryOutcome::OkWithoutAuth);
		assert_eq!(transport.requests().len(), 1);
	}

	#[tokio::test]
	async fn non_401_failures_short_circuit() {
		let transport = ScriptedTransport::default().respond(RESOURCE, 503, "");
		let outcome =
			discoverer(&transport).discover(&resource()).await.expect("Handshake should complete.");

		assert_eq!(outcome, DiscoveryOutcome::ServerError { status: 503 });
		assert_eq!(transport.requests().len(), 1);
	}

	#[tokio::test]
	async fn path_probing_is_capped_at_two_live_requests() {
		let transport = ScriptedTransport::default().respond(RESOURCE, 401, "");
		let err = discoverer(&transport)
			.with_max_path_probes(10)
			.discover(&resource())
			.await
			.expect_err("Nothing should be discovered.");
		let probes = transport
			.requests()
			.iter()
			.filter(|request| heuristics::PROBE_PATHS.contains(&request.uri().path()))
			.count();

		assert!(matches!(err, Error::DiscoveryFailed { .. }));
		assert_eq!(probes, 2);
	}

	#[tokio::test(start_paused = true)]
	async fn stalled_probes_are_abandoned_after_the_probe_timeout() {
		let transport = ScriptedTransport::default()
			.respond(RESOURCE, 401, "")
			.stall("https://mcp.example.com/authorize")
			.respond("https://mcp.example.com/oauth/authorize", 200, "");
		let started = tokio::time::Instant::now();
		let outcome = discoverer(&transport)
			.with_timeouts(StdDuration::from_secs(3), StdDuration::from_secs(10))
			.discover(&resource())
			.await
			.expect("The second probe should be found.");
		let elapsed = started.elapsed();
		let DiscoveryOutcome::Discovered(result) = outcome else {
			panic!("Expected a discovery result, got {outcome:?}.");
		};

		assert_eq!(result.method, DiscoveryMethod::PathProbe);
		assert_eq!(
			result.authorization_endpoint().map(Url::as_str),
			Some("https://mcp.example.com/oauth/authorize")
		);
		assert!(elapsed >= StdDuration::from_secs(3));
		assert!(elapsed < StdDuration::from_secs(10));
	}

	#[tokio::test]
	async fn known_vendor_urls_short_circuit_without_requests() {
		let transport = ScriptedTransport::default();
		let url = Url::parse("https://mcp.atlassian.com/mcp").expect("URL fixture should parse.");
		let err = discoverer(&transport)
			.discover(&url)
			.await
			.expect_err("Misconfigured vendor URL should be refused.");

		assert!(matches!(err, Error::KnownServerMisconfigured { .. }));
		assert!(transport.requests().is_empty());
	}

	#[tokio::test]
	async fn blocked_metadata_urls_are_never_fetched() {
		let transport = ScriptedTransport::default().respond_with_header(
			RESOURCE,
			401,
			"www-authenticate",
			r#"Bearer resource_metadata="http://169.254.169.254/latest/meta-data""#,
		);
		let err = discoverer(&transport)
			.discover(&resource())
			.await
			.expect_err("Nothing usable should be discovered.");

		assert!(matches!(err, Error::SsrfRejected { .. }));
		assert!(transport.requests().iter().all(|r| r.uri().host() != Some("169.254.169.254")));
	}

	#[tokio::test]
	async fn header_urls_are_used_when_metadata_is_missing() {
		let transport = ScriptedTransport::default().respond_with_header(
			RESOURCE,
			401,
			"x-auth-url",
			"https://auth.example.com/oauth/authorize?client=mcp",
		);
		let outcome =
			discoverer(&transport).discover(&resource()).await.expect("Header URL should be found.");
		let DiscoveryOutcome::Discovered(result) = outcome else {
			panic!("Expected a discovery result, got {outcome:?}.");
		};

		assert_eq!(result.method, DiscoveryMethod::ResponseHeader);
		assert!(result.metadata.is_none());
		assert_eq!(
			result.authorization_endpoint().map(Url::as_str),
			Some("https://auth.example.com/oauth/authorize?client=mcp")
		);
	}

	#[test]
	fn requestable_scopes_drop_denied_entries() {
		let metadata: AuthorizationServerMetadata = serde_json::from_value(serde_json::json!({
			"authorization_endpoint": "https://auth.example.com/authorize",
			"scopes_supported": ["openid", "email", "read:metadata", "tools:call"],
		}))
		.expect("Metadata fixture should deserialize.");
		let result =
			DiscoveryResult::from_metadata(metadata, DiscoveryMethod::AuthorizationServerMetadata);

		assert_eq!(result.requestable_scopes().normalized(), "tools:call");
	}
}
