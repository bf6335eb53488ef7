//! Orchestrator entry points: classify a server, drive the matching strategy, and persist the
//! outcome.
//!
//! [`Orchestrator::trigger_oauth`] either hands back an authorization URL (the user finishes in
//! a browser) or reports that credentials were stored. Every invocation emits one
//! [`FlowMetric`], whatever the outcome; sink failures are logged and dropped.

pub mod pkce;

mod classify;
mod completion;
mod delegated;
mod direct;
mod token;

pub use classify::*;
pub use pkce::*;
pub use token::{REFRESH_TOKEN_ENV_KEY, TOKEN_ENV_KEYS};

// crates.io
use tokio::time::Instant;
// self
use crate::{
	_prelude::*,
	auth::{ServerId, UserId},
	config::OrchestratorConfig,
	discovery::Discoverer,
	error::{PublicError, sanitize},
	http::HttpTransport,
	launcher::{Launcher, ProcessSpawner, Sandbox, TokioSpawner},
	obs::{FlowMetric, FlowMetricsSink, FlowOutcome, NoopSink},
	port::PortAllocator,
	registration::ClientRegistrar,
	server::{DecryptedServer, FieldCipher, ServerRecord},
	store::OAuthStore,
};

/// Result of a successful trigger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TriggerOutcome {
	/// The user must visit `url`; a callback finishes the flow.
	AuthorizationRequired {
		/// Authorization URL.
		url: Url,
	},
	/// Credentials were obtained and stored.
	Authorized,
	/// The server answered the handshake without asking for credentials.
	NotRequired,
}
impl TriggerOutcome {
	fn flow_outcome(&self) -> FlowOutcome {
		match self {
			Self::AuthorizationRequired { .. } => FlowOutcome::Pending,
			Self::Authorized | Self::NotRequired => FlowOutcome::Authorized,
		}
	}
}

/// Caller-facing trigger response; errors are already sanitized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TriggerResponse {
	/// False when the invocation failed.
	pub success: bool,
	/// URL the user must open, when authorization is still pending.
	pub oauth_url: Option<Url>,
	/// Sanitized failure.
	pub error: Option<PublicError>,
}
impl From<TriggerOutcome> for TriggerResponse {
	fn from(outcome: TriggerOutcome) -> Self {
		let oauth_url = match outcome {
			TriggerOutcome::AuthorizationRequired { url } => Some(url),
			TriggerOutcome::Authorized | TriggerOutcome::NotRequired => None,
		};

		Self { success: true, oauth_url, error: None }
	}
}
impl From<&Error> for TriggerResponse {
	fn from(err: &Error) -> Self {
		Self { success: false, oauth_url: None, error: Some(sanitize(err)) }
	}
}

/// Labels attached to the invocation's metric; filled in as the flow learns more.
#[derive(Clone, Debug)]
pub(crate) struct FlowLabels {
	pub(crate) provider: String,
	pub(crate) server_type: &'static str,
}
impl Default for FlowLabels {
	fn default() -> Self {
		Self { provider: "unknown".into(), server_type: "unknown" }
	}
}

/// Drives authorization for configured tool servers.
#[derive(Clone)]
pub struct Orchestrator {
	config: OrchestratorConfig,
	store: Arc<dyn OAuthStore>,
	cipher: Arc<dyn FieldCipher>,
	http: Arc<dyn HttpTransport>,
	discoverer: Discoverer,
	registrar: ClientRegistrar,
	pkce: PkceBinder,
	ports: Arc<PortAllocator>,
	spawner: Arc<dyn ProcessSpawner>,
	sandbox: Sandbox,
	metrics: Arc<dyn FlowMetricsSink>,
}
impl Orchestrator {
	/// Creates an orchestrator with Tokio-spawned helpers, sandbox detection, a port allocator
	/// over the configured range, and no metrics sink.
	pub fn new(
		config: OrchestratorConfig,
		store: Arc<dyn OAuthStore>,
		cipher: Arc<dyn FieldCipher>,
		http: Arc<dyn HttpTransport>,
	) -> Self {
		let discoverer = Discoverer::from_config(http.clone(), &config);
		let registrar = ClientRegistrar::new(
			http.clone(),
			store.clone(),
			config.ssrf_guard(),
			config.request_timeout,
			&config.client_name,
		);
		let pkce = PkceBinder::new(
			config.state_key.clone(),
			config.pkce_ttl,
			config.redirect_uri.clone(),
			store.clone(),
		);
		let ports = Arc::new(PortAllocator::new(config.port_range.clone()));

		Self {
			config,
			store,
			cipher,
			http,
			discoverer,
			registrar,
			pkce,
			ports,
			spawner: Arc::new(TokioSpawner),
			sandbox: Sandbox::new(),
			metrics: Arc::new(NoopSink),
		}
	}

	/// Replaces the metrics sink.
	pub fn with_metrics_sink(mut self, sink: Arc<dyn FlowMetricsSink>) -> Self {
		self.metrics = sink;

		self
	}

	/// Replaces the helper process spawner.
	pub fn with_spawner(mut self, spawner: Arc<dyn ProcessSpawner>) -> Self {
		self.spawner = spawner;

		self
	}

	/// Shares a port allocator, e.g. across several orchestrators.
	pub fn with_port_allocator(mut self, ports: Arc<PortAllocator>) -> Self {
		self.ports = ports;

		self
	}

	/// Replaces the sandbox policy for helper processes.
	pub fn with_sandbox(mut self, sandbox: Sandbox) -> Self {
		self.sandbox = sandbox;

		self
	}

	/// Active configuration.
	pub fn config(&self) -> &OrchestratorConfig {
		&self.config
	}

	/// Port allocator used by delegated flows.
	pub fn ports(&self) -> &Arc<PortAllocator> {
		&self.ports
	}

	/// Starts authorization for a server and returns a sanitized response.
	pub async fn trigger_oauth(&self, server_id: &ServerId) -> TriggerResponse {
		match self.try_trigger_oauth(server_id).await {
			Ok(outcome) => outcome.into(),
			Err(e) => TriggerResponse::from(&e),
		}
	}

	/// Starts authorization for a server, returning the internal error on failure.
	pub async fn try_trigger_oauth(&self, server_id: &ServerId) -> Result<TriggerOutcome> {
		let started = Instant::now();
		let mut labels = FlowLabels::default();
		let result = self.trigger(server_id, &mut labels).await;

		match &result {
			Ok(outcome) => {
				tracing::info!(server = %server_id, outcome = ?outcome, "OAuth trigger finished.");
				self.record_metric(&labels, started, outcome.flow_outcome());
			},
			Err(e) => {
				tracing::warn!(server = %server_id, error = %e, "OAuth trigger failed.");
				self.record_metric(&labels, started, FlowOutcome::Failure);
			},
		}

		result
	}

	/// Deletes expired PKCE rows, returning how many were removed.
	pub async fn purge_expired_states(&self) -> Result<usize> {
		Ok(self.store.purge_expired_pkce(OffsetDateTime::now_utc()).await?)
	}

	async fn trigger(&self, server_id: &ServerId, labels: &mut FlowLabels) -> Result<TriggerOutcome> {
		let (server, user_id) = self.load_server(server_id).await?;

		labels.server_type = server.record.transport.as_str();

		match ServerClass::of(&server.record)? {
			ServerClass::ProcessDelegated { program, remote_url } =>
				self.delegated(&server, program, remote_url, labels).await,
			ServerClass::DirectHttp { url } => self.direct(&server, &user_id, url, labels).await,
			ServerClass::Unsupported =>
				Err(Error::UnsupportedServerType { server: server_id.to_string() }),
		}
	}

	async fn load_server(&self, server_id: &ServerId) -> Result<(DecryptedServer, UserId)> {
		let record =
			self.store.fetch_server(server_id).await?.ok_or_else(|| Error::server_not_found(server_id))?;
		let profile = self.store.fetch_profile(&record.profile_id).await?.ok_or_else(|| {
			Error::NotFound { entity: "Profile", id: record.profile_id.to_string() }
		})?;
		let server = DecryptedServer::open(record, self.cipher.as_ref()).map_err(Error::Decryption)?;

		Ok((server, profile.user_id))
	}

	// Re-reads the record so concurrent platform edits are not overwritten.
	async fn patch_server(
		&self,
		server_id: &ServerId,
		patch: impl FnOnce(&mut ServerRecord),
	) -> Result<()> {
		let mut record =
			self.store.fetch_server(server_id).await?.ok_or_else(|| Error::server_not_found(server_id))?;

		patch(&mut record);
		self.store.save_server(record).await?;

		Ok(())
	}

	fn launcher(&self) -> Launcher {
		Launcher::from_config(self.ports.clone(), self.spawner.clone(), &self.config)
			.with_sandbox(self.sandbox.clone())
	}

	fn record_metric(&self, labels: &FlowLabels, started: Instant, outcome: FlowOutcome) {
		let metric = FlowMetric {
			provider: labels.provider.clone(),
			server_type: labels.server_type,
			duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
			outcome,
		};

		if let Err(e) = self.metrics.record_flow(&metric) {
			tracing::warn!(error = %e, "Dropping flow metric.");
		}
	}
}
impl Debug for Orchestrator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Orchestrator")
			.field("config", &self.config)
			.field("discoverer", &self.discoverer)
			.field("pkce", &self.pkce)
			.field("sandbox", &self.sandbox)
			.finish_non_exhaustive()
	}
}

/// Host of an authorization server or remote URL, used as the metric provider label.
pub(crate) fn provider_label(raw: &str) -> String {
	Url::parse(raw)
		.ok()
		.and_then(|url| url.host_str().map(str::to_owned))
		.unwrap_or_else(|| raw.to_owned())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::_preludet::{ReversibleCipher, ScriptedTransport, seeded_store, test_config};

	#[test]
	fn responses_carry_sanitized_errors_only() {
		let err = Error::DiscoveryFailed { reason: "GET https://10.0.0.5/.well-known failed".into() };
		let response = TriggerResponse::from(&err);
		let rendered = serde_json::to_string(&response).expect("Response should serialize.");

		assert!(!response.success);
		assert!(!rendered.contains("10.0.0.5"));

		let pending = TriggerResponse::from(TriggerOutcome::AuthorizationRequired {
			url: Url::parse("https://auth.example.com/authorize").expect("URL fixture should parse."),
		});

		assert!(pending.success);
		assert!(pending.oauth_url.is_some());
	}

	#[test]
	fn provider_labels_use_hosts() {
		assert_eq!(provider_label("https://auth.example.com/tenant"), "auth.example.com");
		assert_eq!(provider_label("opaque-issuer"), "opaque-issuer");
	}

	#[tokio::test]
	async fn missing_profiles_are_not_found() {
		let store = seeded_store([]);
		let mut record = crate::_preludet::http_server("srv-1", "https://mcp.example.com/mcp");

		record.profile_id = crate::_preludet::profile_id("ghost");
		store.insert_server(record);

		let orchestrator = Orchestrator::new(
			test_config(),
			store,
			Arc::new(ReversibleCipher::default()),
			Arc::new(ScriptedTransport::default()),
		);
		let err = orchestrator
			.try_trigger_oauth(&crate::_preludet::server_id("srv-1"))
			.await
			.expect_err("Unknown profile should fail.");

		assert!(matches!(err, Error::NotFound { entity: "Profile", .. }));
	}
}
