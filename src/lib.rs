//! OAuth authorization orchestrator for MCP tool servers: RFC 9728 discovery, RFC 7591 client
//! registration, HMAC-bound PKCE state, and supervised delegated-helper flows in one crate.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod cleanup;
pub mod config;
pub mod discovery;
pub mod error;
pub mod flows;
pub mod http;
pub mod launcher;
pub mod oauth;
pub mod obs;
pub mod port;
pub mod registration;
pub mod server;
pub mod ssrf;
pub mod store;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and fixtures for tests; enabled via `cfg(test)` or the `test`
	//! crate feature.

	pub use crate::_prelude::*;

	// std
	use std::{
		collections::VecDeque,
		sync::atomic::{AtomicUsize, Ordering},
	};
	// crates.io
	use oauth2::{
		HttpRequest, HttpResponse,
		http::{HeaderName, HeaderValue, StatusCode},
	};
	// self
	use crate::{
		auth::{ProfileId, ServerId, UserId},
		config::OrchestratorConfig,
		error::TransportError,
		flows::StateKey,
		http::{HttpFuture, HttpTransport},
		launcher::{CommandSpec, HelperProcess, ProcessFuture, ProcessSpawner},
		obs::{FlowMetric, FlowMetricsSink, SinkError},
		server::{CipherError, FieldCipher, Profile, ServerRecord, ServerTransport},
		store::MemoryStore,
	};

	/// Profile every fixture server belongs to.
	pub const TEST_PROFILE: &str = "profile-test";
	/// Owner of [`TEST_PROFILE`].
	pub const TEST_USER: &str = "user-test";

	/// Parses a server identifier fixture.
	pub fn server_id(raw: &str) -> ServerId {
		ServerId::new(raw).expect("Server id fixture should be valid.")
	}

	/// Parses a user identifier fixture.
	pub fn user_id(raw: &str) -> UserId {
		UserId::new(raw).expect("User id fixture should be valid.")
	}

	/// Parses a profile identifier fixture.
	pub fn profile_id(raw: &str) -> ProfileId {
		ProfileId::new(raw).expect("Profile id fixture should be valid.")
	}

	/// Configuration that trusts loopback targets, skips DNS, and uses a fixed state key.
	pub fn test_config() -> OrchestratorConfig {
		OrchestratorConfig::builder()
			.ssrf_allowed_hosts(["127.0.0.1", "localhost"])
			.ssrf_resolve_dns(false)
			.state_key(StateKey::from_bytes(&[7_u8; 32]).expect("Fixed state key should be valid."))
			.redirect_uri(
				Url::parse("http://localhost:8080/oauth/callback")
					.expect("Redirect fixture should parse."),
			)
			.build()
			.expect("Test configuration should validate.")
	}

	/// In-memory store holding [`TEST_PROFILE`] and the given servers.
	pub fn seeded_store(servers: impl IntoIterator<Item = ServerRecord>) -> Arc<MemoryStore> {
		let store = MemoryStore::default();

		store.insert_profile(Profile { id: profile_id(TEST_PROFILE), user_id: user_id(TEST_USER) });

		for server in servers {
			store.insert_server(server);
		}

		Arc::new(store)
	}

	/// Streamable-HTTP server record in [`TEST_PROFILE`].
	pub fn http_server(id: &str, url: &str) -> ServerRecord {
		ServerRecord::http(server_id(id), profile_id(TEST_PROFILE), ServerTransport::StreamableHttp, url)
	}

	/// Delegated-helper server record (`npx -y mcp-remote <remote>`) in [`TEST_PROFILE`].
	pub fn helper_server(id: &str, remote: &str) -> ServerRecord {
		ServerRecord::stdio(server_id(id), profile_id(TEST_PROFILE), "npx", [
			"-y",
			crate::launcher::REMOTE_HELPER_MARKER,
			remote,
		])
	}

	#[derive(Clone)]
	struct Scripted {
		status: u16,
		headers: Vec<(String, String)>,
		body: Vec<u8>,
		stall: bool,
	}

	#[derive(Default)]
	struct TransportState {
		routes: HashMap<String, Scripted>,
		requests: Vec<HttpRequest>,
	}

	/// In-process [`HttpTransport`] with responses keyed by full URL; unknown URLs return `404`.
	#[derive(Clone, Default)]
	pub struct ScriptedTransport(Arc<Mutex<TransportState>>);
	impl ScriptedTransport {
		/// Responds to `url` with a status and raw body.
		pub fn respond(self, url: &str, status: u16, body: &str) -> Self {
			self.route(url, Scripted {
				status,
				headers: Vec::new(),
				body: body.as_bytes().to_vec(),
				stall: false,
			})
		}

		/// Responds to `url` with a JSON body.
		pub fn respond_json(self, url: &str, status: u16, body: serde_json::Value) -> Self {
			self.route(url, Scripted {
				status,
				headers: vec![("content-type".into(), "application/json".into())],
				body: body.to_string().into_bytes(),
				stall: false,
			})
		}

		/// Responds to `url` with a status, one header, and an empty body.
		pub fn respond_with_header(self, url: &str, status: u16, name: &str, value: &str) -> Self {
			self.route(url, Scripted {
				status,
				headers: vec![(name.into(), value.into())],
				body: Vec::new(),
				stall: false,
			})
		}

		/// Never answers requests to `url`.
		pub fn stall(self, url: &str) -> Self {
			self.route(url, Scripted { status: 200, headers: Vec::new(), body: Vec::new(), stall: true })
		}

		/// Requests seen so far, in order.
		pub fn requests(&self) -> Vec<HttpRequest> {
			self.0.lock().requests.iter().map(copy_request).collect()
		}

		fn route(self, url: &str, scripted: Scripted) -> Self {
			self.0.lock().routes.insert(route_key(url), scripted);

			self
		}
	}
	impl HttpTransport for ScriptedTransport {
		fn execute(&self, request: HttpRequest) -> HttpFuture<'_> {
			let scripted = {
				let mut state = self.0.lock();
				let scripted = state.routes.get(&route_key(&request.uri().to_string())).cloned();

				state.requests.push(request);

				scripted
			};

			Box::pin(async move {
				let Some(scripted) = scripted else {
					return Ok(response(404, &[], Vec::new()));
				};

				if scripted.stall {
					std::future::pending::<()>().await;
				}

				Ok::<_, TransportError>(response(scripted.status, &scripted.headers, scripted.body))
			})
		}
	}
	impl Debug for ScriptedTransport {
		fn fmt(&self, f: &mut Formatter) -> FmtResult {
			f.debug_struct("ScriptedTransport").field("requests", &self.0.lock().requests.len()).finish()
		}
	}

	fn route_key(url: &str) -> String {
		Url::parse(url).map(String::from).unwrap_or_else(|_| url.to_owned())
	}

	fn response(status: u16, headers: &[(String, String)], body: Vec<u8>) -> HttpResponse {
		let mut response = HttpResponse::new(body);

		*response.status_mut() = StatusCode::from_u16(status).expect("Scripted status should be valid.");

		for (name, value) in headers {
			response.headers_mut().append(
				HeaderName::from_bytes(name.as_bytes()).expect("Scripted header name should be valid."),
				HeaderValue::from_str(value).expect("Scripted header value should be valid."),
			);
		}

		response
	}

	fn copy_request(request: &HttpRequest) -> HttpRequest {
		let mut copy = HttpRequest::new(request.body().clone());

		*copy.method_mut() = request.method().clone();
		*copy.uri_mut() = request.uri().clone();
		*copy.headers_mut() = request.headers().clone();

		copy
	}

	/// Reversible [`FieldCipher`]: ciphertext is the JSON map behind a `sealed:` prefix.
	#[derive(Clone, Copy, Debug, Default)]
	pub struct ReversibleCipher {
		fail_encrypt: bool,
	}
	impl ReversibleCipher {
		/// Cipher whose `encrypt` always fails.
		pub fn failing_encrypt() -> Self {
			Self { fail_encrypt: true }
		}

		/// Seals a map the way [`FieldCipher::encrypt`] does.
		pub fn seal(env: &BTreeMap<String, String>) -> String {
			format!("sealed:{}", serde_json::to_string(env).expect("Env fixture should serialize."))
		}
	}
	impl FieldCipher for ReversibleCipher {
		fn decrypt(&self, blob: &str) -> Result<BTreeMap<String, String>, CipherError> {
			let json = blob
				.strip_prefix("sealed:")
				.ok_or_else(|| CipherError::Decrypt { message: "missing seal".into() })?;

			serde_json::from_str(json).map_err(|e| CipherError::Decrypt { message: e.to_string() })
		}

		fn encrypt(&self, env: &BTreeMap<String, String>) -> Result<String, CipherError> {
			if self.fail_encrypt {
				return Err(CipherError::Encrypt { message: "key unavailable".into() });
			}

			Ok(Self::seal(env))
		}
	}

	/// [`FlowMetricsSink`] that keeps every event; the failing variant rejects them.
	#[derive(Clone, Debug, Default)]
	pub struct RecordingSink {
		events: Arc<Mutex<Vec<FlowMetric>>>,
		fail: bool,
	}
	impl RecordingSink {
		/// Sink that records and then reports an error.
		pub fn failing() -> Self {
			Self { events: Default::default(), fail: true }
		}

		/// Events recorded so far.
		pub fn events(&self) -> Vec<FlowMetric> {
			self.events.lock().clone()
		}
	}
	impl FlowMetricsSink for RecordingSink {
		fn record_flow(&self, metric: &FlowMetric) -> Result<(), SinkError> {
			self.events.lock().push(metric.clone());

			if self.fail {
				return Err(SinkError { message: "sink offline".into() });
			}

			Ok(())
		}
	}

	#[derive(Default)]
	struct SpawnerState {
		lines: Vec<String>,
		hang: bool,
		fail: bool,
		spawned: Vec<CommandSpec>,
		terminations: Arc<AtomicUsize>,
	}

	/// [`ProcessSpawner`] whose processes replay fixed output lines.
	#[derive(Clone, Default)]
	pub struct ScriptedSpawner(Arc<Mutex<SpawnerState>>);
	impl ScriptedSpawner {
		/// Processes print `lines` and then exit.
		pub fn emitting<I, S>(lines: I) -> Self
		where
			I: IntoIterator<Item = S>,
			S: Into<String>,
		{
			let spawner = Self::default();

			spawner.0.lock().lines = lines.into_iter().map(Into::into).collect();

			spawner
		}

		/// Every spawn fails with `NotFound`.
		pub fn failing() -> Self {
			let spawner = Self::default();

			spawner.0.lock().fail = true;

			spawner
		}

		/// Processes keep running after their output until terminated.
		pub fn hanging(self) -> Self {
			self.0.lock().hang = true;

			self
		}

		/// Commands spawned so far.
		pub fn spawned(&self) -> Vec<CommandSpec> {
			self.0.lock().spawned.clone()
		}

		/// Number of processes terminated.
		pub fn terminations(&self) -> usize {
			self.0.lock().terminations.load(Ordering::SeqCst)
		}
	}
	impl ProcessSpawner for ScriptedSpawner {
		fn spawn(&self, spec: &CommandSpec) -> std::io::Result<Box<dyn HelperProcess>> {
			let mut state = self.0.lock();

			if state.fail {
				return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "program not found"));
			}

			state.spawned.push(spec.clone());

			Ok(Box::new(ScriptedProcess {
				lines: state.lines.iter().cloned().collect(),
				hang: state.hang,
				terminated: false,
				terminations: state.terminations.clone(),
			}))
		}
	}
	impl Debug for ScriptedSpawner {
		fn fmt(&self, f: &mut Formatter) -> FmtResult {
			f.debug_struct("ScriptedSpawner").field("spawned", &self.0.lock().spawned.len()).finish()
		}
	}

	struct ScriptedProcess {
		lines: VecDeque<String>,
		hang: bool,
		terminated: bool,
		terminations: Arc<AtomicUsize>,
	}
	impl HelperProcess for ScriptedProcess {
		fn next_line(&mut self) -> ProcessFuture<'_, Option<String>> {
			let line = self.lines.pop_front();
			let hang = line.is_none() && self.hang && !self.terminated;

			Box::pin(async move {
				if hang {
					std::future::pending::<()>().await;
				}

				line
			})
		}

		fn terminate(&mut self) {
			if !self.terminated {
				self.terminated = true;
				self.terminations.fetch_add(1, Ordering::SeqCst);
			}
		}

		fn exit_status(&mut self) -> Option<String> {
			(!self.hang).then(|| "exit status: 1".into())
		}
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
		time::Duration as StdDuration,
	};

	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use httpmock as _;
