//! RFC 7591 dynamic client registration and the cached per-server registration record.
//!
//! Registration is best effort: a failure surfaces as [`Error::RegistrationFailed`] and the
//! orchestrator degrades to its generic client id instead of aborting the flow.

// crates.io
use oauth2::http::StatusCode;
// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, ServerId, TokenSecret},
	discovery::{DiscoveryMethod, DiscoveryResult},
	http::{self, HttpTransport},
	ssrf::SsrfGuard,
	store::OAuthStore,
};

/// Cached OAuth client registration for one server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistrationRecord {
	/// Server the registration belongs to.
	pub server_id: ServerId,
	/// Authorization endpoint users are sent to.
	pub authorization_endpoint: Url,
	/// Token endpoint, when discovery found one.
	pub token_endpoint: Option<Url>,
	/// RFC 7591 registration endpoint, when advertised.
	pub registration_endpoint: Option<Url>,
	/// Issuer or origin of the authorization server.
	pub authorization_server: String,
	/// RFC 8707 resource indicator.
	pub resource_identifier: Option<String>,
	/// Client identifier.
	pub client_id: String,
	/// Client secret, if the registration issued one.
	pub client_secret: Option<TokenSecret>,
	/// Scopes advertised by the authorization server.
	pub scopes: Option<ScopeSet>,
	/// Whether the authorization server advertised `S256`.
	pub supports_pkce: bool,
	/// Discovery strategy that produced the endpoints.
	pub discovery_method: DiscoveryMethod,
	/// True when `client_id` came from dynamic registration rather than the fallback id.
	#[serde(default)]
	pub dynamically_registered: bool,
	/// Last write instant.
	pub updated_at: OffsetDateTime,
}
impl RegistrationRecord {
	/// Builds a record from a discovery result; returns `None` when no authorization endpoint
	/// was found.
	pub fn from_discovery(
		server_id: &ServerId,
		discovery: &DiscoveryResult,
		credentials: &ClientCredentials,
	) -> Option<Self> {
		let authorization_endpoint = discovery.authorization_endpoint()?.clone();
		let metadata = discovery.metadata.as_ref();
		let authorization_server = discovery
			.auth_server
			.clone()
			.unwrap_or_else(|| authorization_endpoint.origin().ascii_serialization());

		Some(Self {
			server_id: server_id.clone(),
			authorization_endpoint,
			token_endpoint: metadata.and_then(|m| m.token_endpoint.clone()),
			registration_endpoint: metadata.and_then(|m| m.registration_endpoint.clone()),
			authorization_server,
			resource_identifier: discovery.resource_id.clone(),
			client_id: credentials.client_id.clone(),
			client_secret: credentials.client_secret.clone(),
			scopes: (!discovery.scopes.is_empty()).then(|| discovery.scopes.clone()),
			supports_pkce: metadata.is_some_and(|m| m.supports_s256()),
			discovery_method: discovery.method,
			dynamically_registered: credentials.dynamically_registered,
			updated_at: OffsetDateTime::now_utc(),
		})
	}

	/// Credentials held by this record.
	pub fn credentials(&self) -> ClientCredentials {
		ClientCredentials {
			client_id: self.client_id.clone(),
			client_secret: self.client_secret.clone(),
			dynamically_registered: self.dynamically_registered,
		}
	}

	/// Replaces the stored credentials.
	pub fn with_credentials(mut self, credentials: &ClientCredentials) -> Self {
		self.client_id = credentials.client_id.clone();
		self.client_secret = credentials.client_secret.clone();
		self.dynamically_registered = credentials.dynamically_registered;
		self.updated_at = OffsetDateTime::now_utc();

		self
	}

	/// Returns true when every field except `updated_at` matches.
	pub fn same_as(&self, other: &Self) -> bool {
		self.server_id == other.server_id
			&& self.authorization_endpoint == other.authorization_endpoint
			&& self.token_endpoint == other.token_endpoint
			&& self.registration_endpoint == other.registration_endpoint
			&& self.authorization_server == other.authorization_server
			&& self.resource_identifier == other.resource_identifier
			&& self.client_id == other.client_id
			&& self.client_secret == other.client_secret
			&& self.scopes == other.scopes
			&& self.supports_pkce == other.supports_pkce
			&& self.discovery_method == other.discovery_method
			&& self.dynamically_registered == other.dynamically_registered
	}
}

/// Client identifier and optional secret used for one authorization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientCredentials {
	/// Client identifier.
	pub client_id: String,
	/// Client secret, if one was issued.
	pub client_secret: Option<TokenSecret>,
	/// True when issued by dynamic registration.
	pub dynamically_registered: bool,
}
impl ClientCredentials {
	/// Generic pre-shared client id used when registration is unavailable.
	pub fn fallback(client_id: impl Into<String>) -> Self {
		Self { client_id: client_id.into(), client_secret: None, dynamically_registered: false }
	}
}

#[derive(Serialize)]
struct RegistrationRequest<'a> {
	client_name: &'a str,
	redirect_uris: [&'a str; 1],
	grant_types: [&'static str; 2],
	response_types: [&'static str; 1],
	token_endpoint_auth_method: &'static str,
}

#[derive(Deserialize)]
struct RegistrationResponse {
	client_id: String,
	#[serde(default)]
	client_secret: Option<String>,
}

/// Registers OAuth clients with authorization servers and caches the result.
#[derive(Clone)]
pub struct ClientRegistrar {
	http: Arc<dyn HttpTransport>,
	store: Arc<dyn OAuthStore>,
	guard: SsrfGuard,
	timeout: StdDuration,
	client_name: String,
}
impl ClientRegistrar {
	/// Creates a registrar sending `client_name` in every registration request.
	pub fn new(
		http: Arc<dyn HttpTransport>,
		store: Arc<dyn OAuthStore>,
		guard: SsrfGuard,
		timeout: StdDuration,
		client_name: impl Into<String>,
	) -> Self {
		Self { http, store, guard, timeout, client_name: client_name.into() }
	}

	/// Returns `existing` unchanged unless re-registration is forced; otherwise registers a
	/// new public client and updates the cached record when the issued id differs.
	pub async fn get_or_register(
		&self,
		server_id: &ServerId,
		registration_endpoint: &Url,
		redirect_uri: &Url,
		existing: Option<&ClientCredentials>,
		force: bool,
	) -> Result<ClientCredentials> {
		if let Some(existing) = existing.filter(|_| !force) {
			tracing::debug!(server = %server_id, "Reusing cached client registration.");

			return Ok(existing.clone());
		}

		let credentials = self.register(registration_endpoint, redirect_uri).await?;

		// Cache failures are logged; issued credentials are always returned.
		match self.store.fetch_registration(server_id).await {
			Ok(Some(stored)) if stored.client_id != credentials.client_id => {
				if let Err(e) =
					self.store.save_registration(stored.with_credentials(&credentials)).await
				{
					tracing::warn!(
						server = %server_id,
						error = %e,
						"Failed to cache the dynamic client registration."
					);
				}
			},
			Ok(_) => {},
			Err(e) => tracing::warn!(
				server = %server_id,
				error = %e,
				"Failed to load the cached registration record."
			),
		}

		tracing::info!(server = %server_id, "Registered dynamic OAuth client.");

		Ok(credentials)
	}

	async fn register(&self, endpoint: &Url, redirect_uri: &Url) -> Result<ClientCredentials> {
		self.guard.validate(endpoint).await?;

		let body = serde_json::to_value(RegistrationRequest {
			client_name: &self.client_name,
			redirect_uris: [redirect_uri.as_str()],
			grant_types: ["authorization_code", "refresh_token"],
			response_types: ["code"],
			token_endpoint_auth_method: "none",
		})
		.map_err(|e| Error::RegistrationFailed { reason: e.to_string() })?;
		let request = http::post_json(endpoint, &body, "application/json")?;
		let response =
			self.http.execute_within(request, self.timeout, "Client registration").await?;
		let status = response.status();

		if !status.is_success() {
			return Err(Error::RegistrationFailed { reason: status_reason(status) });
		}

		let parsed: RegistrationResponse = serde_path_to_error::deserialize(
			&mut serde_json::Deserializer::from_slice(response.body()),
		)
		.map_err(|e| Error::RegistrationFailed {
			reason: format!("malformed registration response at `{}`", e.path()),
		})?;

		if parsed.client_id.trim().is_empty() {
			return Err(Error::RegistrationFailed { reason: "empty client_id".into() });
		}

		Ok(ClientCredentials {
			client_id: parsed.client_id,
			client_secret: parsed.client_secret.filter(|s| !s.is_empty()).map(TokenSecret::new),
			dynamically_registered: true,
		})
	}
}
impl Debug for ClientRegistrar {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ClientRegistrar")
			.field("client_name", &self.client_name)
			.field("timeout", &self.timeout)
			.finish_non_exhaustive()
	}
}

fn status_reason(status: StatusCode) -> String {
	format!("registration endpoint returned HTTP {}", status.as_u16())
}
