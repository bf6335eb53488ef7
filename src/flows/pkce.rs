//! PKCE generation, authorization URL construction, and HMAC-bound state rows.
//!
//! Each row's `integrity_hash` is an HMAC-SHA256 over the length-prefixed tuple
//! `(state, server_id, user_id, code_verifier)`. Redemption recomputes it with a constant-time
//! comparison before the verifier is trusted.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use rand::{Rng, RngCore, distr::Alphanumeric};
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	auth::{ServerId, TokenSecret, UserId},
	discovery::DiscoveryResult,
	error::{ConfigError, StateRejection},
	registration::RegistrationRecord,
	store::OAuthStore,
};

type HmacSha256 = Hmac<Sha256>;

const STATE_LEN: usize = 32;
const PKCE_VERIFIER_LEN: usize = 64;
const STATE_KEY_MIN_LEN: usize = 32;

/// Secret key used to bind PKCE state rows.
#[derive(Clone)]
pub struct StateKey(Arc<[u8]>);
impl StateKey {
	/// Generates a random 32-byte key.
	pub fn generate() -> Self {
		let mut bytes = [0_u8; STATE_KEY_MIN_LEN];

		rand::rng().fill_bytes(&mut bytes);

		Self(Arc::from(bytes.as_slice()))
	}

	/// Decodes a base64url key (padding optional); it must carry at least 32 bytes.
	pub fn from_base64url(encoded: &str) -> Result<Self, ConfigError> {
		let bytes = URL_SAFE_NO_PAD
			.decode(encoded.trim_end_matches('='))
			.map_err(|_| ConfigError::InvalidStateKey { min: STATE_KEY_MIN_LEN })?;

		Self::from_bytes(&bytes)
	}

	/// Wraps raw key bytes; at least 32 bytes are required.
	pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
		if bytes.len() < STATE_KEY_MIN_LEN {
			return Err(ConfigError::InvalidStateKey { min: STATE_KEY_MIN_LEN });
		}

		Ok(Self(Arc::from(bytes)))
	}

	fn mac(
		&self,
		state: &str,
		server_id: &str,
		user_id: &str,
		verifier: &str,
	) -> Result<HmacSha256, ConfigError> {
		let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.0)
			.map_err(|_| ConfigError::InvalidStateKey { min: STATE_KEY_MIN_LEN })?;

		for field in [state, server_id, user_id, verifier] {
			mac.update(&(field.len() as u64).to_be_bytes());
			mac.update(field.as_bytes());
		}

		Ok(mac)
	}
}
impl Debug for StateKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("StateKey(<redacted>)")
	}
}

/// Stored PKCE row; written once, read once.
#[derive(Clone, Serialize, Deserialize)]
pub struct PkceFlowState {
	/// Opaque state value (primary key).
	pub state: String,
	/// Server being authorized.
	pub server_id: ServerId,
	/// User who started the flow.
	pub user_id: UserId,
	/// PKCE code verifier.
	pub code_verifier: TokenSecret,
	/// Redirect URI used in the authorization request.
	pub redirect_uri: Url,
	/// Base64url HMAC over the bound tuple.
	pub integrity_hash: String,
	/// Creation instant.
	pub created_at: OffsetDateTime,
	/// Expiry instant; rows are unusable at or after it.
	pub expires_at: OffsetDateTime,
}
impl Debug for PkceFlowState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PkceFlowState")
			.field("server_id", &self.server_id)
			.field("user_id", &self.user_id)
			.field("redirect_uri", &self.redirect_uri)
			.field("expires_at", &self.expires_at)
			.finish_non_exhaustive()
	}
}

/// Authorization request returned to the caller.
#[derive(Clone, Debug)]
pub struct AuthorizationRequest {
	/// URL the user must visit.
	pub url: Url,
	/// State value embedded in the URL.
	pub state: String,
	/// Whether a PKCE row backs this request.
	pub pkce: bool,
}

/// Builds authorization URLs and issues and redeems PKCE state rows.
#[derive(Clone)]
pub struct PkceBinder {
	key: StateKey,
	ttl: Duration,
	redirect_uri: Url,
	store: Arc<dyn OAuthStore>,
}
impl PkceBinder {
	/// Creates a binder that persists rows in `store`.
	pub fn new(key: StateKey, ttl: Duration, redirect_uri: Url, store: Arc<dyn OAuthStore>) -> Self {
		Self { key, ttl, redirect_uri, store }
	}

	/// Builds the authorization URL for a discovered server.
	///
	/// When the registration supports S256 the verifier row is persisted before the URL is
	/// returned; a store failure fails the whole request.
	pub async fn build_authorization_request(
		&self,
		discovery: &DiscoveryResult,
		registration: &RegistrationRecord,
		server_id: &ServerId,
		user_id: &UserId,
	) -> Result<AuthorizationRequest> {
		let state = random_string(STATE_LEN);
		let mut url = registration.authorization_endpoint.clone();
		let scopes = discovery.requestable_scopes();
		let verifier = registration.supports_pkce.then(|| random_string(PKCE_VERIFIER_LEN));

		{
			let mut pairs = url.query_pairs_mut();

			pairs.append_pair("response_type", "code");
			pairs.append_pair("client_id", &registration.client_id);
			pairs.append_pair("redirect_uri", self.redirect_uri.as_str());
			pairs.append_pair("state", &state);

			if let Some(resource) = &discovery.resource_id {
				pairs.append_pair("resource", resource);
			}
			if !scopes.is_empty() {
				pairs.append_pair("scope", &scopes.normalized());
			}
			if let Some(verifier) = &verifier {
				pairs.append_pair("code_challenge", &code_challenge(verifier));
				pairs.append_pair("code_challenge_method", "S256");
			}
		}

		if let Some(verifier) = verifier {
			let row =
				self.issue(state.clone(), server_id, user_id, verifier, OffsetDateTime::now_utc())?;

			self.store
				.insert_pkce_state(row)
				.await
				.map_err(|source| Error::PkcePersistenceFailed { source })?;
		}

		Ok(AuthorizationRequest { url, state, pkce: registration.supports_pkce })
	}

	/// Removes the row for `state` and returns it if it is unexpired and intact.
	pub async fn redeem(&self, state: &str, now: OffsetDateTime) -> Result<PkceFlowState> {
		let row = self
			.store
			.take_pkce_state(state)
			.await?
			.ok_or(Error::StateRejected { reason: StateRejection::Unknown })?;

		if now >= row.expires_at {
			return Err(Error::StateRejected { reason: StateRejection::Expired });
		}
		if !self.verify(&row) {
			tracing::warn!(server = %row.server_id, "PKCE state failed its integrity check.");

			return Err(Error::StateRejected { reason: StateRejection::IntegrityMismatch });
		}

		Ok(row)
	}

	/// Computes the integrity hash for a bound tuple.
	pub fn integrity_hash(
		&self,
		state: &str,
		server_id: &str,
		user_id: &str,
		verifier: &str,
	) -> Result<String, ConfigError> {
		let mac = self.key.mac(state, server_id, user_id, verifier)?;

		Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
	}

	/// Recomputes a row's HMAC and compares it in constant time.
	pub fn verify(&self, row: &PkceFlowState) -> bool {
		let Ok(expected) = URL_SAFE_NO_PAD.decode(&row.integrity_hash) else { return false };
		let Ok(mac) =
			self.key.mac(&row.state, &row.server_id, &row.user_id, row.code_verifier.expose())
		else {
			return false;
		};

		mac.verify_slice(&expected).is_ok()
	}

	fn issue(
		&self,
		state: String,
		server_id: &ServerId,
		user_id: &UserId,
		verifier: String,
		now: OffsetDateTime,
	) -> Result<PkceFlowState, ConfigError> {
		let integrity_hash = self.integrity_hash(&state, server_id, user_id, &verifier)?;

		Ok(PkceFlowState {
			state,
			server_id: server_id.clone(),
			user_id: user_id.clone(),
			code_verifier: TokenSecret::new(verifier),
			redirect_uri: self.redirect_uri.clone(),
			integrity_hash,
			created_at: now,
			expires_at: now + self.ttl,
		})
	}
}
impl Debug for PkceBinder {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PkceBinder")
			.field("ttl", &self.ttl)
			.field("redirect_uri", &self.redirect_uri)
			.finish_non_exhaustive()
	}
}

/// Derives the S256 challenge: unpadded base64url of SHA-256 over the verifier.
pub fn code_challenge(verifier: &str) -> String {
	URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		auth::ProfileId,
		discovery::{AuthorizationServerMetadata, DiscoveryMethod},
		registration::ClientCredentials,
		server::{Profile, ServerRecord},
		store::{MemoryStore, StoreError, StoreFuture},
	};

	// Delegates to a memory store but refuses every PKCE row.
	#[derive(Default)]
	struct RejectingStore(MemoryStore);
	impl OAuthStore for RejectingStore {
		fn fetch_server<'a>(&'a self, id: &'a ServerId) -> StoreFuture<'a, Option<ServerRecord>> {
			self.0.fetch_server(id)
		}

		fn save_server(&self, record: ServerRecord) -> StoreFuture<'_, ()> {
			self.0.save_server(record)
		}

		fn fetch_profile<'a>(&'a self, id: &'a ProfileId) -> StoreFuture<'a, Option<Profile>> {
			self.0.fetch_profile(id)
		}

		fn fetch_registration<'a>(
			&'a self,
			server: &'a ServerId,
		) -> StoreFuture<'a, Option<RegistrationRecord>> {
			self.0.fetch_registration(server)
		}

		fn save_registration(&self, record: RegistrationRecord) -> StoreFuture<'_, ()> {
			self.0.save_registration(record)
		}

		fn insert_pkce_state(&self, _: PkceFlowState) -> StoreFuture<'_, ()> {
			Box::pin(async { Err::<(), _>(StoreError::Backend { message: "read-only replica".into() }) })
		}

		fn take_pkce_state<'a>(&'a self, state: &'a str) -> StoreFuture<'a, Option<PkceFlowState>> {
			self.0.take_pkce_state(state)
		}

		fn purge_expired_pkce(&self, now: OffsetDateTime) -> StoreFuture<'_, usize> {
			self.0.purge_expired_pkce(now)
		}
	}

	fn binder(store: Arc<MemoryStore>) -> PkceBinder {
		PkceBinder::new(
			StateKey::from_bytes(&[7; 32]).expect("Key fixture should be long enough."),
			Duration::minutes(5),
			Url::parse("https://app.example.com/oauth/callback").expect("Redirect should parse."),
			store,
		)
	}

	fn ids() -> (ServerId, UserId) {
		(
			ServerId::new("srv-1").expect("Server fixture should be valid."),
			UserId::new("user-1").expect("User fixture should be valid."),
		)
	}

	#[test]
	fn challenge_matches_rfc_7636_vector() {
		assert_eq!(
			code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
			"E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
		);
	}

	#[test]
	fn any_single_field_mutation_fails_verification() {
		let binder = binder(Arc::new(MemoryStore::default()));
		let (server, user) = ids();
		let row = binder
			.issue("state-1".into(), &server, &user, "verifier-1".into(), OffsetDateTime::now_utc())
			.expect("Row should be issued.");

		assert!(binder.verify(&row));

		let mut mutated = row.clone();

		mutated.state = "state-2".into();

		assert!(!binder.verify(&mutated));

		let mut mutated = row.clone();

		mutated.server_id = ServerId::new("srv-2").expect("Server fixture should be valid.");

		assert!(!binder.verify(&mutated));

		let mut mutated = row.clone();

		mutated.user_id = UserId::new("user-2").expect("User fixture should be valid.");

		assert!(!binder.verify(&mutated));

		let mut mutated = row;

		mutated.code_verifier = TokenSecret::new("verifier-2");

		assert!(!binder.verify(&mutated));
	}

	#[test]
	fn field_boundaries_are_length_prefixed() {
		let binder = binder(Arc::new(MemoryStore::default()));

		assert_ne!(
			binder.integrity_hash("ab", "c", "u", "v").expect("Hash should compute."),
			binder.integrity_hash("a", "bc", "u", "v").expect("Hash should compute.")
		);
	}

	#[test]
	fn different_keys_produce_different_hashes() {
		let a = binder(Arc::new(MemoryStore::default()));
		let b = PkceBinder::new(
			StateKey::from_bytes(&[9; 32]).expect("Key fixture should be long enough."),
			Duration::minutes(5),
			Url::parse("https://app.example.com/oauth/callback").expect("Redirect should parse."),
			Arc::new(MemoryStore::default()),
		);

		assert_ne!(
			a.integrity_hash("s", "srv", "u", "v").expect("Hash should compute."),
			b.integrity_hash("s", "srv", "u", "v").expect("Hash should compute.")
		);
	}

	#[tokio::test]
	async fn redeem_is_read_once_and_rejects_expired_rows() {
		let store = Arc::new(MemoryStore::default());
		let binder = binder(store.clone());
		let (server, user) = ids();
		let now = OffsetDateTime::now_utc();
		let live = binder
			.issue("live".into(), &server, &user, "v1".into(), now)
			.expect("Live row should be issued.");
		let stale = binder
			.issue("stale".into(), &server, &user, "v2".into(), now - Duration::minutes(6))
			.expect("Stale row should be issued.");

		store.insert_pkce_state(live).await.expect("Live row should insert.");
		store.insert_pkce_state(stale).await.expect("Stale row should insert.");

		let row = binder.redeem("live", now).await.expect("Live row should redeem.");

		assert_eq!(row.code_verifier.expose(), "v1");
		assert!(matches!(
			binder.redeem("live", now).await,
			Err(Error::StateRejected { reason: StateRejection::Unknown })
		));
		assert!(matches!(
			binder.redeem("stale", now).await,
			Err(Error::StateRejected { reason: StateRejection::Expired })
		));
	}

	#[tokio::test]
	async fn tampered_rows_are_rejected() {
		let store = Arc::new(MemoryStore::default());
		let binder = binder(store.clone());
		let (server, user) = ids();
		let now = OffsetDateTime::now_utc();
		let mut row =
			binder.issue("s".into(), &server, &user, "v1".into(), now).expect("Row should be issued.");

		row.code_verifier = TokenSecret::new("attacker");
		store.insert_pkce_state(row).await.expect("Row should insert.");

		assert!(matches!(
			binder.redeem("s", now).await,
			Err(Error::StateRejected { reason: StateRejection::IntegrityMismatch })
		));
	}

	fn discovered(scopes: &[&str]) -> (DiscoveryResult, RegistrationRecord) {
		let metadata: AuthorizationServerMetadata = serde_json::from_value(serde_json::json!({
			"authorization_endpoint": "https://auth.example.com/authorize",
			"token_endpoint": "https://auth.example.com/token",
			"scopes_supported": scopes,
			"code_challenge_methods_supported": ["S256"],
		}))
		.expect("Metadata fixture should deserialize.");
		let mut discovery =
			DiscoveryResult::from_metadata(metadata, DiscoveryMethod::ProtectedResourceMetadata);

		discovery.resource_id = Some("https://mcp.example.com/mcp".into());

		let registration = RegistrationRecord::from_discovery(
			&ids().0,
			&discovery,
			&ClientCredentials::fallback("public-client"),
		)
		.expect("Metadata fixture has an authorization endpoint.");

		(discovery, registration)
	}

	fn query(url: &Url, name: &str) -> Option<String> {
		url.query_pairs().find(|(key, _)| key == name).map(|(_, value)| value.into_owned())
	}

	#[tokio::test]
	async fn denied_scopes_are_omitted_and_the_verifier_row_is_stored() {
		let store = Arc::new(MemoryStore::default());
		let binder = binder(store.clone());
		let (server, user) = ids();
		let (discovery, registration) = discovered(&["openid", "offline_access", "read:metadata"]);
		let request = binder
			.build_authorization_request(&discovery, &registration, &server, &user)
			.await
			.expect("Request should build.");

		assert!(request.pkce);
		assert_eq!(query(&request.url, "response_type").as_deref(), Some("code"));
		assert_eq!(query(&request.url, "client_id").as_deref(), Some("public-client"));
		assert_eq!(query(&request.url, "state"), Some(request.state.clone()));
		assert_eq!(query(&request.url, "code_challenge_method").as_deref(), Some("S256"));
		assert_eq!(query(&request.url, "resource").as_deref(), Some("https://mcp.example.com/mcp"));
		assert!(query(&request.url, "scope").is_none());

		let row = binder
			.redeem(&request.state, OffsetDateTime::now_utc())
			.await
			.expect("Stored row should redeem.");

		assert_eq!(
			query(&request.url, "code_challenge"),
			Some(code_challenge(row.code_verifier.expose()))
		);
		assert_eq!(row.expires_at - row.created_at, Duration::minutes(5));
	}

	#[tokio::test]
	async fn persistence_failures_fail_the_request() {
		let binder = PkceBinder::new(
			StateKey::from_bytes(&[7; 32]).expect("Key fixture should be long enough."),
			Duration::minutes(5),
			Url::parse("https://app.example.com/oauth/callback").expect("Redirect should parse."),
			Arc::new(RejectingStore::default()),
		);
		let (server, user) = ids();
		let (discovery, registration) = discovered(&["mcp:tools"]);
		let err = binder
			.build_authorization_request(&discovery, &registration, &server, &user)
			.await
			.expect_err("A lost verifier row should fail the request.");

		assert!(matches!(err, Error::PkcePersistenceFailed { .. }));
	}

	#[test]
	fn state_keys_require_32_bytes() {
		assert!(StateKey::from_bytes(&[1; 16]).is_err());
		assert!(StateKey::from_base64url(&URL_SAFE_NO_PAD.encode([1_u8; 32])).is_ok());
		assert!(StateKey::from_base64url("not base64!").is_err());
		assert_eq!(format!("{:?}", StateKey::generate()), "StateKey(<redacted>)");
	}
}
