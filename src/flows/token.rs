//! Persists captured credentials on the server record.

// self
use crate::{
	_prelude::*,
	auth::{ServerId, TokenGrant},
	flows::Orchestrator,
	server::{DecryptedServer, HEADERS, OAUTH_TOKEN_METADATA, ServerRecord},
};

/// Environment variables that receive the access token.
pub const TOKEN_ENV_KEYS: &[&str] = &["OAUTH_ACCESS_TOKEN", "ACCESS_TOKEN", "AUTH_TOKEN"];
/// Environment variable that receives the refresh token.
pub const REFRESH_TOKEN_ENV_KEY: &str = "OAUTH_REFRESH_TOKEN";

impl Orchestrator {
	/// Marks the server authorized and, when a grant is present, stores it.
	///
	/// The token goes into the environment under [`TOKEN_ENV_KEYS`] and, for HTTP servers, into
	/// the `headers` configuration as a bearer credential. The whole environment is re-encrypted
	/// and the legacy plaintext copy is cleared. Any failure is reported as
	/// [`Error::TokenPersistence`].
	pub async fn store_token(&self, server_id: &ServerId, grant: Option<&TokenGrant>) -> Result<()> {
		let mut record = self
			.store
			.fetch_server(server_id)
			.await
			.map_err(Error::token_persistence)?
			.ok_or_else(|| Error::server_not_found(server_id))?;

		if let Some(grant) = grant {
			let mut env = DecryptedServer::open(record.clone(), self.cipher.as_ref())
				.map_err(Error::token_persistence)?
				.env;

			for key in TOKEN_ENV_KEYS {
				env.insert((*key).into(), grant.access_token.expose().into());
			}
			if let Some(refresh) = &grant.refresh_token {
				env.insert(REFRESH_TOKEN_ENV_KEY.into(), refresh.expose().into());
			}
			if record.transport.is_http() {
				fold_bearer_header(&mut record, grant);
			}

			record.encrypted_env = Some(self.cipher.encrypt(&env).map_err(Error::token_persistence)?);
			record.legacy_env = None;
		}

		record.mark_authorized(OffsetDateTime::now_utc());
		self.store.save_server(record).await.map_err(Error::token_persistence)?;

		tracing::info!(server = %server_id, stored_token = grant.is_some(), "Server marked as authorized.");

		Ok(())
	}
}

fn fold_bearer_header(record: &mut ServerRecord, grant: &TokenGrant) {
	let mut headers = record
		.config_value(HEADERS)
		.and_then(serde_json::Value::as_object)
		.cloned()
		.unwrap_or_default();

	headers.insert("Authorization".into(), grant.authorization_header().into());
	record.patch_config(HEADERS, serde_json::Value::Object(headers));
	record.patch_config(OAUTH_TOKEN_METADATA, grant.metadata());
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::{
			ReversibleCipher, ScriptedTransport, helper_server, http_server, seeded_store, server_id,
			test_config,
		},
		server::{FieldCipher, REQUIRES_AUTH},
		store::MemoryStore,
	};

	fn orchestrator(store: Arc<MemoryStore>, cipher: ReversibleCipher) -> Orchestrator {
		Orchestrator::new(test_config(), store, Arc::new(cipher), Arc::new(ScriptedTransport::default()))
	}

	#[tokio::test]
	async fn http_servers_get_env_and_bearer_header() {
		let server = http_server("srv-1", "https://mcp.example.com/mcp")
			.with_legacy_env(BTreeMap::from([("REGION".into(), "eu".into())]));
		let store = seeded_store([server]);
		let grant = TokenGrant::bearer("at-1").with_refresh_token("rt-1");

		orchestrator(store.clone(), ReversibleCipher::default())
			.store_token(&server_id("srv-1"), Some(&grant))
			.await
			.expect("Token should be stored.");

		let record = store.server(&server_id("srv-1")).expect("Server should exist.");
		let env = ReversibleCipher::default()
			.decrypt(record.encrypted_env.as_deref().expect("Env should be encrypted."))
			.expect("Env should decrypt.");

		for key in TOKEN_ENV_KEYS {
			assert_eq!(env.get(*key).map(String::as_str), Some("at-1"));
		}

		assert_eq!(env.get(REFRESH_TOKEN_ENV_KEY).map(String::as_str), Some("rt-1"));
		assert_eq!(env.get("REGION").map(String::as_str), Some("eu"));
		assert!(record.legacy_env.is_none());
		assert_eq!(record.config_value(HEADERS).map(|h| h["Authorization"].clone()), Some("Bearer at-1".into()));
		assert_eq!(record.config_value(REQUIRES_AUTH), Some(&serde_json::Value::Bool(false)));
	}

	#[tokio::test]
	async fn helper_managed_tokens_only_mark_authorized() {
		let store = seeded_store([helper_server("srv-1", "https://mcp.example.com/sse")]);

		orchestrator(store.clone(), ReversibleCipher::default())
			.store_token(&server_id("srv-1"), None)
			.await
			.expect("Marking should succeed.");

		let record = store.server(&server_id("srv-1")).expect("Server should exist.");

		assert_eq!(record.requires_auth(), Some(false));
		assert!(record.encrypted_env.is_none());
		assert!(record.config_value(HEADERS).is_none());
	}

	#[tokio::test]
	async fn encryption_failures_leave_the_record_untouched() {
		let server = http_server("srv-1", "https://mcp.example.com/mcp")
			.with_legacy_env(BTreeMap::from([("REGION".into(), "eu".into())]));
		let store = seeded_store([server]);
		let err = orchestrator(store.clone(), ReversibleCipher::failing_encrypt())
			.store_token(&server_id("srv-1"), Some(&TokenGrant::bearer("at-1")))
			.await
			.expect_err("Encryption failure should surface.");
		let record = store.server(&server_id("srv-1")).expect("Server should exist.");

		assert!(matches!(err, Error::TokenPersistence { .. }));
		assert!(record.legacy_env.is_some());
		assert!(record.requires_auth().is_none());
	}
}
