//! Token material captured at the end of an authorization.

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenSecret},
};

/// Access token (plus optional refresh metadata) obtained from an authorization server or
/// reported by a delegated helper process.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenGrant {
	/// Access token secret; callers must avoid logging it.
	pub access_token: TokenSecret,
	/// Refresh token secret, if one was issued.
	pub refresh_token: Option<TokenSecret>,
	/// Token type reported by the issuer, normally `Bearer`.
	pub token_type: String,
	/// Absolute expiry, when the issuer reported a lifetime.
	pub expires_at: Option<OffsetDateTime>,
	/// Scopes granted, when reported.
	pub scope: Option<ScopeSet>,
}
impl TokenGrant {
	/// Creates a bearer grant with no refresh or expiry metadata.
	pub fn bearer(access_token: impl Into<String>) -> Self {
		Self {
			access_token: TokenSecret::new(access_token),
			refresh_token: None,
			token_type: "Bearer".into(),
			expires_at: None,
			scope: None,
		}
	}

	/// Attaches a refresh token.
	pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(refresh_token));

		self
	}

	/// Sets an absolute expiry instant.
	pub fn with_expires_at(mut self, expires_at: OffsetDateTime) -> Self {
		self.expires_at = Some(expires_at);

		self
	}

	/// Records the granted scopes.
	pub fn with_scope(mut self, scope: ScopeSet) -> Self {
		self.scope = Some(scope);

		self
	}

	/// Overrides the token type.
	pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
		self.token_type = token_type.into();

		self
	}

	/// Value for an `Authorization` header; the type is normalized to `Bearer` casing.
	pub fn authorization_header(&self) -> String {
		let kind = if self.token_type.eq_ignore_ascii_case("bearer") {
			"Bearer"
		} else {
			self.token_type.as_str()
		};

		format!("{kind} {}", self.access_token.expose())
	}

	/// Non-secret metadata describing the grant, suitable for configuration blobs.
	pub fn metadata(&self) -> serde_json::Value {
		serde_json::json!({
			"token_type": self.token_type,
			"expires_at": self.expires_at.map(|at| at.unix_timestamp()),
			"has_refresh_token": self.refresh_token.is_some(),
			"scope": self.scope.as_ref().map(ScopeSet::normalized),
		})
	}
}
impl Debug for TokenGrant {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenGrant")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("token_type", &self.token_type)
			.field("expires_at", &self.expires_at)
			.field("scope", &self.scope)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn debug_output_hides_secrets() {
		let grant = TokenGrant::bearer("access-123").with_refresh_token("refresh-456");
		let rendered = format!("{grant:?}");

		assert!(!rendered.contains("access-123"));
		assert!(!rendered.contains("refresh-456"));
	}

	#[test]
	fn metadata_never_contains_token_values() {
		let grant = TokenGrant::bearer("access-123")
			.with_refresh_token("refresh-456")
			.with_token_type("bearer")
			.with_expires_at(OffsetDateTime::UNIX_EPOCH + Duration::hours(1));
		let metadata = grant.metadata();

		assert_eq!(grant.authorization_header(), "Bearer access-123");
		assert_eq!(metadata["has_refresh_token"], serde_json::Value::Bool(true));
		assert_eq!(metadata["expires_at"], serde_json::json!(3600));
		assert!(!metadata.to_string().contains("access-123"));
	}
}
