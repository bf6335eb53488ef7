//! Tool-server records as seen by the orchestrator, plus the field-encryption seam.
//!
//! The orchestrator only patches a handful of configuration keys and the environment map; every
//! other field is owned by the surrounding platform.

// self
use crate::{
	_prelude::*,
	auth::{ProfileId, ServerId, UserId},
};

/// Configuration key stamped when an authorization URL is handed out.
pub const OAUTH_INITIATED_AT: &str = "oauth_initiated_at";
/// Configuration key stamped when credentials are stored.
pub const OAUTH_COMPLETED_AT: &str = "oauth_completed_at";
/// Configuration key telling the platform whether the server still needs authorization.
pub const REQUIRES_AUTH: &str = "requires_auth";
/// Configuration key naming the authorization provider.
pub const OAUTH_PROVIDER: &str = "oauth_provider";
/// Configuration key holding outbound request headers for HTTP servers.
pub const HEADERS: &str = "headers";
/// Configuration key holding non-secret token metadata.
pub const OAUTH_TOKEN_METADATA: &str = "oauth_token_metadata";

/// How the platform talks to a tool server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerTransport {
	/// Local process speaking over stdin/stdout.
	Stdio,
	/// Streamable HTTP endpoint.
	StreamableHttp,
	/// Server-sent events endpoint.
	Sse,
}
impl ServerTransport {
	/// Returns true for the HTTP-based transports.
	pub const fn is_http(self) -> bool {
		matches!(self, Self::StreamableHttp | Self::Sse)
	}

	/// Returns a stable label suitable for logs and metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Stdio => "stdio",
			Self::StreamableHttp => "streamable-http",
			Self::Sse => "sse",
		}
	}
}
impl Display for ServerTransport {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Stored tool-server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerRecord {
	/// Server identifier.
	pub id: ServerId,
	/// Owning profile.
	pub profile_id: ProfileId,
	/// Display name.
	pub name: String,
	/// Transport used to reach the server.
	pub transport: ServerTransport,
	/// Target URL for HTTP-based servers.
	pub url: Option<String>,
	/// Program for process-based servers.
	pub command: Option<String>,
	/// Program arguments for process-based servers.
	#[serde(default)]
	pub args: Vec<String>,
	/// Ciphertext of the environment map.
	pub encrypted_env: Option<String>,
	/// Plaintext environment written by older platform versions; cleared on the next token write.
	pub legacy_env: Option<BTreeMap<String, String>>,
	/// Free-form configuration blob.
	#[serde(default)]
	pub config: serde_json::Map<String, serde_json::Value>,
}
impl ServerRecord {
	/// Creates an HTTP-based server record.
	pub fn http(
		id: ServerId,
		profile_id: ProfileId,
		transport: ServerTransport,
		url: impl Into<String>,
	) -> Self {
		Self {
			name: id.to_string(),
			id,
			profile_id,
			transport,
			url: Some(url.into()),
			command: None,
			args: Vec::new(),
			encrypted_env: None,
			legacy_env: None,
			config: Default::default(),
		}
	}

	/// Creates a process-based server record.
	pub fn stdio<I, S>(id: ServerId, profile_id: ProfileId, command: impl Into<String>, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			name: id.to_string(),
			id,
			profile_id,
			transport: ServerTransport::Stdio,
			url: None,
			command: Some(command.into()),
			args: args.into_iter().map(Into::into).collect(),
			encrypted_env: None,
			legacy_env: None,
			config: Default::default(),
		}
	}

	/// Overrides the display name.
	pub fn with_name(mut self, name: impl Into<String>) -> Self {
		self.name = name.into();

		self
	}

	/// Sets the plaintext legacy environment.
	pub fn with_legacy_env(mut self, env: BTreeMap<String, String>) -> Self {
		self.legacy_env = Some(env);

		self
	}

	/// Returns a configuration value, if set.
	pub fn config_value(&self, key: &str) -> Option<&serde_json::Value> {
		self.config.get(key)
	}

	/// Returns `requires_auth` when it is a boolean.
	pub fn requires_auth(&self) -> Option<bool> {
		self.config_value(REQUIRES_AUTH).and_then(serde_json::Value::as_bool)
	}

	/// Sets a single configuration key.
	pub fn patch_config(&mut self, key: &str, value: impl Into<serde_json::Value>) {
		self.config.insert(key.to_owned(), value.into());
	}

	/// Stamps the flow as initiated, recording the provider label.
	pub fn mark_initiated(&mut self, provider: &str, now: OffsetDateTime) {
		self.patch_config(OAUTH_INITIATED_AT, timestamp(now));
		self.patch_config(OAUTH_PROVIDER, provider);
	}

	/// Stamps the server as authorized.
	pub fn mark_authorized(&mut self, now: OffsetDateTime) {
		self.patch_config(REQUIRES_AUTH, false);
		self.patch_config(OAUTH_COMPLETED_AT, timestamp(now));
	}
}

/// Profile that owns servers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
	/// Profile identifier.
	pub id: ProfileId,
	/// Platform user who owns the profile.
	pub user_id: UserId,
}

/// Server record with its environment decrypted for the duration of one invocation.
#[derive(Clone)]
pub struct DecryptedServer {
	/// Stored record.
	pub record: ServerRecord,
	/// Plaintext environment map.
	pub env: BTreeMap<String, String>,
}
impl DecryptedServer {
	/// Decrypts the record's environment, falling back to the legacy plaintext copy.
	pub fn open(record: ServerRecord, cipher: &dyn FieldCipher) -> Result<Self, CipherError> {
		let env = match &record.encrypted_env {
			Some(blob) => cipher.decrypt(blob)?,
			None => record.legacy_env.clone().unwrap_or_default(),
		};

		Ok(Self { record, env })
	}
}
impl Debug for DecryptedServer {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("DecryptedServer")
			.field("record", &self.record.id)
			.field("env_keys", &self.env.keys().collect::<Vec<_>>())
			.finish()
	}
}

/// Encrypt/decrypt capability for sensitive server fields.
pub trait FieldCipher
where
	Self: Send + Sync,
{
	/// Decrypts an environment blob into its plaintext map.
	fn decrypt(&self, blob: &str) -> Result<BTreeMap<String, String>, CipherError>;

	/// Encrypts a full environment map into a blob.
	fn encrypt(&self, env: &BTreeMap<String, String>) -> Result<String, CipherError>;
}

/// Failure reported by a [`FieldCipher`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum CipherError {
	/// Blob could not be decrypted.
	#[error("Decryption failed: {message}.")]
	Decrypt {
		/// Backend-supplied detail.
		message: String,
	},
	/// Map could not be encrypted.
	#[error("Encryption failed: {message}.")]
	Encrypt {
		/// Backend-supplied detail.
		message: String,
	},
}

fn timestamp(now: OffsetDateTime) -> String {
	now.format(&time::format_description::well_known::Rfc3339)
		.unwrap_or_else(|_| now.unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	struct Plain;
	impl FieldCipher for Plain {
		fn decrypt(&self, blob: &str) -> Result<BTreeMap<String, String>, CipherError> {
			serde_json::from_str(blob).map_err(|e| CipherError::Decrypt { message: e.to_string() })
		}

		fn encrypt(&self, env: &BTreeMap<String, String>) -> Result<String, CipherError> {
			serde_json::to_string(env).map_err(|e| CipherError::Encrypt { message: e.to_string() })
		}
	}

	fn record() -> ServerRecord {
		ServerRecord::http(
			ServerId::new("srv-1").expect("Server fixture should be valid."),
			ProfileId::new("profile-1").expect("Profile fixture should be valid."),
			ServerTransport::StreamableHttp,
			"https://mcp.example.com/mcp",
		)
	}

	#[test]
	fn open_prefers_ciphertext_over_legacy_copy() {
		let mut record = record().with_legacy_env(BTreeMap::from([("A".into(), "legacy".into())]));

		record.encrypted_env = Some(r#"{"A":"sealed"}"#.into());

		let opened = DecryptedServer::open(record, &Plain).expect("Ciphertext should decrypt.");

		assert_eq!(opened.env.get("A").map(String::as_str), Some("sealed"));
	}

	#[test]
	fn open_falls_back_to_legacy_env() {
		let record = record().with_legacy_env(BTreeMap::from([("A".into(), "legacy".into())]));
		let opened = DecryptedServer::open(record, &Plain).expect("Legacy env should be used.");

		assert_eq!(opened.env.get("A").map(String::as_str), Some("legacy"));
	}

	#[test]
	fn authorization_markers_patch_config() {
		let mut record = record();
		let now = OffsetDateTime::UNIX_EPOCH;

		record.mark_initiated("auth.example.com", now);
		record.mark_authorized(now);

		assert_eq!(record.requires_auth(), Some(false));
		assert_eq!(
			record.config_value(OAUTH_PROVIDER).and_then(|v| v.as_str()),
			Some("auth.example.com")
		);
		assert_eq!(
			record.config_value(OAUTH_COMPLETED_AT).and_then(|v| v.as_str()),
			Some("1970-01-01T00:00:00Z")
		);
	}

	#[test]
	fn transports_classify_http() {
		assert!(ServerTransport::Sse.is_http());
		assert!(ServerTransport::StreamableHttp.is_http());
		assert!(!ServerTransport::Stdio.is_http());
	}
}
