//! Orchestrator-level error taxonomy shared across discovery, registration, launch, and storage.
//!
//! Internal errors carry full context for logs. Nothing leaves the orchestrator without passing
//! through [`sanitize`], which maps every variant onto a [`PublicError`] with a fixed,
//! user-actionable message.

mod sanitize;

pub use sanitize::*;

// self
use crate::{
	_prelude::*,
	port::PortAllocationError,
	server::CipherError,
	ssrf::SsrfRejection,
	store::StoreError,
};

/// Orchestrator-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical orchestrator error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(TransportError),

	/// Server record or its owning profile is missing.
	#[error("{entity} `{id}` was not found.")]
	NotFound {
		/// Kind of record that could not be resolved.
		entity: &'static str,
		/// Identifier that was looked up.
		id: String,
	},
	/// Server transport cannot take part in OAuth.
	#[error("Server `{server}` uses a transport that does not support OAuth.")]
	UnsupportedServerType {
		/// Server identifier.
		server: String,
	},
	/// Sensitive server fields could not be decrypted.
	#[error("Server secrets could not be decrypted.")]
	Decryption(#[source] CipherError),
	/// A server-supplied URL points at a blocked network target.
	#[error("Refused to contact `{url}`: {reason}.")]
	SsrfRejected {
		/// URL that failed validation.
		url: String,
		/// Why the guard rejected it.
		reason: SsrfRejection,
	},
	/// Every discovery strategy was exhausted without a usable result.
	#[error("Authorization discovery failed: {reason}.")]
	DiscoveryFailed {
		/// Human-readable summary of the last failure.
		reason: String,
	},
	/// The resource URL matches a vendor that needs a specific configuration.
	#[error("Server configuration needs attention: {hint}")]
	KnownServerMisconfigured {
		/// Actionable hint for the operator.
		hint: &'static str,
	},
	/// RFC 7591 registration failed; callers degrade to the generic client id.
	#[error("Dynamic client registration failed: {reason}.")]
	RegistrationFailed {
		/// Registration endpoint response summary.
		reason: String,
	},
	/// PKCE flow state could not be written; the authorization URL must not be used.
	#[error("PKCE flow state could not be persisted.")]
	PkcePersistenceFailed {
		/// Underlying store failure.
		#[source]
		source: StoreError,
	},
	/// Callback state is unknown, expired, or fails its integrity check.
	#[error("Authorization state was rejected: {reason}.")]
	StateRejected {
		/// Rejection reason.
		reason: StateRejection,
	},
	/// The delegated helper process could not be started.
	#[error("Helper process `{command}` could not be spawned.")]
	ProcessSpawnFailed {
		/// Program that failed to start.
		command: String,
		/// Underlying spawn failure.
		#[source]
		source: std::io::Error,
	},
	/// The delegated helper process exited before producing a result.
	#[error("Helper process exited before completing authorization: {reason}.")]
	ProcessExited {
		/// Exit status or trailing output summary.
		reason: String,
	},
	/// No callback port could be handed out.
	#[error("Callback port allocation failed: {0}")]
	PortAllocationFailed(#[from] PortAllocationError),
	/// A bounded step exceeded its time box.
	#[error("{operation} timed out after {after:?}.")]
	Timeout {
		/// Step that timed out.
		operation: &'static str,
		/// Time box that elapsed.
		after: StdDuration,
	},
	/// Authorization completed but the credentials could not be saved.
	#[error("Authorization completed but the token could not be saved.")]
	TokenPersistence {
		/// Encryption or store failure.
		#[source]
		source: BoxError,
	},
	/// Token endpoint rejected the authorization code exchange.
	#[error("Token exchange failed: {reason}.")]
	TokenExchange {
		/// Provider- or transport-supplied reason string.
		reason: String,
	},
}
impl Error {
	/// Wraps an encryption or store failure raised while saving tokens.
	pub fn token_persistence(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::TokenPersistence { source: Box::new(src) }
	}

	pub(crate) fn server_not_found(id: impl Display) -> Self {
		Self::NotFound { entity: "Server", id: id.to_string() }
	}
}
impl From<TransportError> for Error {
	fn from(e: TransportError) -> Self {
		match e {
			TransportError::TimedOut { operation, after } => Self::Timeout { operation, after },
			other => Self::Transport(other),
		}
	}
}

/// Reasons a PKCE flow state lookup is refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateRejection {
	/// No row exists for the state value (never issued or already redeemed).
	Unknown,
	/// The row outlived its expiry.
	Expired,
	/// The recomputed HMAC does not match the stored integrity hash.
	IntegrityMismatch,
}
impl Display for StateRejection {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(match self {
			Self::Unknown => "unknown state",
			Self::Expired => "state expired",
			Self::IntegrityMismatch => "integrity check failed",
		})
	}
}

/// Configuration and validation failures raised by the orchestrator.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// A configured or discovered URL cannot be parsed.
	#[error("URL `{value}` is invalid.")]
	InvalidUrl {
		/// Offending value.
		value: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Redirect URI cannot be used for OAuth callbacks.
	#[error("Redirect URI must use http or https: {uri}.")]
	InvalidRedirect {
		/// Offending redirect URI.
		uri: String,
	},
	/// HMAC key for state binding is too short or not valid base64url.
	#[error("State signing key must decode to at least {min} bytes.")]
	InvalidStateKey {
		/// Minimum key length in bytes.
		min: usize,
	},
	/// Callback port range is empty or starts at a privileged port.
	#[error("Callback port range {start}..={end} is invalid.")]
	InvalidPortRange {
		/// First port of the range.
		start: u16,
		/// Last port of the range.
		end: u16,
	},
	/// Environment variable holds an unusable value.
	#[error("Environment variable `{name}` is invalid: {reason}.")]
	InvalidEnv {
		/// Variable name.
		name: &'static str,
		/// Why the value was rejected.
		reason: String,
	},
	/// Delegated-helper server has no remote URL argument after its marker.
	#[error("Helper server `{server}` has no remote URL argument.")]
	MissingRemoteUrl {
		/// Server identifier.
		server: String,
	},
	/// Registration record lacks a token endpoint, so codes cannot be exchanged.
	#[error("Registration for server `{server}` has no token endpoint.")]
	MissingTokenEndpoint {
		/// Server identifier.
		server: String,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}

	pub(crate) fn invalid_url(value: impl Into<String>, source: url::ParseError) -> Self {
		Self::InvalidUrl { value: value.into(), source }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO, time boxes).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling a remote endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling a remote endpoint.")]
	Io(#[from] std::io::Error),
	/// The response body exceeded the transport's size limit.
	#[error("Response body exceeded {limit} bytes.")]
	BodyTooLarge {
		/// Limit in bytes.
		limit: usize,
	},
	/// The request exceeded its time box.
	#[error("{operation} timed out after {after:?}.")]
	TimedOut {
		/// Step that timed out.
		operation: &'static str,
		/// Time box that elapsed.
		after: StdDuration,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
