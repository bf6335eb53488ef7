//! Maps internal errors onto caller-safe categories and messages.
//!
//! Only fixed category text and scrubbed details cross this boundary: hostnames, IP literals,
//! URLs, secrets, and anything after the first line (stack traces, helper output) are removed.

// std
use std::net::{IpAddr, SocketAddr};
// self
use crate::{_prelude::*, error::Error};

const DETAIL_MAX_CHARS: usize = 160;
const SECRET_LIKE_MIN_LEN: usize = 24;
const SECRET_KEYS: &[&str] = &["secret", "token", "password", "passwd", "key", "code", "verifier"];

/// Error categories that are safe to show to end users.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
	/// Server or profile is missing.
	NotFound,
	/// Server transport cannot be authorized.
	UnsupportedServerType,
	/// A remote URL pointed at a blocked address.
	SsrfRejected,
	/// No OAuth configuration could be discovered.
	DiscoveryFailed,
	/// Dynamic registration failed (normally absorbed by the fallback client id).
	RegistrationFailed,
	/// PKCE state could not be stored.
	PkcePersistenceFailed,
	/// Helper process failed to start or exited early.
	ProcessSpawnFailed,
	/// No callback port was available.
	PortAllocationFailed,
	/// A bounded step timed out.
	Timeout,
	/// Server or orchestrator configuration needs attention.
	Configuration,
	/// Callback state was unknown, expired, or tampered with.
	StateRejected,
	/// Authorization succeeded but credentials were not saved.
	TokenPersistenceFailed,
	/// Authorization code exchange failed.
	TokenExchangeFailed,
	/// Anything else; details are withheld.
	Internal,
}
impl ErrorCategory {
	/// Returns a stable label suitable for logs and metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::NotFound => "not_found",
			Self::UnsupportedServerType => "unsupported_server_type",
			Self::SsrfRejected => "ssrf_rejected",
			Self::DiscoveryFailed => "discovery_failed",
			Self::RegistrationFailed => "registration_failed",
			Self::PkcePersistenceFailed => "pkce_persistence_failed",
			Self::ProcessSpawnFailed => "process_spawn_failed",
			Self::PortAllocationFailed => "port_allocation_failed",
			Self::Timeout => "timeout",
			Self::Configuration => "configuration",
			Self::StateRejected => "state_rejected",
			Self::TokenPersistenceFailed => "token_persistence_failed",
			Self::TokenExchangeFailed => "token_exchange_failed",
			Self::Internal => "internal",
		}
	}
}
impl Display for ErrorCategory {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Caller-facing error: a category plus a scrubbed message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicError {
	/// Stable error category.
	pub category: ErrorCategory,
	/// Scrubbed, user-actionable message.
	pub message: String,
}
impl Display for PublicError {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.message)
	}
}

/// Converts an internal error into its caller-safe representation.
pub fn sanitize(err: &Error) -> PublicError {
	let (category, message) = match err {
		Error::NotFound { .. } => (
			ErrorCategory::NotFound,
			"The server or its owning profile could not be found.".to_owned(),
		),
		Error::UnsupportedServerType { .. } => (
			ErrorCategory::UnsupportedServerType,
			"This server type does not support OAuth authorization.".to_owned(),
		),
		Error::SsrfRejected { reason, .. } => (
			ErrorCategory::SsrfRejected,
			format!("The server pointed authorization at a blocked network address ({reason})."),
		),
		Error::DiscoveryFailed { reason } => (
			ErrorCategory::DiscoveryFailed,
			with_detail(
				"The server requires authorization but no OAuth configuration could be discovered. Check the server URL.",
				reason,
			),
		),
		Error::KnownServerMisconfigured { hint } =>
			(ErrorCategory::Configuration, (*hint).to_owned()),
		Error::RegistrationFailed { .. } => (
			ErrorCategory::RegistrationFailed,
			"Client registration with the authorization server failed.".to_owned(),
		),
		Error::PkcePersistenceFailed { .. } => (
			ErrorCategory::PkcePersistenceFailed,
			"The authorization request could not be prepared. Please retry.".to_owned(),
		),
		Error::StateRejected { .. } => (
			ErrorCategory::StateRejected,
			"The authorization request expired or is invalid. Start the authorization again."
				.to_owned(),
		),
		Error::ProcessSpawnFailed { .. } => (
			ErrorCategory::ProcessSpawnFailed,
			"The OAuth helper process could not be started. Check that its command is installed."
				.to_owned(),
		),
		Error::ProcessExited { reason } => (
			ErrorCategory::ProcessSpawnFailed,
			with_detail("The OAuth helper process exited before authorization completed.", reason),
		),
		Error::PortAllocationFailed(_) => (
			ErrorCategory::PortAllocationFailed,
			"No local callback port is available. Retry after other authorizations finish."
				.to_owned(),
		),
		Error::Timeout { operation, .. } => (
			ErrorCategory::Timeout,
			format!("{operation} timed out. The server may be unreachable; retry later."),
		),
		Error::TokenPersistence { .. } => (
			ErrorCategory::TokenPersistenceFailed,
			"Authorization succeeded but the credentials could not be saved. Retry or contact an administrator."
				.to_owned(),
		),
		Error::TokenExchange { reason } => (
			ErrorCategory::TokenExchangeFailed,
			with_detail("The authorization server rejected the code exchange.", reason),
		),
		Error::Config(_) | Error::Decryption(_) => (
			ErrorCategory::Configuration,
			"The orchestrator or server configuration is invalid.".to_owned(),
		),
		Error::Storage(_) | Error::Transport(_) =>
			(ErrorCategory::Internal, "An internal error occurred. Please retry.".to_owned()),
	};

	PublicError { category, message }
}

/// Scrubs free-form detail text before it is appended to a public message.
///
/// Keeps the first non-empty line only, then replaces URLs, socket or IP literals, dotted
/// hostnames, `key=value` pairs with secret-looking keys, and long token-like runs.
pub fn sanitize_detail(raw: &str) -> String {
	let line = raw.lines().map(str::trim).find(|line| !line.is_empty()).unwrap_or_default();
	let mut out = line.split_whitespace().map(scrub_word).collect::<Vec<_>>().join(" ");

	if out.chars().count() > DETAIL_MAX_CHARS {
		out = out.chars().take(DETAIL_MAX_CHARS).collect();
		out.push('…');
	}

	out
}

fn with_detail(base: &str, detail: &str) -> String {
	let detail = sanitize_detail(detail);

	if detail.is_empty() { base.to_owned() } else { format!("{base} Detail: {detail}") }
}

fn scrub_word(word: &str) -> String {
	let core = word.trim_end_matches(['.', ',', ';', ':', ')', ']', '"', '\'']);
	let tail = &word[core.len()..];
	let core = core.trim_start_matches(['(', '[', '"', '\'']);

	if core.is_empty() {
		return word.to_owned();
	}

	let replaced = if core.contains("://") {
		"<url>".to_owned()
	} else if core.parse::<IpAddr>().is_ok() || core.parse::<SocketAddr>().is_ok() {
		"<address>".to_owned()
	} else if let Some((key, _)) = core.split_once('=') {
		let lowered = key.to_ascii_lowercase();

		if SECRET_KEYS.iter().any(|needle| lowered.contains(needle)) {
			format!("{key}=<redacted>")
		} else {
			core.to_owned()
		}
	} else if looks_like_secret(core) {
		"<redacted>".to_owned()
	} else if looks_like_hostname(core) {
		"<host>".to_owned()
	} else {
		core.to_owned()
	};

	format!("{replaced}{tail}")
}

fn looks_like_secret(word: &str) -> bool {
	word.len() >= SECRET_LIKE_MIN_LEN
		&& word.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+' | '/'))
		&& word.chars().any(|c| c.is_ascii_digit())
}

fn looks_like_hostname(word: &str) -> bool {
	let host = word.split(':').next().unwrap_or(word);
	let labels = host.split('.').collect::<Vec<_>>();

	labels.len() >= 2
		&& labels.iter().all(|label| {
			!label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
		})
		&& labels.last().is_some_and(|tld| tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic()))
}
