//! Recognizes authorization links and completion reports in helper output.

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenGrant},
	discovery::heuristics,
};

const COMPLETION_PHRASES: &[&str] = &[
	"authorization complete",
	"authentication complete",
	"successfully authorized",
	"successfully authenticated",
	"tokens saved",
	"connected to remote server",
	"proxy established",
];

/// Result reported by a helper process.
#[derive(Clone, Debug)]
pub enum HelperSignal {
	/// The user must open this URL to finish authorizing.
	AuthorizationUrl(Url),
	/// The helper finished; the token is present when it printed one.
	Completed(Option<TokenGrant>),
}

#[derive(Deserialize)]
struct PrintedToken {
	access_token: String,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	token_type: Option<String>,
	#[serde(default)]
	expires_in: Option<i64>,
	#[serde(default)]
	scope: Option<String>,
}
impl PrintedToken {
	fn into_grant(self) -> TokenGrant {
		let mut grant = TokenGrant::bearer(self.access_token);

		if let Some(refresh) = self.refresh_token {
			grant = grant.with_refresh_token(refresh);
		}
		if let Some(kind) = self.token_type {
			grant = grant.with_token_type(kind);
		}
		if let Some(expires_at) = self
			.expires_in
			.filter(|secs| *secs > 0)
			.and_then(|secs| OffsetDateTime::now_utc().checked_add(Duration::seconds(secs)))
		{
			grant = grant.with_expires_at(expires_at);
		}
		if let Some(scope) = self.scope.and_then(|raw| ScopeSet::new(raw.split_whitespace()).ok()) {
			grant = grant.with_scope(scope);
		}

		grant
	}
}

/// Parses one output line.
pub fn parse_line(line: &str) -> Option<HelperSignal> {
	let line = line.trim();

	if line.is_empty() {
		return None;
	}
	if let Ok(token) = serde_json::from_str::<PrintedToken>(line) {
		return Some(HelperSignal::Completed(Some(token.into_grant())));
	}
	if let Some(url) = authorization_url(line) {
		return Some(HelperSignal::AuthorizationUrl(url));
	}

	let lowered = line.to_ascii_lowercase();

	COMPLETION_PHRASES
		.iter()
		.any(|phrase| lowered.contains(phrase))
		.then_some(HelperSignal::Completed(None))
}

fn authorization_url(line: &str) -> Option<Url> {
	line.split_whitespace()
		.map(|word| word.trim_matches(|c: char| matches!(c, '"' | '\'' | '<' | '>' | '(' | ')' | ',')))
		.filter(|word| word.starts_with("http://") || word.starts_with("https://"))
		.filter_map(|word| Url::parse(word).ok())
		.find(|url| !is_loopback(url) && looks_like_authorization(url))
}

// The helper's own callback listener is not an authorization link.
fn is_loopback(url: &Url) -> bool {
	match url.host() {
		Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
		Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
		Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
		None => true,
	}
}

fn looks_like_authorization(url: &Url) -> bool {
	heuristics::looks_like_oauth(url)
		|| url.query_pairs().any(|(name, _)| name == "response_type" || name == "client_id")
}
