//! Best-effort extraction of authorization URLs from challenge responses that carry no
//! standard metadata.

// crates.io
use oauth2::HttpResponse;
// self
use crate::{_prelude::*, discovery::metadata, http};

/// Conventional authorization paths probed as a last resort.
pub const PROBE_PATHS: &[&str] = &["/authorize", "/oauth/authorize", "/oauth2/authorize"];

/// Vendor headers known to carry an authorization URL.
const URL_HEADERS: &[&str] =
	&["x-oauth-authorization-url", "x-authorization-url", "x-auth-url", "x-oauth-url"];
const AUTH_TOKENS: &[&str] = &["authorize", "oauth", "auth", "login", "consent", "sso"];
const MAX_JSON_DEPTH: usize = 8;

/// Returns true when the URL's path or query mentions an authorization-related token.
pub fn looks_like_oauth(url: &Url) -> bool {
	let haystack =
		format!("{}?{}", url.path(), url.query().unwrap_or_default()).to_ascii_lowercase();

	AUTH_TOKENS.iter().any(|token| haystack.contains(token))
}

/// Finds an authorization URL in `WWW-Authenticate` parameters or vendor headers.
pub fn url_from_headers(response: &HttpResponse) -> Option<Url> {
	let from_challenge = response
		.headers()
		.get_all("www-authenticate")
		.iter()
		.filter_map(|value| value.to_str().ok())
		.flat_map(metadata::challenge_params)
		.filter(|(name, _)| name != "resource_metadata")
		.find_map(|(_, value)| oauth_url(&value));

	from_challenge.or_else(|| {
		URL_HEADERS.iter().find_map(|name| http::header_str(response, name).and_then(oauth_url))
	})
}

/// Finds an authorization URL in a JSON or event-stream body.
pub fn url_from_body(body: &[u8]) -> Option<Url> {
	let text = std::str::from_utf8(body).ok()?;

	if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
		return url_from_json(&value, 0);
	}

	text.lines()
		.filter_map(|line| line.strip_prefix("data:"))
		.filter_map(|data| serde_json::from_str::<serde_json::Value>(data.trim()).ok())
		.find_map(|value| url_from_json(&value, 0))
}

/// Resolves a probe response into an authorization URL, if it looks like one.
///
/// Redirects are accepted when their `Location` looks like OAuth; a `200` is accepted when
/// the probed URL itself does.
pub fn url_from_probe(probe: &Url, response: &HttpResponse) -> Option<Url> {
	let status = response.status();

	if status.is_redirection() {
		return http::header_str(response, "location")
			.and_then(|location| probe.join(location).ok())
			.filter(|location| is_http(location) && looks_like_oauth(location));
	}
	if status.as_u16() == 200 && looks_like_oauth(probe) {
		return Some(probe.clone());
	}

	None
}

fn url_from_json(value: &serde_json::Value, depth: usize) -> Option<Url> {
	if depth > MAX_JSON_DEPTH {
		return None;
	}

	match value {
		serde_json::Value::String(raw) => oauth_url(raw),
		serde_json::Value::Array(items) => items.iter().find_map(|v| url_from_json(v, depth + 1)),
		serde_json::Value::Object(map) => map.values().find_map(|v| url_from_json(v, depth + 1)),
		_ => None,
	}
}

fn oauth_url(raw: &str) -> Option<Url> {
	Url::parse(raw.trim()).ok().filter(|url| is_http(url) && looks_like_oauth(url))
}

fn is_http(url: &Url) -> bool {
	matches!(url.scheme(), "http" | "https")
}
