//! RFC 9728 protected-resource and RFC 8414 authorization-server metadata documents.

// crates.io
use serde::de::DeserializeOwned;
// self
use crate::_prelude::*;

/// Well-known suffix for protected-resource metadata.
pub const PROTECTED_RESOURCE_SUFFIX: &str = "oauth-protected-resource";
/// Well-known suffix for authorization-server metadata.
pub const AUTHORIZATION_SERVER_SUFFIX: &str = "oauth-authorization-server";
/// Well-known suffix for OpenID Connect provider configuration.
pub const OPENID_CONFIGURATION_SUFFIX: &str = "openid-configuration";

/// Authorization-server metadata; only `authorization_endpoint` is required.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationServerMetadata {
	/// Issuer identifier.
	#[serde(default)]
	pub issuer: Option<String>,
	/// Authorization endpoint.
	pub authorization_endpoint: Url,
	/// Token endpoint.
	#[serde(default)]
	pub token_endpoint: Option<Url>,
	/// RFC 7591 registration endpoint.
	#[serde(default)]
	pub registration_endpoint: Option<Url>,
	/// Advertised scopes.
	#[serde(default)]
	pub scopes_supported: Option<Vec<String>>,
	/// Advertised PKCE challenge methods.
	#[serde(default)]
	pub code_challenge_methods_supported: Option<Vec<String>>,
}
impl AuthorizationServerMetadata {
	/// Returns true when `S256` is advertised.
	pub fn supports_s256(&self) -> bool {
		self.code_challenge_methods_supported
			.as_ref()
			.is_some_and(|methods| methods.iter().any(|m| m == "S256"))
	}
}

/// Protected-resource metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
	/// Resource identifier (RFC 8707 `resource` value).
	#[serde(default)]
	pub resource: Option<String>,
	/// Authorization servers protecting the resource, most preferred first.
	#[serde(default)]
	pub authorization_servers: Vec<String>,
	/// Scopes the resource understands.
	#[serde(default)]
	pub scopes_supported: Option<Vec<String>>,
}

/// Parses a JSON document, reporting the failing field path on error.
pub fn parse_document<T>(body: &[u8]) -> Result<T, String>
where
	T: DeserializeOwned,
{
	serde_path_to_error::deserialize(&mut serde_json::Deserializer::from_slice(body))
		.map_err(|e| format!("malformed metadata at `{}`", e.path()))
}

/// Splits a `WWW-Authenticate` challenge into lower-cased parameter names and unquoted values.
///
/// The scheme token is skipped. Quoted values may contain commas.
pub fn challenge_params(header: &str) -> Vec<(String, String)> {
	let mut rest = header.trim();

	// Skip the auth scheme when it is followed by parameters.
	match rest.split_once(char::is_whitespace) {
		Some((scheme, tail)) if !scheme.contains('=') => rest = tail,
		_ => {},
	}

	let mut params = Vec::new();

	while !rest.is_empty() {
		rest = rest.trim_start_matches([',', ' ', '\t']);

		let Some((name, tail)) = rest.split_once('=') else { break };
		let name = name.trim().to_ascii_lowercase();
		let tail = tail.trim_start();
		let (value, remainder) = if let Some(quoted) = tail.strip_prefix('"') {
			match quoted.find('"') {
				Some(end) => (&quoted[..end], &quoted[end + 1..]),
				None => (quoted, ""),
			}
		} else {
			match tail.find(',') {
				Some(end) => (tail[..end].trim(), &tail[end..]),
				None => (tail.trim(), ""),
			}
		};

		if !name.is_empty() {
			params.push((name, value.to_owned()));
		}

		rest = remainder;
	}

	params
}

/// Returns the `resource_metadata` URL advertised in a `WWW-Authenticate` challenge.
pub fn resource_metadata_url(header: &str) -> Option<Url> {
	challenge_params(header)
		.into_iter()
		.find(|(name, _)| name == "resource_metadata")
		.and_then(|(_, value)| Url::parse(&value).ok())
}

/// Builds RFC 8615 well-known URLs for `base`: the path-aware form first, then the root form.
pub fn well_known_urls(base: &Url, suffix: &str) -> Vec<Url> {
	let path = base.path().trim_end_matches('/');
	let mut candidates = Vec::with_capacity(2);

	if !path.is_empty() {
		let mut url = base.clone();

		url.set_path(&format!("/.well-known/{suffix}{path}"));
		url.set_query(None);
		url.set_fragment(None);
		candidates.push(url);
	}

	let mut root = base.clone();

	root.set_path(&format!("/.well-known/{suffix}"));
	root.set_query(None);
	root.set_fragment(None);
	candidates.push(root);

	candidates
}

/// Candidate metadata URLs for an authorization-server issuer, in RFC 8414 order.
pub fn authorization_server_urls(issuer: &Url) -> Vec<Url> {
	let mut candidates = well_known_urls(issuer, AUTHORIZATION_SERVER_SUFFIX);

	candidates.extend(well_known_urls(issuer, OPENID_CONFIGURATION_SUFFIX));

	let path = issuer.path().trim_end_matches('/');

	// OpenID Connect Discovery appends the suffix to the issuer path instead.
	if !path.is_empty() {
		let mut appended = issuer.clone();

		appended.set_path(&format!("{path}/.well-known/{OPENID_CONFIGURATION_SUFFIX}"));
		appended.set_query(None);
		candidates.push(appended);
	}

	candidates.dedup();

	candidates
}
