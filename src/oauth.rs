//! Authorization-code exchange through the `oauth2` crate.

pub use oauth2;

// crates.io
use oauth2::{
	AuthUrl, AuthorizationCode, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
	PkceCodeVerifier, RedirectUrl, RequestTokenError, TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicRequestTokenError, BasicTokenResponse},
};
// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenGrant, TokenSecret},
	error::{ConfigError, TransportError},
	http::OAuthHttpClient,
	registration::RegistrationRecord,
};

type ConfiguredBasicClient =
	BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Builds an `oauth2` client for a cached registration.
pub(crate) fn client_for(
	registration: &RegistrationRecord,
	redirect_uri: &Url,
) -> Result<ConfiguredBasicClient> {
	let token_endpoint = registration.token_endpoint.as_ref().ok_or_else(|| {
		ConfigError::MissingTokenEndpoint { server: registration.server_id.to_string() }
	})?;
	let auth_url = AuthUrl::new(registration.authorization_endpoint.to_string())
		.map_err(|e| ConfigError::invalid_url(registration.authorization_endpoint.as_str(), e))?;
	let token_url = TokenUrl::new(token_endpoint.to_string())
		.map_err(|e| ConfigError::invalid_url(token_endpoint.as_str(), e))?;
	let redirect_url = RedirectUrl::new(redirect_uri.to_string())
		.map_err(|e| ConfigError::invalid_url(redirect_uri.as_str(), e))?;
	let mut client = BasicClient::new(ClientId::new(registration.client_id.clone()))
		.set_auth_uri(auth_url)
		.set_token_uri(token_url)
		.set_redirect_uri(redirect_url);

	if let Some(secret) = &registration.client_secret {
		client = client.set_client_secret(ClientSecret::new(secret.expose().to_owned()));
	}

	Ok(client)
}

/// Exchanges an authorization code (with its PKCE verifier) for a token grant.
pub(crate) async fn exchange_authorization_code(
	registration: &RegistrationRecord,
	code: &str,
	verifier: &TokenSecret,
	redirect_uri: &Url,
	http: &OAuthHttpClient,
) -> Result<TokenGrant> {
	let client = client_for(registration, redirect_uri)?;
	let mut request = client
		.exchange_code(AuthorizationCode::new(code.to_owned()))
		.set_pkce_verifier(PkceCodeVerifier::new(verifier.expose().to_owned()));

	if let Some(resource) = &registration.resource_identifier {
		request = request.add_extra_param("resource", resource.clone());
	}

	let response = request.request_async(http).await.map_err(map_request_error)?;

	Ok(grant_from_response(&response))
}

fn grant_from_response(response: &BasicTokenResponse) -> TokenGrant {
	let mut grant = TokenGrant::bearer(response.access_token().secret().to_owned())
		.with_token_type(response.token_type().as_ref());

	if let Some(refresh) = response.refresh_token() {
		grant = grant.with_refresh_token(refresh.secret().to_owned());
	}
	if let Some(expires_at) = response
		.expires_in()
		.and_then(|d| Duration::try_from(d).ok())
		.and_then(|lifetime| OffsetDateTime::now_utc().checked_add(lifetime))
	{
		grant = grant.with_expires_at(expires_at);
	}
	if let Some(scope) = response
		.scopes()
		.and_then(|scopes| ScopeSet::new(scopes.iter().map(|s| s.as_str().to_owned())).ok())
	{
		grant = grant.with_scope(scope);
	}

	grant
}

fn map_request_error(err: BasicRequestTokenError<TransportError>) -> Error {
	match err {
		RequestTokenError::ServerResponse(response) => server_response_error(&response),
		RequestTokenError::Request(error) => error.into(),
		RequestTokenError::Parse(error, _body) => Error::TokenExchange {
			reason: format!("unparseable token response at `{}`", error.path()),
		},
		RequestTokenError::Other(message) => Error::TokenExchange { reason: message },
	}
}

fn server_response_error(response: &BasicErrorResponse) -> Error {
	let reason = match response.error_description() {
		Some(description) => format!("{}: {description}", response.error().as_ref()),
		None => response.error().as_ref().to_owned(),
	};

	Error::TokenExchange { reason }
}
