//! HTTP transport seam shared by discovery, registration, and token exchange.
//!
//! Every call goes through [`HttpTransport::execute_within`], which time-boxes the request so a
//! single unresponsive server cannot stall a flow. Transports must not follow redirects: path
//! probing inspects `Location` headers itself, and automatic redirects would bypass the SSRF
//! guard.

// crates.io
use oauth2::{
	AsyncHttpClient, HttpRequest, HttpResponse,
	http::{
		Method,
		header::{ACCEPT, CONTENT_TYPE},
	},
};
// self
use crate::{
	_prelude::*,
	error::{ConfigError, TransportError},
};

/// Boxed future returned by [`HttpTransport`] calls.
pub type HttpFuture<'a> =
	Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + 'a + Send>>;

/// Abstraction over the HTTP stack used for every outbound call.
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Executes a request without any time box.
	fn execute(&self, request: HttpRequest) -> HttpFuture<'_>;

	/// Executes a request, failing with [`TransportError::TimedOut`] after `timeout`.
	fn execute_within(
		&self,
		request: HttpRequest,
		timeout: StdDuration,
		operation: &'static str,
	) -> HttpFuture<'_> {
		let call = self.execute(request);

		Box::pin(async move {
			match tokio::time::timeout(timeout, call).await {
				Ok(result) => result,
				Err(_) => Err(TransportError::TimedOut { operation, after: timeout }),
			}
		})
	}
}

/// Largest response body a [`ReqwestTransport`] reads by default.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Reqwest-backed transport with redirects disabled and a bounded body read.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
	client: ReqwestClient,
	max_body_bytes: usize,
}
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Builds a client that never follows redirects.
	pub fn new() -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder().redirect(reqwest::redirect::Policy::none()).build()?;

		Ok(Self::with_client(client))
	}

	/// Wraps an existing client. Callers must disable redirect following themselves.
	pub fn with_client(client: ReqwestClient) -> Self {
		Self { client, max_body_bytes: DEFAULT_MAX_BODY_BYTES }
	}

	/// Overrides the response body limit.
	pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
		self.max_body_bytes = limit;

		self
	}
}
#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestTransport {
	fn execute(&self, request: HttpRequest) -> HttpFuture<'_> {
		Box::pin(async move {
			let mut response = self.client.execute(request.try_into()?).await?;
			let limit = self.max_body_bytes;

			if response.content_length().is_some_and(|len| len > limit as u64) {
				return Err(TransportError::BodyTooLarge { limit });
			}

			let status = response.status();
			let headers = response.headers().to_owned();
			let mut body = Vec::new();

			while let Some(chunk) = response.chunk().await? {
				if body.len() + chunk.len() > limit {
					return Err(TransportError::BodyTooLarge { limit });
				}

				body.extend_from_slice(&chunk);
			}

			let mut converted = HttpResponse::new(body);

			*converted.status_mut() = status;
			*converted.headers_mut() = headers;

			Ok(converted)
		})
	}
}

/// [`AsyncHttpClient`] adapter that lets the `oauth2` crate run through an [`HttpTransport`].
#[derive(Clone)]
pub struct OAuthHttpClient {
	transport: Arc<dyn HttpTransport>,
	timeout: StdDuration,
}
impl OAuthHttpClient {
	/// Wraps a transport; each token request is time-boxed by `timeout`.
	pub fn new(transport: Arc<dyn HttpTransport>, timeout: StdDuration) -> Self {
		Self { transport, timeout }
	}
}
impl<'c> AsyncHttpClient<'c> for OAuthHttpClient {
	type Error = TransportError;
	type Future = HttpFuture<'c>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		self.transport.execute_within(request, self.timeout, "Token exchange")
	}
}
impl Debug for OAuthHttpClient {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OAuthHttpClient").field("timeout", &self.timeout).finish()
	}
}

/// Builds a `GET` request that accepts JSON.
pub fn get_json(url: &Url) -> Result<HttpRequest, ConfigError> {
	Ok(oauth2::http::Request::builder()
		.method(Method::GET)
		.uri(url.as_str())
		.header(ACCEPT, "application/json")
		.body(Vec::new())?)
}

/// Builds a plain `GET` request with no content negotiation.
pub fn get(url: &Url) -> Result<HttpRequest, ConfigError> {
	Ok(oauth2::http::Request::builder().method(Method::GET).uri(url.as_str()).body(Vec::new())?)
}

/// Builds a `POST` request carrying a JSON body.
pub fn post_json(
	url: &Url,
	body: &serde_json::Value,
	accept: &str,
) -> Result<HttpRequest, ConfigError> {
	Ok(oauth2::http::Request::builder()
		.method(Method::POST)
		.uri(url.as_str())
		.header(CONTENT_TYPE, "application/json")
		.header(ACCEPT, accept)
		.body(body.to_string().into_bytes())?)
}

/// Returns a header value as a string, if present and valid UTF-8.
pub fn header_str<'a>(response: &'a HttpResponse, name: &str) -> Option<&'a str> {
	response.headers().get(name).and_then(|value| value.to_str().ok())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	struct Stalled;
	impl HttpTransport for Stalled {
		fn execute(&self, _: HttpRequest) -> HttpFuture<'_> {
			Box::pin(std::future::pending())
		}
	}

	#[tokio::test(start_paused = true)]
	async fn execute_within_times_out() {
		let request = get(&Url::parse("https://mcp.example.com").expect("URL should parse."))
			.expect("Request should build.");
		let err = Stalled
			.execute_within(request, StdDuration::from_secs(3), "Discovery probe")
			.await
			.expect_err("Stalled transport should time out.");

		assert!(matches!(err, TransportError::TimedOut { operation: "Discovery probe", .. }));
	}

	#[cfg(feature = "reqwest")]
	#[tokio::test]
	async fn oversized_bodies_are_refused() {
		let server = httpmock::MockServer::start_async().await;

		server
			.mock_async(|when, then| {
				when.method(httpmock::Method::GET).path("/big");
				then.status(200).body("x".repeat(64));
			})
			.await;
		server
			.mock_async(|when, then| {
				when.method(httpmock::Method::GET).path("/small");
				then.status(200).body("ok");
			})
			.await;

		let transport =
			ReqwestTransport::new().expect("Reqwest transport should build.").with_max_body_bytes(16);
		let big = get(&Url::parse(&server.url("/big")).expect("URL should parse."))
			.expect("Request should build.");
		let small = get(&Url::parse(&server.url("/small")).expect("URL should parse."))
			.expect("Request should build.");
		let err = transport.execute(big).await.expect_err("Oversized body should be refused.");
		let response = transport.execute(small).await.expect("Small body should be read.");

		assert!(matches!(err, TransportError::BodyTooLarge { limit: 16 }));
		assert_eq!(response.body(), b"ok");
	}

	#[test]
	fn post_json_sets_negotiation_headers() {
		let url = Url::parse("https://auth.example.com/register").expect("URL should parse.");
		let request = post_json(&url, &serde_json::json!({ "a": 1 }), "application/json")
			.expect("Request should build.");

		assert_eq!(*request.method(), Method::POST);
		assert_eq!(
			request.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()),
			Some("application/json")
		);
		assert_eq!(request.body(), br#"{"a":1}"#);
	}
}
