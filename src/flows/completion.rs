//! Callback half of the direct flow: state redemption, code exchange, and token storage.

// crates.io
use tokio::time::Instant;
// self
use crate::{
	_prelude::*,
	auth::ServerId,
	flows::{FlowLabels, Orchestrator, provider_label},
	http::OAuthHttpClient,
	oauth,
	obs::{FlowKind, FlowOutcome, FlowSpan},
};

impl Orchestrator {
	/// Redeems `state`, exchanges `code` at the recorded token endpoint, and stores the token.
	///
	/// Returns the server the credentials were stored for.
	pub async fn complete_authorization(&self, state: &str, code: &str) -> Result<ServerId> {
		let started = Instant::now();
		let mut labels = FlowLabels::default();
		let span = FlowSpan::new(FlowKind::Completion, "exchange");
		let result = span.instrument(self.complete(state, code, &mut labels, &span)).await;

		match &result {
			Ok(server_id) => {
				tracing::info!(server = %server_id, "Authorization completed.");
				self.record_metric(&labels, started, FlowOutcome::Authorized);
			},
			Err(e) => {
				tracing::warn!(error = %e, "Authorization completion failed.");
				self.record_metric(&labels, started, FlowOutcome::Failure);
			},
		}

		result
	}

	async fn complete(
		&self,
		state: &str,
		code: &str,
		labels: &mut FlowLabels,
		span: &FlowSpan,
	) -> Result<ServerId> {
		let row = self.pkce.redeem(state, OffsetDateTime::now_utc()).await?;

		span.record_server(row.server_id.as_str());

		let server = self
			.store
			.fetch_server(&row.server_id)
			.await?
			.ok_or_else(|| Error::server_not_found(&row.server_id))?;
		let registration =
			self.store.fetch_registration(&row.server_id).await?.ok_or_else(|| Error::NotFound {
				entity: "Registration",
				id: row.server_id.to_string(),
			})?;

		labels.server_type = server.transport.as_str();
		labels.provider = provider_label(&registration.authorization_server);

		if let Some(token_endpoint) = &registration.token_endpoint {
			self.config.ssrf_guard().validate(token_endpoint).await?;
		}

		let http = OAuthHttpClient::new(self.http.clone(), self.config.request_timeout);
		let grant = oauth::exchange_authorization_code(
			&registration,
			code,
			&row.code_verifier,
			&row.redirect_uri,
			&http,
		)
		.await?;

		self.store_token(&row.server_id, Some(&grant)).await?;

		Ok(row.server_id)
	}
}
