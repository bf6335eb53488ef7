//! Strategy for HTTP servers: discovery, client registration, and the PKCE authorization URL.

// self
use crate::{
	_prelude::*,
	auth::{ServerId, UserId},
	discovery::{DiscoveryOutcome, DiscoveryResult},
	flows::{FlowLabels, Orchestrator, TriggerOutcome, provider_label},
	obs::{FlowKind, FlowSpan},
	registration::{ClientCredentials, RegistrationRecord},
	server::{DecryptedServer, REQUIRES_AUTH},
};

impl Orchestrator {
	pub(super) async fn direct(
		&self,
		server: &DecryptedServer,
		user_id: &UserId,
		url: Url,
		labels: &mut FlowLabels,
	) -> Result<TriggerOutcome> {
		let server_id = &server.record.id;
		let span = FlowSpan::new(FlowKind::DirectHttp, "discovery");

		span.record_server(server_id.as_str());

		let discovery = match span.instrument(self.discoverer.discover(&url)).await? {
			DiscoveryOutcome::OkWithoutAuth => {
				self.patch_server(server_id, |record| record.patch_config(REQUIRES_AUTH, false))
					.await?;

				return Ok(TriggerOutcome::NotRequired);
			},
			DiscoveryOutcome::ServerError { status } =>
				return Err(Error::DiscoveryFailed {
					reason: format!("server answered the MCP handshake with HTTP {status}"),
				}),
			DiscoveryOutcome::Discovered(discovery) => discovery,
		};

		if let Some(auth_server) = &discovery.auth_server {
			labels.provider = provider_label(auth_server);
		}

		let stored = self.store.fetch_registration(server_id).await?;
		let credentials =
			span.instrument(self.credentials_for(server_id, &discovery, stored.as_ref())).await;
		let registration = RegistrationRecord::from_discovery(server_id, &discovery, &credentials)
			.ok_or_else(|| Error::DiscoveryFailed {
				reason: "discovery produced no authorization endpoint".into(),
			})?;

		if !stored.as_ref().is_some_and(|stored| stored.same_as(&registration)) {
			self.store.save_registration(registration.clone()).await?;
		}

		let request = self
			.pkce
			.build_authorization_request(&discovery, &registration, server_id, user_id)
			.await?;

		tracing::debug!(
			server = %server_id,
			method = discovery.method.as_str(),
			pkce = request.pkce,
			"Built authorization request."
		);
		self.patch_server(server_id, |record| {
			record.mark_initiated(&registration.authorization_server, OffsetDateTime::now_utc())
		})
		.await?;

		Ok(TriggerOutcome::AuthorizationRequired { url: request.url })
	}

	// Registration failures degrade to the configured generic client id.
	async fn credentials_for(
		&self,
		server_id: &ServerId,
		discovery: &DiscoveryResult,
		stored: Option<&RegistrationRecord>,
	) -> ClientCredentials {
		let fallback = || ClientCredentials::fallback(&self.config.fallback_client_id);
		let existing =
			stored.map(RegistrationRecord::credentials).filter(|c| c.dynamically_registered);
		let Some(endpoint) =
			discovery.metadata.as_ref().and_then(|m| m.registration_endpoint.as_ref())
		else {
			return existing.unwrap_or_else(fallback);
		};
		// Credentials issued by a different registration endpoint are not reused.
		let force =
			stored.is_some_and(|stored| stored.registration_endpoint.as_ref() != Some(endpoint));

		match self
			.registrar
			.get_or_register(server_id, endpoint, &self.config.redirect_uri, existing.as_ref(), force)
			.await
		{
			Ok(credentials) => credentials,
			Err(e) => {
				tracing::warn!(
					server = %server_id,
					error = %e,
					"Dynamic client registration failed; using the fallback client id."
				);

				fallback()
			},
		}
	}
}
