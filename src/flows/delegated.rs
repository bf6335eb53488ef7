//! Strategy for servers whose OAuth runs inside a helper process.

// self
use crate::{
	_prelude::*,
	flows::{FlowLabels, Orchestrator, TriggerOutcome, provider_label},
	launcher::{CommandSpec, HelperSignal, LaunchRequest},
	obs::{FlowKind, FlowSpan},
	server::DecryptedServer,
};

impl Orchestrator {
	pub(super) async fn delegated(
		&self,
		server: &DecryptedServer,
		program: String,
		remote_url: Url,
		labels: &mut FlowLabels,
	) -> Result<TriggerOutcome> {
		let record = &server.record;
		let span = FlowSpan::new(FlowKind::ProcessDelegated, "launch");

		span.record_server(record.id.as_str());
		labels.provider = provider_label(remote_url.as_str());

		let request = LaunchRequest {
			server_name: record.name.clone(),
			server_id: record.id.clone(),
			remote_url,
			command: CommandSpec { program, args: record.args.clone(), env: server.env.clone() },
		};
		let launcher = self.launcher();
		let launched = span.instrument(launcher.launch(&request)).await?;

		match launched.signal {
			HelperSignal::AuthorizationUrl(url) => {
				let provider = labels.provider.clone();

				self.patch_server(&record.id, |record| {
					record.mark_initiated(&provider, OffsetDateTime::now_utc())
				})
				.await?;

				Ok(TriggerOutcome::AuthorizationRequired { url })
			},
			// The helper keeps its own credential cache; a printed token is stored as well.
			HelperSignal::Completed(grant) => {
				self.store_token(&record.id, grant.as_ref()).await?;

				Ok(TriggerOutcome::Authorized)
			},
		}
	}
}
