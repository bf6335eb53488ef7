#![cfg(feature = "test")]

// self
use mcp_oauth_orchestrator::{
	_preludet::*,
	error::ErrorCategory,
	flows::{Orchestrator, REFRESH_TOKEN_ENV_KEY, TriggerOutcome},
	launcher::Sandbox,
	obs::FlowOutcome,
	port::PortAllocator,
	server::{FieldCipher, HEADERS, OAUTH_PROVIDER, ServerRecord},
	store::MemoryStore,
};

const REMOTE: &str = "https://mcp.example.com/sse";

fn orchestrator(
	servers: impl IntoIterator<Item = ServerRecord>,
	spawner: &ScriptedSpawner,
	sink: &RecordingSink,
) -> (Orchestrator, Arc<MemoryStore>) {
	let store = seeded_store(servers);
	let orchestrator = Orchestrator::new(
		test_config(),
		store.clone(),
		Arc::new(ReversibleCipher::default()),
		Arc::new(ScriptedTransport::default()),
	)
	.with_spawner(Arc::new(spawner.clone()))
	.with_port_allocator(Arc::new(PortAllocator::new(51000..=51010).with_bind_check(false)))
	.with_sandbox(Sandbox::disabled())
	.with_metrics_sink(Arc::new(sink.clone()));

	(orchestrator, store)
}

#[tokio::test(start_paused = true)]
async fn printed_url_is_returned_and_the_port_is_released_after_the_grace_window() {
	let spawner = ScriptedSpawner::emitting([
		"Please authorize this client by visiting:",
		"https://auth.example.com/oauth/authorize?response_type=code&client_id=helper",
	])
	.hanging();
	let sink = RecordingSink::default();
	let (orchestrator, store) = orchestrator([helper_server("srv-helper", REMOTE)], &spawner, &sink);
	let response = orchestrator.trigger_oauth(&server_id("srv-helper")).await;

	assert!(response.success);
	assert_eq!(
		response.oauth_url.as_ref().map(Url::as_str),
		Some("https://auth.example.com/oauth/authorize?response_type=code&client_id=helper")
	);
	assert!(response.error.is_none());
	assert_eq!(orchestrator.ports().active_count(), 1);

	let record = store.server(&server_id("srv-helper")).expect("Server should still exist.");

	assert_eq!(record.config_value(OAUTH_PROVIDER), Some(&serde_json::json!("mcp.example.com")));

	let events = sink.events();

	assert_eq!(events[0].outcome, FlowOutcome::Pending);
	assert_eq!(events[0].provider, "mcp.example.com");
	assert_eq!(events[0].server_type, "stdio");

	tokio::time::sleep(StdDuration::from_secs(6)).await;

	assert_eq!(orchestrator.ports().active_count(), 0);
	assert_eq!(spawner.terminations(), 1);
}

#[tokio::test]
async fn printed_tokens_are_stored_in_the_encrypted_env() {
	let spawner = ScriptedSpawner::emitting([
		r#"{"access_token":"helper-at","refresh_token":"helper-rt","token_type":"bearer"}"#,
	]);
	let sink = RecordingSink::default();
	let (orchestrator, store) = orchestrator([helper_server("srv-helper", REMOTE)], &spawner, &sink);
	let outcome = orchestrator
		.try_trigger_oauth(&server_id("srv-helper"))
		.await
		.expect("Trigger should succeed.");

	assert_eq!(outcome, TriggerOutcome::Authorized);

	let record = store.server(&server_id("srv-helper")).expect("Server should still exist.");
	let env = ReversibleCipher::default()
		.decrypt(record.encrypted_env.as_deref().expect("Token should be encrypted into env."))
		.expect("Env should decrypt.");

	assert_eq!(env.get("OAUTH_ACCESS_TOKEN").map(String::as_str), Some("helper-at"));
	assert_eq!(env.get(REFRESH_TOKEN_ENV_KEY).map(String::as_str), Some("helper-rt"));
	assert_eq!(record.requires_auth(), Some(false));
	assert!(record.config_value(HEADERS).is_none());
	assert_eq!(sink.events()[0].outcome, FlowOutcome::Authorized);
}

#[tokio::test]
async fn spawn_failures_are_sanitized_even_when_the_sink_fails() {
	let spawner = ScriptedSpawner::failing();
	let sink = RecordingSink::failing();
	let (orchestrator, _) = orchestrator([helper_server("srv-helper", REMOTE)], &spawner, &sink);
	let response = orchestrator.trigger_oauth(&server_id("srv-helper")).await;
	let error = response.error.expect("Failed triggers should carry an error.");

	assert!(!response.success);
	assert!(response.oauth_url.is_none());
	assert_eq!(error.category, ErrorCategory::ProcessSpawnFailed);
	assert!(!error.message.contains("program not found"));
	assert_eq!(orchestrator.ports().active_count(), 0);
	assert_eq!(sink.events()[0].outcome, FlowOutcome::Failure);
}

#[tokio::test]
async fn unsupported_and_missing_servers_fail_without_spawning() {
	let spawner = ScriptedSpawner::emitting(["tokens saved"]);
	let sink = RecordingSink::default();
	let plain = ServerRecord::stdio(server_id("srv-plain"), profile_id(TEST_PROFILE), "python", [
		"server.py",
	]);
	let (orchestrator, _) = orchestrator([plain], &spawner, &sink);
	let unsupported = orchestrator.trigger_oauth(&server_id("srv-plain")).await;
	let missing = orchestrator.trigger_oauth(&server_id("srv-missing")).await;

	assert_eq!(
		unsupported.error.map(|e| e.category),
		Some(ErrorCategory::UnsupportedServerType)
	);
	assert_eq!(missing.error.map(|e| e.category), Some(ErrorCategory::NotFound));
	assert!(spawner.spawned().is_empty());
}

#[tokio::test]
async fn concurrent_launches_get_distinct_ports() {
	let spawner = ScriptedSpawner::emitting(["https://auth.example.com/authorize?client_id=helper"])
		.hanging();
	let sink = RecordingSink::default();
	let (orchestrator, _) = orchestrator(
		[helper_server("srv-a", REMOTE), helper_server("srv-b", "https://other.example.com/sse")],
		&spawner,
		&sink,
	);
	let (id_a, id_b) = (server_id("srv-a"), server_id("srv-b"));
	let (a, b) =
		tokio::join!(orchestrator.trigger_oauth(&id_a), orchestrator.trigger_oauth(&id_b),);

	assert!(a.success && b.success);

	let ports = spawner.spawned().into_iter().map(|spec| spec.args[3].clone()).collect::<Vec<_>>();

	assert_eq!(ports.len(), 2);
	assert_ne!(ports[0], ports[1]);
	assert_eq!(orchestrator.ports().active_count(), 2);
}
