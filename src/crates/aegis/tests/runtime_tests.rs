//! Runtime lifecycle tests: phased init, processing, coordinated shutdown.

use aegis::adapters::{Adapter, AdapterServiceRegistration, CliAdapter};
use aegis::config::{AppConfig, LlmProviderKind};
use aegis::runtime::{AegisRuntime, InitPhase};
use engine::buses::capabilities;
use engine::registry::ProviderHandle;
use engine::schemas::{ChannelContext, GraphScope, NodeType};
use engine::services::CommunicationService;
use engine::shutdown::ShutdownCoordinator;
use engine::testing::RecordingComm;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;
use tooling::config::EnvLoader;

/// Adapter wrapping the recording comm service for assertions
struct RecordingAdapter {
    comm: Arc<RecordingComm>,
}

#[async_trait]
impl Adapter for RecordingAdapter {
    fn kind(&self) -> &str {
        "test"
    }

    async fn start(&self) -> engine::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> engine::Result<()> {
        Ok(())
    }

    async fn run_lifecycle(&self, shutdown: ShutdownCoordinator) -> engine::Result<()> {
        shutdown.wait_for_shutdown().await;
        Ok(())
    }

    fn get_services_to_register(&self) -> Vec<AdapterServiceRegistration> {
        vec![AdapterServiceRegistration {
            name: "recording".to_string(),
            priority: 0,
            capabilities: vec![capabilities::SEND_MESSAGE.to_string()],
            provider: ProviderHandle::Communication(self.comm.clone()),
        }]
    }

    fn get_channel_list(&self) -> Vec<ChannelContext> {
        self.comm.channel_list()
    }

    fn get_channel_info(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("adapter".to_string(), "test".to_string())])
    }
}

fn test_config(dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::default();
    config.database.db_path = dir.path().join("aegis_engine.db");
    config.database.secrets_db_path = dir.path().join("secrets.db");
    config.database.audit_db_path = dir.path().join("aegis_audit.db");
    config.llm.provider = LlmProviderKind::Mock;
    config.channels.home_channel_id = "test_channel".to_string();
    config.channels.deferral_channel_id = "deferral_channel".to_string();
    config.workflow.round_delay_secs = Some(0.0);
    config
}

fn test_runtime(dir: &TempDir) -> (AegisRuntime, Arc<RecordingComm>) {
    let comm = Arc::new(RecordingComm::default());
    let adapter: Arc<dyn Adapter> = Arc::new(RecordingAdapter { comm: comm.clone() });
    let runtime = AegisRuntime::new(test_config(dir), EnvLoader::new(), vec![adapter], None);
    (runtime, comm)
}

#[tokio::test]
async fn test_initialize_runs_all_seven_phases() {
    let dir = TempDir::new().unwrap();
    let (mut runtime, _comm) = test_runtime(&dir);

    runtime.initialize().await.unwrap();
    assert!(runtime.is_initialized());

    let phases: Vec<InitPhase> = runtime.completed_steps().iter().map(|s| s.phase).collect();
    assert_eq!(
        phases,
        vec![
            InitPhase::Infrastructure,
            InitPhase::Database,
            InitPhase::Memory,
            InitPhase::Identity,
            InitPhase::Security,
            InitPhase::Services,
            InitPhase::Components,
        ]
    );

    // Identity created from the template on first run
    let identity = runtime.identity().unwrap();
    assert_eq!(identity.agent_id, "aegis");
    assert!(identity.verify_hash());

    // Security phase issued the adapter its authentication token (the
    // bootstrap probe token is revoked again)
    assert_eq!(runtime.auth().unwrap().token_count(), 1);

    // Service phase stood up the operational services empty
    assert_eq!(runtime.scheduler().unwrap().pending_count(), 0);
    assert_eq!(runtime.incidents().unwrap().count(), 0);
    assert!(runtime.self_observation().unwrap().last_summary().is_none());
    assert!(runtime.visibility().is_some());
}

#[tokio::test]
async fn test_scheduled_entry_becomes_completed_task() {
    let dir = TempDir::new().unwrap();
    let (mut runtime, _comm) = test_runtime(&dir);

    runtime.initialize().await.unwrap();

    // Due immediately: the scheduler loop turns it into a task on its
    // first poll, and the work rounds complete it
    let scheduler = runtime.scheduler().unwrap().clone();
    scheduler
        .schedule(
            "scheduled greeting",
            "test_channel",
            1,
            chrono::Utc::now() - chrono::Duration::seconds(1),
        )
        .unwrap();

    runtime.run(Some(15)).await.unwrap();

    let db = engine::db::Database::connect(dir.path().join("aegis_engine.db"))
        .await
        .unwrap();
    let persistence = engine::persistence::Persistence::new(db);
    let completed = persistence
        .tasks
        .list_by_status(engine::schemas::TaskStatus::Completed)
        .await
        .unwrap();
    assert!(
        completed.iter().any(|t| t.description == "scheduled greeting"),
        "scheduled task was not completed: {:?}",
        completed.iter().map(|t| t.description.as_str()).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_identity_survives_restart() {
    let dir = TempDir::new().unwrap();

    let first_hash = {
        let (mut runtime, _) = test_runtime(&dir);
        runtime.initialize().await.unwrap();
        let hash = runtime.identity().unwrap().identity_hash.clone();
        runtime.shutdown_runtime().await.unwrap();
        hash
    };

    let (mut runtime, _) = test_runtime(&dir);
    runtime.initialize().await.unwrap();
    assert_eq!(runtime.identity().unwrap().identity_hash, first_hash);
}

#[tokio::test]
async fn test_run_completes_wakeup_and_shuts_down() {
    let dir = TempDir::new().unwrap();
    let (mut runtime, comm) = test_runtime(&dir);

    runtime.run(Some(12)).await.unwrap();

    assert!(runtime.is_shutdown_complete());
    // Wakeup affirmations were spoken
    assert!(comm.sent_to("test_channel").len() >= 5);
    // Registry was cleared at the end
    assert_eq!(runtime.registry().unwrap().provider_count(), 0);
}

#[tokio::test]
async fn test_shutdown_preserves_consciousness() {
    let dir = TempDir::new().unwrap();
    let (mut runtime, _comm) = test_runtime(&dir);

    runtime.initialize().await.unwrap();

    // Seed some open work so final_state has content
    let task_manager = runtime.task_manager().unwrap();
    for i in 0..3 {
        task_manager
            .create_task(format!("task {}", i), "test_channel", 0, None)
            .await
            .unwrap();
    }

    let identity_count_before = runtime.identity().unwrap().metadata.modification_count;

    runtime.request_shutdown("test");
    runtime.shutdown_runtime().await.unwrap();

    // The runtime closed its databases; reopen the file to inspect the
    // preserved state
    let db = engine::db::Database::connect(dir.path().join("aegis_engine.db"))
        .await
        .unwrap();
    let memory = engine::memory::GraphMemory::new(db);
    let nodes = memory
        .recall_by_type(NodeType::Shutdown, GraphScope::Identity, 10)
        .await
        .unwrap();
    assert_eq!(nodes.len(), 1);
    let node = &nodes[0];
    assert_eq!(node.attr_text("shutdown_reason"), Some("test"));
    assert!(node.attributes.contains_key("final_state"));
    assert!(node.attributes.contains_key("identity_hash"));
    assert_eq!(
        node.attributes.get("reactivation_count").unwrap().as_integer(),
        Some(1)
    );

    // Identity metadata was updated by the preservation save
    assert!(
        runtime.identity().unwrap().metadata.modification_count > identity_count_before
    );

    assert!(runtime.is_shutdown_complete());
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let (mut runtime, _comm) = test_runtime(&dir);

    runtime.initialize().await.unwrap();
    runtime.request_shutdown("first");
    runtime.request_shutdown("second");

    assert_eq!(
        runtime.shutdown_coordinator().reason().as_deref(),
        Some("first")
    );

    runtime.shutdown_runtime().await.unwrap();
    runtime.shutdown_runtime().await.unwrap();
    assert!(runtime.is_shutdown_complete());
}

#[tokio::test]
async fn test_cli_adapter_registers_into_runtime() {
    let dir = TempDir::new().unwrap();
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let mut config = test_config(&dir);
    config.channels.home_channel_id = "cli".to_string();

    let adapter: Arc<dyn Adapter> = Arc::new(CliAdapter::new(
        "cli",
        "cli-deferral",
        tx,
        false,
    ));
    let mut runtime = AegisRuntime::new(config, EnvLoader::new(), vec![adapter], Some(rx));

    runtime.initialize().await.unwrap();
    assert!(runtime.buses().unwrap().has_communication());
    runtime.shutdown_runtime().await.unwrap();
}
