//! Runtime orchestrator (C13): phased initialization, adapter lifecycle,
//! identity, and coordinated shutdown.
//!
//! Initialization runs seven phases, each with a handler and a verifier;
//! a failed critical step aborts startup. Shutdown is negotiated with the
//! agent, preserves consciousness to the identity scope, stops adapters
//! concurrently and services in reverse-dependency order, then clears the
//! registry.

mod identity;

pub use identity::{IdentityManager, IDENTITY_NODE_ID};

use crate::adapters::Adapter;
use crate::config::{AppConfig, LlmProviderKind};
use engine::audit::AuditService;
use engine::auth::AuthenticationService;
use engine::buses::{capabilities, BusManager};
use engine::clock::{Clock, SystemClock};
use engine::conscience::Conscience;
use engine::context::ContextBuilder;
use engine::db::{Database, MigrationSet};
use engine::dispatch::ActionDispatcher;
use engine::dma::{DmaPipeline, WorkflowLimits};
use engine::error::{EngineError, Result};
use engine::incidents::IncidentService;
use engine::memory::consolidation::{ConsolidationService, ConsolidationTier};
use engine::memory::GraphMemory;
use engine::observation::SelfObservationService;
use engine::persistence::Persistence;
use engine::processors::dream::DreamProcessor;
use engine::processors::play::PlayProcessor;
use engine::processors::shutdown::ShutdownProcessor;
use engine::processors::solitude::{SolitudeProcessor, DEFAULT_CRITICAL_PRIORITY_THRESHOLD};
use engine::processors::wakeup::WakeupProcessor;
use engine::processors::work::WorkProcessor;
use engine::processors::{
    AgentProcessor, AgentState, ProcessingDelays, TaskManager, ThoughtManager, ThoughtProcessor,
};
use engine::registry::{ProviderHandle, ServiceRegistry};
use engine::resources::ResourceMonitor;
use engine::schemas::{
    AgentIdentity, AttrValue, GraphNode, GraphScope, NodeType, ServiceCorrelation, Severity,
};
use engine::scheduler::SchedulerService;
use engine::secrets::SecretsFilter;
use engine::services::IncomingMessage;
use engine::shutdown::ShutdownCoordinator;
use engine::telemetry::TelemetryService;
use engine::visibility::VisibilityService;
use engine::wise_authority::{extract_thought_id, WiseAuthorityGuidance};
use llm::providers::{MockLlmClient, OpenAiCompatibleClient, OpenAiConfig};
use llm::LlmClient;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};
use tooling::config::EnvLoader;

/// Bounded wait for a communication service before processing starts
const COMM_WAIT_TIMEOUT: Duration = Duration::from_secs(30);
/// Per-service stop timeout during shutdown
const SERVICE_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Initialization phases, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitPhase {
    Infrastructure,
    Database,
    Memory,
    Identity,
    Security,
    Services,
    Components,
}

impl InitPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Infrastructure => "infrastructure",
            Self::Database => "database",
            Self::Memory => "memory",
            Self::Identity => "identity",
            Self::Security => "security",
            Self::Services => "services",
            Self::Components => "components",
        }
    }
}

/// One completed initialization step
#[derive(Debug, Clone, Serialize)]
pub struct CompletedStep {
    pub phase: InitPhase,
    pub name: String,
}

/// The runtime orchestrator
pub struct AegisRuntime {
    config: AppConfig,
    env: EnvLoader,
    clock: Arc<dyn Clock>,
    shutdown: ShutdownCoordinator,
    adapters: Vec<Arc<dyn Adapter>>,
    inbound: Option<UnboundedReceiver<IncomingMessage>>,

    engine_db: Option<Database>,
    secrets_db: Option<Database>,
    audit_db: Option<Database>,
    persistence: Option<Arc<Persistence>>,
    memory: Option<Arc<GraphMemory>>,
    telemetry: Option<Arc<TelemetryService>>,
    secrets: Option<Arc<SecretsFilter>>,
    audit: Option<Arc<AuditService>>,
    auth: Option<Arc<AuthenticationService>>,
    resources: Option<Arc<ResourceMonitor>>,
    scheduler: Option<Arc<SchedulerService>>,
    incidents: Option<Arc<IncidentService>>,
    self_observation: Option<Arc<SelfObservationService>>,
    visibility: Option<Arc<VisibilityService>>,
    registry: Option<Arc<ServiceRegistry>>,
    buses: Option<Arc<BusManager>>,
    identity: Option<AgentIdentity>,
    agent: Option<AgentProcessor>,

    consolidation_task: Option<tokio::task::JoinHandle<()>>,
    scheduler_task: Option<tokio::task::JoinHandle<()>>,
    inbound_task: Option<tokio::task::JoinHandle<()>>,

    completed_steps: Vec<CompletedStep>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    initialized: bool,
    shutdown_complete: bool,
}

impl AegisRuntime {
    pub fn new(
        config: AppConfig,
        env: EnvLoader,
        adapters: Vec<Arc<dyn Adapter>>,
        inbound: Option<UnboundedReceiver<IncomingMessage>>,
    ) -> Self {
        Self {
            config,
            env,
            clock: Arc::new(SystemClock),
            shutdown: ShutdownCoordinator::new(),
            adapters,
            inbound,
            engine_db: None,
            secrets_db: None,
            audit_db: None,
            persistence: None,
            memory: None,
            telemetry: None,
            secrets: None,
            audit: None,
            auth: None,
            resources: None,
            scheduler: None,
            incidents: None,
            self_observation: None,
            visibility: None,
            registry: None,
            buses: None,
            identity: None,
            agent: None,
            consolidation_task: None,
            scheduler_task: None,
            inbound_task: None,
            completed_steps: Vec::new(),
            started_at: None,
            initialized: false,
            shutdown_complete: false,
        }
    }

    /// Replace the clock (tests inject a fixed one)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn shutdown_coordinator(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Request a graceful shutdown; duplicates are idempotent
    pub fn request_shutdown(&self, reason: &str) {
        self.shutdown.request_shutdown(reason);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_shutdown_complete(&self) -> bool {
        self.shutdown_complete
    }

    pub fn completed_steps(&self) -> &[CompletedStep] {
        &self.completed_steps
    }

    pub fn identity(&self) -> Option<&AgentIdentity> {
        self.identity.as_ref()
    }

    pub fn memory(&self) -> Option<&Arc<GraphMemory>> {
        self.memory.as_ref()
    }

    pub fn persistence(&self) -> Option<&Arc<Persistence>> {
        self.persistence.as_ref()
    }

    pub fn registry(&self) -> Option<&Arc<ServiceRegistry>> {
        self.registry.as_ref()
    }

    pub fn auth(&self) -> Option<&Arc<AuthenticationService>> {
        self.auth.as_ref()
    }

    pub fn scheduler(&self) -> Option<&Arc<SchedulerService>> {
        self.scheduler.as_ref()
    }

    pub fn incidents(&self) -> Option<&Arc<IncidentService>> {
        self.incidents.as_ref()
    }

    pub fn self_observation(&self) -> Option<&Arc<SelfObservationService>> {
        self.self_observation.as_ref()
    }

    pub fn visibility(&self) -> Option<&Arc<VisibilityService>> {
        self.visibility.as_ref()
    }

    pub fn buses(&self) -> Option<&Arc<BusManager>> {
        self.buses.as_ref()
    }

    /// A task manager over the runtime's persistence
    pub fn task_manager(&self) -> Option<TaskManager> {
        self.persistence.as_ref().map(|p| {
            TaskManager::new(p.clone(), self.clock.clone(), self.config.workflow.max_active_tasks)
        })
    }

    fn record_step(&mut self, phase: InitPhase, name: &str) {
        info!(phase = phase.as_str(), step = name, "Initialization step complete");
        self.completed_steps.push(CompletedStep {
            phase,
            name: name.to_string(),
        });
    }

    /// Run all seven initialization phases
    pub async fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        info!("Initializing runtime");
        self.started_at = Some(self.clock.now());

        self.init_infrastructure().await?;
        self.init_database().await?;
        self.init_memory().await?;
        self.init_identity().await?;
        self.init_security().await?;
        self.init_services().await?;
        self.init_components().await?;

        self.perform_startup_maintenance().await?;

        self.initialized = true;
        info!(
            agent = %self.identity.as_ref().map(|i| i.agent_id.clone()).unwrap_or_default(),
            "Runtime initialized"
        );
        Ok(())
    }

    // Phase 1: clock, shutdown event, logging
    async fn init_infrastructure(&mut self) -> Result<()> {
        tooling::logging::init_logging(&self.config.log_level);

        // Verify: the clock produces plausible time
        let now = self.clock.now();
        if now.timestamp() <= 0 {
            return Err(EngineError::Integrity("clock produced invalid time".into()));
        }

        self.record_step(InitPhase::Infrastructure, "clock, shutdown, logging");
        Ok(())
    }

    // Phase 2: databases, migrations, required tables
    async fn init_database(&mut self) -> Result<()> {
        let engine_db =
            Database::initialize(&self.config.database.db_path, MigrationSet::Engine).await?;
        let secrets_db =
            Database::initialize(&self.config.database.secrets_db_path, MigrationSet::Secrets)
                .await?;
        let audit_db =
            Database::initialize(&self.config.database.audit_db_path, MigrationSet::Audit).await?;

        // Verify: the core tables exist
        for table in ["tasks", "thoughts", "graph_nodes", "graph_edges"] {
            if !engine_db.table_exists(table).await? {
                return Err(EngineError::Integrity(format!(
                    "required table '{}' missing from engine database",
                    table
                )));
            }
        }

        self.persistence = Some(Arc::new(Persistence::new(engine_db.clone())));
        self.engine_db = Some(engine_db);
        self.secrets_db = Some(secrets_db);
        self.audit_db = Some(audit_db);

        self.record_step(InitPhase::Database, "migrations and integrity check");
        Ok(())
    }

    // Phase 3: graph memory on the verified database
    async fn init_memory(&mut self) -> Result<()> {
        let memory = Arc::new(GraphMemory::new(
            self.engine_db.clone().expect("database phase ran"),
        ));

        // Verify: the store answers queries
        memory.count_nodes().await?;

        self.memory = Some(memory);
        self.record_step(InitPhase::Memory, "graph memory");
        Ok(())
    }

    // Phase 4: identity load-or-create with integrity verification
    async fn init_identity(&mut self) -> Result<()> {
        let manager = IdentityManager::new(
            self.memory.clone().expect("memory phase ran"),
            self.clock.clone(),
        );
        let identity = manager.load_or_create(&self.config.agent_id).await?;

        // Verify: the hash still holds after the round trip
        if !identity.verify_hash() {
            return Err(EngineError::Identity("identity hash verification failed".into()));
        }

        self.identity = Some(identity);
        self.record_step(InitPhase::Identity, "agent identity");
        Ok(())
    }

    // Phase 5: authentication service, secrets filter, audit signing
    async fn init_security(&mut self) -> Result<()> {
        let auth = Arc::new(AuthenticationService::new(self.clock.clone()));
        let secrets = Arc::new(SecretsFilter::new(
            self.secrets_db.clone().expect("database phase ran"),
            self.clock.clone(),
        ));
        let audit = Arc::new(
            AuditService::new(
                self.audit_db.clone().expect("database phase ran"),
                self.clock.clone(),
            )
            .await?,
        );

        // Verify: a probe token round-trips, both stores answer
        let probe = auth.issue_adapter_token("bootstrap");
        if !auth.verify_token(&probe) {
            return Err(EngineError::Integrity(
                "authentication service failed its probe token".into(),
            ));
        }
        auth.revoke_token(&probe);
        secrets.snapshot().await?;
        audit.count_entries().await?;

        self.auth = Some(auth);
        self.secrets = Some(secrets);
        self.audit = Some(audit);
        self.record_step(
            InitPhase::Security,
            "authentication, secrets filter, audit signing",
        );
        Ok(())
    }

    // Phase 6: core services, adapters, adapter services
    async fn init_services(&mut self) -> Result<()> {
        let engine_db = self.engine_db.clone().expect("database phase ran");
        let telemetry = Arc::new(TelemetryService::new(engine_db, self.clock.clone()));
        let resources = Arc::new(ResourceMonitor::new(
            self.config.resources.clone(),
            self.clock.clone(),
        ));
        let scheduler = Arc::new(SchedulerService::new(self.clock.clone()));
        let incidents = Arc::new(IncidentService::new(self.clock.clone()));
        let self_observation = Arc::new(SelfObservationService::new(
            telemetry.clone(),
            self.clock.clone(),
        ));
        let visibility = Arc::new(VisibilityService::new(
            self.persistence.clone().expect("database phase ran"),
        ));
        let registry = Arc::new(ServiceRegistry::new());

        let llm_client = self.build_llm_client()?;
        registry.register(
            llm_client.name().to_string(),
            0,
            vec![capabilities::STRUCTURED_CALL.to_string()],
            ProviderHandle::Llm(llm_client),
        );
        registry.register(
            "graph-memory",
            0,
            vec![],
            ProviderHandle::Memory(self.memory.clone().expect("memory phase ran")),
        );
        registry.register(
            "audit-log",
            0,
            vec![],
            ProviderHandle::Audit(self.audit.clone().expect("security phase ran")),
        );
        registry.register(
            "telemetry",
            0,
            vec![],
            ProviderHandle::Telemetry(telemetry.clone()),
        );
        registry.register(
            "secrets-filter",
            0,
            vec![],
            ProviderHandle::Secrets(self.secrets.clone().expect("security phase ran")),
        );

        // Start adapters before registering their services
        let started = futures::future::join_all(self.adapters.iter().map(|a| a.start())).await;
        for (adapter, result) in self.adapters.iter().zip(started) {
            result.map_err(|e| {
                EngineError::Dispatch(format!("adapter '{}' failed to start: {}", adapter.kind(), e))
            })?;
        }

        let auth = self.auth.clone().expect("security phase ran");
        for adapter in &self.adapters {
            // Every adapter carries an authentication token for the
            // services it contributes
            let token = auth.issue_adapter_token(adapter.kind());
            info!(
                adapter = adapter.kind(),
                token_prefix = &token[..8],
                "Adapter authenticated"
            );

            for registration in adapter.get_services_to_register() {
                registry.register(
                    registration.name,
                    registration.priority,
                    registration.capabilities,
                    registration.provider,
                );
            }
        }

        // Verify: something is registered and the scheduler accepts work
        if registry.provider_count() == 0 {
            return Err(EngineError::Integrity("no services registered".into()));
        }
        if scheduler.pending_count() != 0 {
            return Err(EngineError::Integrity("scheduler started non-empty".into()));
        }

        self.telemetry = Some(telemetry);
        self.resources = Some(resources);
        self.scheduler = Some(scheduler);
        self.incidents = Some(incidents);
        self.self_observation = Some(self_observation);
        self.visibility = Some(visibility);
        self.registry = Some(registry);
        self.record_step(
            InitPhase::Services,
            "core services, scheduler, incidents, observation, visibility, adapters",
        );
        Ok(())
    }

    // Phase 7: dispatcher, processors, final verification
    async fn init_components(&mut self) -> Result<()> {
        let persistence = self.persistence.clone().expect("database phase ran");
        let memory = self.memory.clone().expect("memory phase ran");
        let telemetry = self.telemetry.clone().expect("services phase ran");
        let secrets = self.secrets.clone().expect("security phase ran");
        let resources = self.resources.clone().expect("services phase ran");
        let registry = self.registry.clone().expect("services phase ran");
        let identity = Arc::new(self.identity.clone().expect("identity phase ran"));

        let buses = Arc::new(BusManager::new(registry.clone(), telemetry.clone()));

        let mut home_channels = BTreeMap::new();
        for adapter in &self.adapters {
            home_channels.insert(
                adapter.kind().to_string(),
                self.config.channels.home_channel_id.clone(),
            );
        }

        let context = Arc::new(ContextBuilder::new(
            persistence.clone(),
            memory.clone(),
            telemetry.clone(),
            secrets,
            Some(resources),
            registry.clone(),
            identity.clone(),
            self.shutdown.clone(),
            self.clock.clone(),
            home_channels,
        ));

        let limits = WorkflowLimits {
            max_rounds: self.config.workflow.max_rounds,
            max_thought_depth: self.config.workflow.max_thought_depth,
        };
        let dma = Arc::new(DmaPipeline::new(buses.clone(), identity.clone(), limits));
        let conscience = Arc::new(Conscience::with_default_checks(
            identity.permitted_actions.clone(),
        ));
        let thought_processor = Arc::new(ThoughtProcessor::new(context, dma, conscience));

        let dispatcher = Arc::new(ActionDispatcher::new(
            persistence.clone(),
            buses.clone(),
            self.clock.clone(),
            self.config.channels.deferral_channel_id.clone(),
            limits.max_thought_depth,
        ));

        let clock = self.clock.clone();
        let workflow = self.config.workflow.clone();
        let home_channel = self.config.channels.home_channel_id.clone();

        let task_manager =
            || TaskManager::new(persistence.clone(), clock.clone(), workflow.max_active_tasks);
        let thought_manager = || {
            ThoughtManager::new(
                persistence.clone(),
                clock.clone(),
                workflow.max_active_thoughts,
                Some(home_channel.clone()),
            )
        };
        let work_processor = || {
            WorkProcessor::new(
                task_manager(),
                thought_manager(),
                thought_processor.clone(),
                dispatcher.clone(),
                persistence.clone(),
                clock.clone(),
                "cli",
                workflow.batch_size,
            )
        };

        let wakeup = WakeupProcessor::new(
            task_manager(),
            thought_manager(),
            thought_processor.clone(),
            dispatcher.clone(),
            persistence.clone(),
            clock.clone(),
            "cli",
            home_channel.clone(),
        );
        let solitude = SolitudeProcessor::new(
            task_manager(),
            persistence.clone(),
            clock.clone(),
            DEFAULT_CRITICAL_PRIORITY_THRESHOLD,
        );
        let dream = DreamProcessor::new(clock.clone(), Duration::from_secs(60));
        let shutdown_processor = ShutdownProcessor::new(
            task_manager(),
            work_processor(),
            persistence.clone(),
            clock.clone(),
            home_channel.clone(),
        );

        let delays = match workflow.round_delay_secs {
            Some(secs) => {
                let delay = Duration::from_secs_f64(secs);
                ProcessingDelays {
                    wakeup: delay,
                    work: delay,
                    solitude: delay,
                    dream: delay,
                    default: delay,
                }
            }
            None => ProcessingDelays::default(),
        };

        let agent = AgentProcessor::new(
            wakeup,
            work_processor(),
            PlayProcessor::new(work_processor()),
            solitude,
            dream,
            shutdown_processor,
            self.shutdown.clone(),
            persistence.clone(),
            clock.clone(),
            delays,
        );

        self.buses = Some(buses);
        self.agent = Some(agent);

        // Final verification
        info!("============================================================");
        info!(identity = %identity.agent_id, "Pre-wakeup verification complete");
        info!(purpose = %identity.core_profile.description, "Identity purpose");
        info!(
            capabilities = identity.permitted_actions.len(),
            services = registry.provider_count(),
            service_capabilities = registry.capability_count(),
            "Registered services"
        );
        info!("============================================================");

        self.record_step(InitPhase::Components, "dispatcher, processors, verification");
        Ok(())
    }

    fn build_llm_client(&self) -> Result<Arc<dyn LlmClient>> {
        match self.config.llm.provider {
            LlmProviderKind::Mock => Ok(Arc::new(MockLlmClient::new())),
            LlmProviderKind::OpenAiCompatible => {
                let mut provider_config =
                    OpenAiConfig::new(&self.config.llm.endpoint, &self.config.llm.model);
                if let Some(key) = self.env.get(&self.config.llm.api_key_env) {
                    provider_config = provider_config.with_api_key(key);
                }
                let client = OpenAiCompatibleClient::new(provider_config)?;
                Ok(Arc::new(client))
            }
        }
    }

    /// Startup maintenance: re-queue thoughts a previous run left claimed
    async fn perform_startup_maintenance(&self) -> Result<()> {
        let persistence = self.persistence.as_ref().expect("database phase ran");
        let reset = persistence
            .thoughts
            .reset_processing_to_pending(self.clock.now())
            .await?;
        if reset > 0 {
            warn!(reset, "Re-queued thoughts left processing by a previous run");
        }
        Ok(())
    }

    /// Run the agent to completion
    pub async fn run(&mut self, num_rounds: Option<u32>) -> Result<()> {
        if !self.initialized {
            self.initialize().await?;
        }

        self.shutdown.install_signal_handlers();
        self.spawn_inbound_pump();
        self.spawn_consolidation_loop();
        self.spawn_scheduler_loop();

        self.await_communication_service().await;

        let rounds = num_rounds.or(self.config.workflow.num_rounds);
        let mut agent = self.agent.take().expect("components phase ran");
        let shutdown = self.shutdown.clone();

        let agent_task = tokio::spawn(async move {
            let result = agent.start_processing(rounds).await;
            (agent, result)
        });

        let adapter_tasks: Vec<_> = self
            .adapters
            .iter()
            .map(|adapter| {
                let adapter = adapter.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { adapter.run_lifecycle(shutdown).await })
            })
            .collect();

        // The agent loop observes the shutdown coordinator itself; wait
        // for it, then for the adapters to wind down.
        match agent_task.await {
            Ok((agent, result)) => {
                self.agent = Some(agent);
                if let Err(e) = result {
                    error!(error = %e, "Agent processing ended with error");
                    if let Some(incidents) = &self.incidents {
                        incidents.record(Severity::Critical, "agent", e.to_string());
                    }
                    self.shutdown
                        .request_shutdown(format!("agent task failed: {}", e));
                }
            }
            Err(join_error) => {
                error!(error = %join_error, "Agent task panicked");
                if let Some(incidents) = &self.incidents {
                    incidents.record(Severity::Critical, "agent", join_error.to_string());
                }
                self.shutdown
                    .request_shutdown(format!("agent task panicked: {}", join_error));
            }
        }

        self.shutdown
            .request_shutdown("agent processing completed");

        for task in adapter_tasks {
            if let Err(e) = tokio::time::timeout(SERVICE_STOP_TIMEOUT, task).await {
                warn!(error = %e, "Adapter lifecycle did not finish in time");
            }
        }

        self.shutdown_runtime().await
    }

    fn spawn_inbound_pump(&mut self) {
        let Some(mut rx) = self.inbound.take() else {
            return;
        };

        let persistence = self.persistence.clone().expect("initialized");
        let buses = self.buses.clone().expect("initialized");
        let telemetry = self.telemetry.clone().expect("initialized");
        let clock = self.clock.clone();
        let deferral_channel = self.config.channels.deferral_channel_id.clone();
        let wa_user = self.config.wise_authority.user_id.clone();
        let max_active_tasks = self.config.workflow.max_active_tasks;

        let task_manager = TaskManager::new(persistence.clone(), clock.clone(), max_active_tasks);
        let guidance = wa_user.map(|user_id| {
            WiseAuthorityGuidance::new(
                persistence,
                buses,
                clock.clone(),
                user_id,
                deferral_channel.clone(),
            )
        });

        self.inbound_task = Some(tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                // Every observed message leaves an observe correlation for
                // profile enrichment
                let correlation = ServiceCorrelation::request(
                    "communication",
                    "observer",
                    "observe",
                    Some(serde_json::json!({
                        "channel_id": message.channel_id,
                        "author_id": message.author_id,
                        "content": message.content,
                    })),
                    clock.now(),
                );
                if let Err(e) = telemetry.record(&correlation).await {
                    warn!(error = %e, "Failed to record observe correlation");
                }

                let is_guidance = message.channel_id == deferral_channel
                    || extract_thought_id(&message.content).is_some();

                if is_guidance {
                    if let Some(guidance) = &guidance {
                        match guidance.handle_message(&message).await {
                            Ok(Some(_)) => continue,
                            Ok(None) => {}
                            Err(e) => {
                                warn!(error = %e, "Guidance handling failed");
                                continue;
                            }
                        }
                    }
                }

                if let Err(e) = task_manager
                    .create_task(&message.content, &message.channel_id, 0, None)
                    .await
                {
                    warn!(error = %e, "Failed to create task from observed message");
                }
            }
        }));
    }

    fn spawn_consolidation_loop(&mut self) {
        let memory = self.memory.clone().expect("initialized");
        let clock = self.clock.clone();
        let shutdown = self.shutdown.clone();
        let incidents = self.incidents.clone().expect("initialized");
        let self_observation = self.self_observation.clone().expect("initialized");

        self.consolidation_task = Some(tokio::spawn(async move {
            let service = ConsolidationService::new(memory, clock);
            let mut interval = tokio::time::interval(Duration::from_secs(6 * 3600));
            interval.tick().await; // first tick is immediate

            loop {
                tokio::select! {
                    _ = shutdown.wait_for_shutdown() => break,
                    _ = interval.tick() => {
                        if let Err(e) = service.run(ConsolidationTier::Basic).await {
                            warn!(error = %e, "Consolidation pass failed");
                            incidents.record(Severity::Error, "consolidation", e.to_string());
                        }
                        if let Err(e) = self_observation.review().await {
                            warn!(error = %e, "Self-observation review failed");
                        }
                    }
                }
            }
        }));
    }

    /// Poll the scheduler and turn due entries into PENDING tasks
    fn spawn_scheduler_loop(&mut self) {
        let scheduler = self.scheduler.clone().expect("initialized");
        let incidents = self.incidents.clone().expect("initialized");
        let shutdown = self.shutdown.clone();
        let task_manager = TaskManager::new(
            self.persistence.clone().expect("initialized"),
            self.clock.clone(),
            self.config.workflow.max_active_tasks,
        );

        self.scheduler_task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                tokio::select! {
                    _ = shutdown.wait_for_shutdown() => break,
                    _ = interval.tick() => {
                        for entry in scheduler.take_due_entries() {
                            info!(entry_id = %entry.entry_id, "Scheduled task is due");
                            if let Err(e) = task_manager
                                .create_task(&entry.description, &entry.channel_id, entry.priority, None)
                                .await
                            {
                                warn!(error = %e, "Failed to create task from scheduled entry");
                                incidents.record(Severity::Error, "scheduler", e.to_string());
                            }
                        }
                    }
                }
            }
        }));
    }

    async fn await_communication_service(&self) {
        let Some(buses) = &self.buses else {
            return;
        };

        let deadline = tokio::time::Instant::now() + COMM_WAIT_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            if buses.has_communication() {
                info!("Communication service available; starting processing");
                return;
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        warn!(
            timeout_secs = COMM_WAIT_TIMEOUT.as_secs(),
            "No communication service available; starting anyway"
        );
    }

    /// Coordinated shutdown; safe to call more than once
    pub async fn shutdown_runtime(&mut self) -> Result<()> {
        if self.shutdown_complete {
            return Ok(());
        }
        info!("Shutting down runtime");

        let reason = self
            .shutdown
            .reason()
            .unwrap_or_else(|| "runtime shutdown".to_string());

        // Negotiation when the agent made it past WAKEUP
        if let Some(agent) = self.agent.as_mut() {
            let state = agent.state_machine().current_state();
            if state != AgentState::Shutdown && state != AgentState::Wakeup {
                if let Err(e) = agent.handle_transition(AgentState::Shutdown).await {
                    warn!(error = %e, "Could not enter SHUTDOWN state for negotiation");
                }
            }
            if agent.state_machine().current_state() == AgentState::Shutdown
                && agent.current_round() > 0
            {
                match agent.run_shutdown_negotiation(&reason).await {
                    Ok(outcome) => info!(outcome = ?outcome, "Shutdown negotiation finished"),
                    Err(e) => warn!(error = %e, "Shutdown negotiation failed"),
                }
            }
            if let Err(e) = agent.stop_processing().await {
                warn!(error = %e, "Agent stop reported an error");
            }
        }

        if let Err(e) = self.preserve_consciousness(&reason).await {
            error!(error = %e, "Failed to preserve consciousness during shutdown");
        }

        // Stop adapters concurrently, capturing failures
        let stops = futures::future::join_all(self.adapters.iter().map(|a| a.stop())).await;
        for (adapter, result) in self.adapters.iter().zip(stops) {
            if let Err(e) = result {
                error!(adapter = adapter.kind(), error = %e, "Adapter failed to stop");
                if let Some(incidents) = &self.incidents {
                    incidents.record(
                        Severity::Error,
                        "adapter",
                        format!("{} failed to stop: {}", adapter.kind(), e),
                    );
                }
            }
        }

        self.stop_services().await;

        if let Some(registry) = &self.registry {
            registry.clear();
        }

        self.shutdown_complete = true;
        info!("Runtime shutdown complete");
        Ok(())
    }

    /// Write the SHUTDOWN graph node and update identity metadata
    async fn preserve_consciousness(&mut self, reason: &str) -> Result<()> {
        let now = self.clock.now();
        let runtime_duration_secs = self
            .started_at
            .map(|started| (now - started).num_seconds())
            .unwrap_or(0);

        let (Some(memory), Some(persistence), Some(identity)) =
            (&self.memory, &self.persistence, self.identity.as_mut())
        else {
            return Ok(());
        };

        let active_tasks = persistence.tasks.count_active().await?;
        let queue = persistence.queue_status().await?;

        let prior_shutdowns = memory
            .recall_by_type(NodeType::Shutdown, GraphScope::Identity, 10_000)
            .await?
            .len() as i64;

        let node = GraphNode::new(
            format!("shutdown/{}", uuid::Uuid::new_v4()),
            NodeType::Shutdown,
            GraphScope::Identity,
            now,
        )
        .with_attr("shutdown_reason", reason)
        .with_attr(
            "final_state",
            AttrValue::Json(serde_json::json!({
                "active_tasks": active_tasks,
                "pending_thoughts": queue.pending_thoughts,
                "runtime_duration_secs": runtime_duration_secs,
            })),
        )
        .with_attr("identity_hash", identity.identity_hash.as_str())
        .with_attr("reactivation_count", prior_shutdowns + 1);

        memory.memorize(&node).await?;

        let manager = IdentityManager::new(memory.clone(), self.clock.clone());
        manager.save(identity).await?;

        info!(reactivation_count = prior_shutdowns + 1, "Consciousness preserved");
        Ok(())
    }

    /// Stop services in reverse-dependency order
    ///
    /// Order: consolidation → scheduler → incident management → resource
    /// monitor → self-observation → visibility → telemetry → audit → LLM
    /// → auth → secrets → memory → shutdown service → clock. Each step is
    /// bounded to 10 s; a hang is logged and abandoned.
    async fn stop_services(&mut self) {
        async fn stop_step<F>(name: &str, stop: F)
        where
            F: std::future::Future<Output = ()>,
        {
            match tokio::time::timeout(SERVICE_STOP_TIMEOUT, stop).await {
                Ok(()) => info!(service = name, "Service stopped"),
                Err(_) => warn!(service = name, "Service stop timed out; abandoning"),
            }
        }

        if let Some(task) = self.consolidation_task.take() {
            stop_step("tsdb-consolidation", async {
                task.abort();
                let _ = task.await;
            })
            .await;
        }

        let scheduler_task = self.scheduler_task.take();
        if let Some(scheduler) = self.scheduler.take() {
            stop_step("scheduler", async move {
                if let Some(task) = scheduler_task {
                    task.abort();
                    let _ = task.await;
                }
                scheduler.stop().await;
            })
            .await;
        }

        if let Some(incidents) = self.incidents.take() {
            stop_step("incident-management", incidents.stop()).await;
        }

        if let Some(resources) = self.resources.take() {
            stop_step("resource-monitor", async move { resources.stop() }).await;
        }

        if let Some(self_observation) = self.self_observation.take() {
            stop_step("self-observation", self_observation.stop()).await;
        }

        if let Some(visibility) = self.visibility.take() {
            stop_step("visibility", visibility.stop()).await;
        }

        if let Some(telemetry) = self.telemetry.take() {
            stop_step("telemetry", telemetry.stop()).await;
        }

        let audit_db = self.audit_db.take();
        if let Some(audit) = self.audit.take() {
            stop_step("audit", async move {
                audit.stop().await;
                if let Some(db) = audit_db {
                    db.close().await;
                }
            })
            .await;
        }

        // The LLM client holds no connections of its own; it is released
        // with the registry
        stop_step("llm", async {}).await;

        if let Some(auth) = self.auth.take() {
            stop_step("auth", auth.stop()).await;
        }

        let secrets_db = self.secrets_db.take();
        if let Some(secrets) = self.secrets.take() {
            stop_step("secrets", async move {
                secrets.stop().await;
                if let Some(db) = secrets_db {
                    db.close().await;
                }
            })
            .await;
        }

        // Memory, persistence, and correlations all share the engine
        // database
        let engine_db = self.engine_db.take();
        stop_step("memory", async move {
            if let Some(db) = engine_db {
                db.close().await;
            }
        })
        .await;

        let inbound_task = self.inbound_task.take();
        stop_step("shutdown", async move {
            if let Some(task) = inbound_task {
                task.abort();
                let _ = task.await;
            }
        })
        .await;

        stop_step("clock", async {}).await;
    }
}
