//! Test support: an in-memory engine stack with mock services.
//!
//! Builds the full cognitive core against in-memory databases, the mock
//! LLM provider, and a recording communication service, so integration
//! tests drive real rounds without any network or disk.

use crate::audit::AuditService;
use crate::buses::{capabilities, BusManager};
use crate::clock::{Clock, FixedClock};
use crate::conscience::Conscience;
use crate::context::ContextBuilder;
use crate::db::{Database, MigrationSet};
use crate::dispatch::ActionDispatcher;
use crate::dma::{DmaPipeline, WorkflowLimits};
use crate::error::Result;
use crate::memory::GraphMemory;
use crate::persistence::Persistence;
use crate::processors::dream::DreamProcessor;
use crate::processors::play::PlayProcessor;
use crate::processors::shutdown::ShutdownProcessor;
use crate::processors::solitude::{SolitudeProcessor, DEFAULT_CRITICAL_PRIORITY_THRESHOLD};
use crate::processors::wakeup::WakeupProcessor;
use crate::processors::work::{WorkProcessor, DEFAULT_BATCH_SIZE};
use crate::processors::{
    AgentProcessor, ProcessingDelays, TaskManager, ThoughtManager, ThoughtProcessor,
};
use crate::registry::{ProviderHandle, ServiceRegistry};
use crate::schemas::{AgentIdentity, ChannelContext};
use crate::secrets::SecretsFilter;
use crate::services::CommunicationService;
use crate::shutdown::ShutdownCoordinator;
use crate::telemetry::TelemetryService;
use crate::wise_authority::WiseAuthorityGuidance;
use async_trait::async_trait;
use llm::providers::MockLlmClient;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tooling::async_utils::RetryPolicy;

/// Default test channels
pub const TEST_CHANNEL: &str = "test_channel";
pub const TEST_DEFERRAL_CHANNEL: &str = "deferral_channel";
pub const TEST_WA_USER: &str = "wa-authority-1";

/// Communication service that records every message it delivers
#[derive(Default)]
pub struct RecordingComm {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingComm {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    /// Messages delivered to one channel
    pub fn sent_to(&self, channel_id: &str) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter(|(channel, _)| channel == channel_id)
            .map(|(_, content)| content.clone())
            .collect()
    }
}

#[async_trait]
impl CommunicationService for RecordingComm {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send_message(&self, channel_id: &str, content: &str) -> Result<()> {
        self.sent
            .lock()
            .push((channel_id.to_string(), content.to_string()));
        Ok(())
    }

    fn channel_list(&self) -> Vec<ChannelContext> {
        vec![
            ChannelContext::new(TEST_CHANNEL).with_adapter("test"),
            ChannelContext::new(TEST_DEFERRAL_CHANNEL).with_adapter("test"),
        ]
    }
}

/// Construction options for a test harness
pub struct HarnessOptions {
    pub identity: AgentIdentity,
    pub limits: WorkflowLimits,
    pub max_active_tasks: usize,
    pub max_active_thoughts: usize,
    pub batch_size: usize,
    pub budgets: crate::schemas::ResourceBudgets,
    /// Additional conscience checks registered after the defaults
    pub extra_checks: Vec<Arc<dyn crate::conscience::ConscienceCheck>>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            identity: AgentIdentity::from_template("aegis-test", chrono::Utc::now()),
            limits: WorkflowLimits::default(),
            max_active_tasks: 10,
            max_active_thoughts: 50,
            batch_size: DEFAULT_BATCH_SIZE,
            budgets: crate::schemas::ResourceBudgets::default(),
            extra_checks: Vec::new(),
        }
    }
}

/// A fully wired in-memory engine
pub struct TestHarness {
    pub clock: Arc<FixedClock>,
    pub persistence: Arc<Persistence>,
    pub memory: Arc<GraphMemory>,
    pub telemetry: Arc<TelemetryService>,
    pub secrets: Arc<SecretsFilter>,
    pub audit: Arc<AuditService>,
    pub resources: Arc<crate::resources::ResourceMonitor>,
    pub registry: Arc<ServiceRegistry>,
    pub buses: Arc<BusManager>,
    pub identity: Arc<AgentIdentity>,
    pub mock_llm: Arc<MockLlmClient>,
    pub comm: Arc<RecordingComm>,
    pub shutdown: ShutdownCoordinator,
    pub thought_processor: Arc<ThoughtProcessor>,
    pub dispatcher: Arc<ActionDispatcher>,
    options: HarnessOptions,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_options(HarnessOptions::default()).await
    }

    pub async fn with_options(options: HarnessOptions) -> Self {
        let clock = Arc::new(FixedClock::default_start());
        let clock_dyn: Arc<dyn Clock> = clock.clone();

        let engine_db = Database::test_in_memory(MigrationSet::Engine)
            .await
            .expect("engine db");
        let secrets_db = Database::test_in_memory(MigrationSet::Secrets)
            .await
            .expect("secrets db");
        let audit_db = Database::test_in_memory(MigrationSet::Audit)
            .await
            .expect("audit db");

        let persistence = Arc::new(Persistence::new(engine_db.clone()));
        let memory = Arc::new(GraphMemory::new(engine_db.clone()));
        let telemetry = Arc::new(TelemetryService::new(engine_db, clock_dyn.clone()));
        let secrets = Arc::new(SecretsFilter::new(secrets_db, clock_dyn.clone()));
        let audit = Arc::new(
            AuditService::new(audit_db, clock_dyn.clone())
                .await
                .expect("audit service"),
        );

        let registry = Arc::new(ServiceRegistry::new());
        let mock_llm = Arc::new(MockLlmClient::new());
        let comm = Arc::new(RecordingComm::default());

        registry.register(
            "mock-llm",
            0,
            vec![capabilities::STRUCTURED_CALL.to_string()],
            ProviderHandle::Llm(mock_llm.clone()),
        );
        registry.register(
            "recording-comm",
            0,
            vec![capabilities::SEND_MESSAGE.to_string()],
            ProviderHandle::Communication(comm.clone()),
        );
        registry.register("graph-memory", 0, vec![], ProviderHandle::Memory(memory.clone()));
        registry.register("audit-log", 0, vec![], ProviderHandle::Audit(audit.clone()));

        let buses = Arc::new(BusManager::new(registry.clone(), telemetry.clone()));
        let identity = Arc::new(options.identity.clone());
        let shutdown = ShutdownCoordinator::new();
        let resources = Arc::new(crate::resources::ResourceMonitor::new(
            options.budgets.clone(),
            clock_dyn.clone(),
        ));

        let context = Arc::new(ContextBuilder::new(
            persistence.clone(),
            memory.clone(),
            telemetry.clone(),
            secrets.clone(),
            Some(resources.clone()),
            registry.clone(),
            identity.clone(),
            shutdown.clone(),
            clock_dyn.clone(),
            BTreeMap::from([("test".to_string(), TEST_CHANNEL.to_string())]),
        ));

        let dma = Arc::new(
            DmaPipeline::new(buses.clone(), identity.clone(), options.limits).with_call_policy(
                RetryPolicy::new(2)
                    .with_initial_interval(0.0)
                    .with_jitter(false),
                Duration::from_secs(5),
            ),
        );

        let mut conscience = Conscience::with_default_checks(identity.permitted_actions.clone());
        for check in &options.extra_checks {
            conscience.register(check.clone());
        }
        let conscience = Arc::new(conscience);

        let thought_processor = Arc::new(ThoughtProcessor::new(context, dma, conscience));

        let dispatcher = Arc::new(ActionDispatcher::new(
            persistence.clone(),
            buses.clone(),
            clock_dyn,
            TEST_DEFERRAL_CHANNEL,
            options.limits.max_thought_depth,
        ));

        Self {
            clock,
            persistence,
            memory,
            telemetry,
            secrets,
            audit,
            resources,
            registry,
            buses,
            identity,
            mock_llm,
            comm,
            shutdown,
            thought_processor,
            dispatcher,
            options,
        }
    }

    fn clock_dyn(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn task_manager(&self) -> TaskManager {
        TaskManager::new(
            self.persistence.clone(),
            self.clock_dyn(),
            self.options.max_active_tasks,
        )
    }

    pub fn thought_manager(&self) -> ThoughtManager {
        ThoughtManager::new(
            self.persistence.clone(),
            self.clock_dyn(),
            self.options.max_active_thoughts,
            Some(TEST_CHANNEL.to_string()),
        )
    }

    pub fn work_processor(&self) -> WorkProcessor {
        WorkProcessor::new(
            self.task_manager(),
            self.thought_manager(),
            self.thought_processor.clone(),
            self.dispatcher.clone(),
            self.persistence.clone(),
            self.clock_dyn(),
            "test",
            self.options.batch_size,
        )
    }

    pub fn wise_authority(&self) -> WiseAuthorityGuidance {
        WiseAuthorityGuidance::new(
            self.persistence.clone(),
            self.buses.clone(),
            self.clock_dyn(),
            TEST_WA_USER,
            TEST_DEFERRAL_CHANNEL,
        )
    }

    /// A full agent processor with zero inter-round delays
    pub fn agent_processor(&self) -> AgentProcessor {
        let wakeup = WakeupProcessor::new(
            self.task_manager(),
            self.thought_manager(),
            self.thought_processor.clone(),
            self.dispatcher.clone(),
            self.persistence.clone(),
            self.clock_dyn(),
            "test",
            TEST_CHANNEL,
        );

        let work = self.work_processor();
        let play = PlayProcessor::new(self.work_processor());
        let solitude = SolitudeProcessor::new(
            self.task_manager(),
            self.persistence.clone(),
            self.clock_dyn(),
            DEFAULT_CRITICAL_PRIORITY_THRESHOLD,
        );
        let dream = DreamProcessor::new(self.clock_dyn(), Duration::from_millis(20));
        let shutdown_processor = ShutdownProcessor::new(
            self.task_manager(),
            self.work_processor(),
            self.persistence.clone(),
            self.clock_dyn(),
            TEST_CHANNEL,
        );

        AgentProcessor::new(
            wakeup,
            work,
            play,
            solitude,
            dream,
            shutdown_processor,
            self.shutdown.clone(),
            self.persistence.clone(),
            self.clock_dyn(),
            ProcessingDelays::none(),
        )
    }
}
