//! Context builder (C6): assembles the per-thought `SystemSnapshot`.
//!
//! Batch-scoped data (identity, recent/top tasks, service health, resource
//! alerts, telemetry, secrets, shutdown context, adapter channels, tools)
//! is fetched once per batch; per-thought work is limited to summaries,
//! the channel query, and user-profile enrichment. Information loss is
//! never hidden: lookups that fail surface as alerts or errors, and the
//! `"UNKNOWN"` channel fallback is always accompanied by a warning.

mod profiles;

pub use profiles::ProfileProvider;

use crate::clock::Clock;
use crate::memory::GraphMemory;
use crate::persistence::Persistence;
use crate::registry::{ProviderHandle, ServiceKind, ServiceRegistry};
use crate::resources::ResourceMonitor;
use crate::schemas::{
    AgentIdentity, ChannelContext, GraphScope, NodeType, SecretsSnapshot, ShutdownContext,
    SystemSnapshot, Task, TaskSummary, TelemetrySummary, Thought, ThoughtSummary,
};
use crate::secrets::SecretsFilter;
use crate::shutdown::ShutdownCoordinator;
use crate::telemetry::TelemetryService;
use crate::error::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// Channel id used only when every resolution source is exhausted
pub const UNKNOWN_CHANNEL: &str = "UNKNOWN";

/// Data fetched once per processing batch
#[derive(Debug, Clone, Default)]
pub struct BatchContext {
    pub identity: Option<AgentIdentity>,
    pub recent_completed_tasks: Vec<TaskSummary>,
    pub top_pending_tasks: Vec<TaskSummary>,
    pub service_health: BTreeMap<String, bool>,
    pub circuit_breakers: BTreeMap<String, String>,
    pub resource_alerts: Vec<String>,
    pub telemetry: Option<TelemetrySummary>,
    pub secrets: Option<SecretsSnapshot>,
    pub shutdown_context: Option<ShutdownContext>,
    pub adapter_channels: BTreeMap<String, Vec<ChannelContext>>,
    pub available_tools: Vec<String>,
}

/// Builds snapshots and processing contexts for thoughts
#[derive(Clone)]
pub struct ContextBuilder {
    persistence: Arc<Persistence>,
    memory: Arc<GraphMemory>,
    telemetry: Arc<TelemetryService>,
    secrets: Arc<SecretsFilter>,
    resources: Option<Arc<ResourceMonitor>>,
    registry: Arc<ServiceRegistry>,
    identity: Arc<AgentIdentity>,
    shutdown: ShutdownCoordinator,
    clock: Arc<dyn Clock>,
    /// Configured home channel per adapter kind
    home_channels: BTreeMap<String, String>,
    profile_provider: Option<Arc<dyn ProfileProvider>>,
}

impl ContextBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        persistence: Arc<Persistence>,
        memory: Arc<GraphMemory>,
        telemetry: Arc<TelemetryService>,
        secrets: Arc<SecretsFilter>,
        resources: Option<Arc<ResourceMonitor>>,
        registry: Arc<ServiceRegistry>,
        identity: Arc<AgentIdentity>,
        shutdown: ShutdownCoordinator,
        clock: Arc<dyn Clock>,
        home_channels: BTreeMap<String, String>,
    ) -> Self {
        Self {
            persistence,
            memory,
            telemetry,
            secrets,
            resources,
            registry,
            identity,
            shutdown,
            clock,
            home_channels,
            profile_provider: None,
        }
    }

    /// Attach an external profile provider
    ///
    /// Provider data is merged first and overridden by graph data.
    pub fn with_profile_provider(mut self, provider: Arc<dyn ProfileProvider>) -> Self {
        self.profile_provider = Some(provider);
        self
    }

    /// The active resource breach, if any
    pub fn resource_breach(&self) -> Option<(crate::schemas::ResourceAction, String)> {
        self.resources.as_ref().and_then(|monitor| monitor.breach_action())
    }

    /// The shared shutdown coordinator
    pub fn shutdown_coordinator(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Fetch everything that is constant across one processing batch
    pub async fn build_batch(&self) -> Result<BatchContext> {
        let recent = self.persistence.tasks.recent_completed(10).await?;
        let top = self.persistence.tasks.top_tasks(10).await?;

        let mut adapter_channels: BTreeMap<String, Vec<ChannelContext>> = BTreeMap::new();
        if let Some(ProviderHandle::Communication(comm)) =
            self.registry.get(ServiceKind::Communication, None)
        {
            adapter_channels.insert(comm.name().to_string(), comm.channel_list());
        }

        let available_tools = match self.registry.get(ServiceKind::Tool, None) {
            Some(ProviderHandle::Tool(tools)) => tools.available_tools().await,
            _ => Vec::new(),
        };

        let secrets = match self.secrets.snapshot().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "Secrets snapshot unavailable");
                None
            }
        };

        let shutdown_context = if self.shutdown.is_shutdown_requested() {
            Some(ShutdownContext {
                reason: self
                    .shutdown
                    .reason()
                    .unwrap_or_else(|| "unspecified".to_string()),
                requested_at: self.clock.now(),
            })
        } else {
            None
        };

        Ok(BatchContext {
            identity: Some(self.identity.as_ref().clone()),
            recent_completed_tasks: recent.iter().map(task_summary).collect(),
            top_pending_tasks: top.iter().map(task_summary).collect(),
            service_health: self.registry.health(),
            circuit_breakers: self.registry.breaker_states(),
            resource_alerts: self.resource_alerts(),
            telemetry: self.telemetry.summary().await.ok(),
            secrets,
            shutdown_context,
            adapter_channels,
            available_tools,
        })
    }

    /// Assemble the immutable snapshot for one thought
    pub async fn build_snapshot(
        &self,
        task: Option<&Task>,
        thought: &Thought,
        batch: &BatchContext,
    ) -> Result<SystemSnapshot> {
        let channel_id = self.resolve_channel_id(task, thought);

        // Channel node lookup enriches the context when the channel is known
        let channel_context = if channel_id != UNKNOWN_CHANNEL {
            match self
                .memory
                .recall(&format!("channel/{}", channel_id), GraphScope::Local)
                .await?
            {
                Some(node) if node.node_type == NodeType::Channel => {
                    let mut ctx = ChannelContext::new(&channel_id);
                    ctx.channel_name = node.attr_text("name").map(str::to_string);
                    ctx.adapter = node.attr_text("adapter").map(str::to_string);
                    Some(ctx)
                }
                _ => task
                    .and_then(|t| t.context.channel_context.clone())
                    .or_else(|| thought.context.channel_context.clone())
                    .or_else(|| Some(ChannelContext::new(&channel_id))),
            }
        } else {
            None
        };

        let user_profiles = self.enrich_user_profiles(thought).await?;

        Ok(SystemSnapshot {
            channel_id: Some(channel_id),
            channel_context,
            current_task: task.map(task_summary),
            current_thought: Some(thought_summary(thought)),
            recent_completed_tasks: batch.recent_completed_tasks.clone(),
            top_pending_tasks: batch.top_pending_tasks.clone(),
            agent_identity: batch.identity.clone(),
            service_health: batch.service_health.clone(),
            circuit_breakers: batch.circuit_breakers.clone(),
            resource_alerts: batch.resource_alerts.clone(),
            telemetry: batch.telemetry.clone(),
            secrets: batch.secrets.clone(),
            shutdown_context: batch.shutdown_context.clone(),
            user_profiles,
            adapter_channels: batch.adapter_channels.clone(),
            available_tools: batch.available_tools.clone(),
        })
    }

    /// Channel resolution, first hit wins:
    ///
    /// 1. task context channel
    /// 2. thought context channel id
    /// 3. thought context nested channel context
    /// 4. the task's own channel column
    /// 5. configured home channel for the adapter kind
    /// 6. `"UNKNOWN"` with a warning
    pub fn resolve_channel_id(&self, task: Option<&Task>, thought: &Thought) -> String {
        if let Some(channel) = task
            .and_then(|t| t.context.channel_context.as_ref())
            .map(|c| c.channel_id.clone())
            .filter(|c| !c.trim().is_empty())
        {
            return channel;
        }

        if let Some(channel) = thought
            .context
            .channel_id
            .clone()
            .filter(|c| !c.trim().is_empty())
        {
            return channel;
        }

        if let Some(channel) = thought
            .context
            .channel_context
            .as_ref()
            .map(|c| c.channel_id.clone())
            .filter(|c| !c.trim().is_empty())
        {
            return channel;
        }

        if let Some(channel) = task
            .map(|t| t.channel_id.clone())
            .filter(|c| !c.trim().is_empty())
        {
            return channel;
        }

        let adapter_hint = thought
            .context
            .channel_context
            .as_ref()
            .and_then(|c| c.adapter.clone());
        if let Some(channel) = adapter_hint
            .and_then(|a| self.home_channels.get(&a).cloned())
            .or_else(|| self.home_channels.values().next().cloned())
        {
            return channel;
        }

        warn!(
            thought_id = %thought.thought_id,
            "No channel source resolved; falling back to UNKNOWN"
        );
        UNKNOWN_CHANNEL.to_string()
    }

    /// Resource alerts for the snapshot
    ///
    /// A missing or failing monitor is itself a critical alert, never
    /// silent.
    fn resource_alerts(&self) -> Vec<String> {
        let Some(monitor) = &self.resources else {
            return vec![
                "🚨 CRITICAL! Resource monitor unavailable - resource state unknown!".to_string(),
            ];
        };

        let snapshot = monitor.snapshot();
        let mut alerts = Vec::new();

        for breach in &snapshot.critical {
            alerts.push(format!(
                "🚨 CRITICAL! RESOURCE LIMIT BREACHED! {} - REJECT OR DEFER ALL TASKS!",
                breach
            ));
        }
        if !snapshot.healthy && snapshot.critical.is_empty() {
            alerts.push(
                "🚨 CRITICAL! SYSTEM UNHEALTHY! RESOURCE LIMITS EXCEEDED - IMMEDIATE ACTION REQUIRED!"
                    .to_string(),
            );
        }

        alerts
    }

    async fn enrich_user_profiles(
        &self,
        thought: &Thought,
    ) -> Result<Vec<crate::schemas::UserProfile>> {
        profiles::enrich_user_profiles(
            &self.memory,
            &self.telemetry,
            self.profile_provider.as_deref(),
            thought,
        )
        .await
    }
}

fn task_summary(task: &Task) -> TaskSummary {
    TaskSummary {
        task_id: task.task_id.clone(),
        channel_id: task.channel_id.clone(),
        description: task.description.clone(),
        status: task.status.as_str().to_string(),
        priority: task.priority,
        created_at: task.created_at,
        parent_task_id: task.parent_task_id.clone(),
    }
}

fn thought_summary(thought: &Thought) -> ThoughtSummary {
    ThoughtSummary {
        thought_id: thought.thought_id.clone(),
        content: thought.content.clone(),
        status: thought.status.as_str().to_string(),
        source_task_id: thought.source_task_id.clone(),
        thought_type: thought.thought_type.as_str().to_string(),
        thought_depth: thought.thought_depth,
    }
}
