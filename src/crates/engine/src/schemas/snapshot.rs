//! The per-thought `SystemSnapshot` and its constituent summaries.

use super::graph::ContextExtras;
use super::identity::AgentIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Channel identity as seen by an adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelContext {
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    /// Adapter kind that owns the channel ("cli", "api", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter: Option<String>,
}

impl ChannelContext {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            channel_name: None,
            adapter: None,
        }
    }

    pub fn with_adapter(mut self, adapter: impl Into<String>) -> Self {
        self.adapter = Some(adapter.into());
        self
    }
}

/// Compact view of a thought for prompts and status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThoughtSummary {
    pub thought_id: String,
    pub content: String,
    pub status: String,
    pub source_task_id: String,
    pub thought_type: String,
    pub thought_depth: i32,
}

/// Compact view of a task for prompts and status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: String,
    pub channel_id: String,
    pub description: String,
    pub status: String,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
}

/// Enriched view of a user mentioned by the current thought
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "ContextExtras::is_empty")]
    pub attributes: ContextExtras,
    /// Node ids reachable within two hops of the user node
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connected_nodes: Vec<String>,
    /// Cross-channel message samples from recent correlations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_messages: Vec<String>,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }
}

/// Rolled-up telemetry aggregates for the snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TelemetrySummary {
    pub total_correlations: u64,
    pub requests_last_hour: u64,
    pub failures_last_hour: u64,
    pub average_latency_ms: f64,
}

/// What the secrets service is willing to reveal about itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SecretsSnapshot {
    /// UUIDs of recently detected secrets (never the values)
    pub detected_secrets: Vec<String>,
    pub total_secrets: u64,
    pub filter_version: u32,
}

/// Context of an in-progress shutdown, when one is pending
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownContext {
    pub reason: String,
    pub requested_at: DateTime<Utc>,
}

/// Immutable per-thought aggregate handed to the DMA pipeline and
/// conscience.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SystemSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_context: Option<ChannelContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<TaskSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_thought: Option<ThoughtSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_completed_tasks: Vec<TaskSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_pending_tasks: Vec<TaskSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_identity: Option<AgentIdentity>,
    /// Healthy flag per registered service ("kind/name" keys)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub service_health: BTreeMap<String, bool>,
    /// Circuit breaker state per registered service
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub circuit_breakers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_alerts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<TelemetrySummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<SecretsSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutdown_context: Option<ShutdownContext>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_profiles: Vec<UserProfile>,
    /// Channels known to each adapter kind
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub adapter_channels: BTreeMap<String, Vec<ChannelContext>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub available_tools: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_default_is_empty() {
        let snapshot = SystemSnapshot::default();
        assert!(snapshot.channel_id.is_none());
        assert!(snapshot.resource_alerts.is_empty());
        assert!(snapshot.user_profiles.is_empty());
    }

    #[test]
    fn test_snapshot_serde_round_trip() {
        let snapshot = SystemSnapshot {
            channel_id: Some("chan".into()),
            resource_alerts: vec!["🚨 CRITICAL! tokens_day".into()],
            ..SystemSnapshot::default()
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: SystemSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snapshot, back);
    }

    #[test]
    fn test_channel_context_builder() {
        let ctx = ChannelContext::new("cli-home").with_adapter("cli");
        assert_eq!(ctx.channel_id, "cli-home");
        assert_eq!(ctx.adapter.as_deref(), Some("cli"));
    }
}
