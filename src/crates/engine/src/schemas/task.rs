//! Task model and lifecycle statuses.

use super::graph::ContextExtras;
use super::snapshot::ChannelContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a task
///
/// COMPLETED and FAILED are terminal and immutable: a terminal task
/// produces no new thoughts and its status is never overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Deferred,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Deferred => "deferred",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "deferred" => Some(Self::Deferred),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Typed context carried by a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_context: Option<ChannelContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    #[serde(default, skip_serializing_if = "ContextExtras::is_empty")]
    pub extras: ContextExtras,
}

/// Recorded outcome of a terminal task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub summary: String,
    #[serde(default, skip_serializing_if = "ContextExtras::is_empty")]
    pub extras: ContextExtras,
}

impl TaskOutcome {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            extras: ContextExtras::new(),
        }
    }
}

/// A unit of agent-authored work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub channel_id: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub context: TaskContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<TaskOutcome>,
}

impl Task {
    /// Create a new PENDING task with a generated id
    pub fn new(
        description: impl Into<String>,
        channel_id: impl Into<String>,
        priority: i32,
        now: DateTime<Utc>,
    ) -> Self {
        let channel_id = channel_id.into();
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            channel_id: channel_id.clone(),
            description: description.into(),
            status: TaskStatus::Pending,
            priority,
            parent_task_id: None,
            created_at: now,
            updated_at: now,
            context: TaskContext {
                channel_context: Some(ChannelContext::new(channel_id)),
                ..TaskContext::default()
            },
            outcome: None,
        }
    }

    pub fn with_parent(mut self, parent_task_id: impl Into<String>) -> Self {
        self.parent_task_id = Some(parent_task_id.into());
        self
    }

    pub fn with_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Active.is_terminal());
        assert!(!TaskStatus::Deferred.is_terminal());
    }

    #[test]
    fn test_status_parse_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Active,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Deferred,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("running"), None);
    }

    #[test]
    fn test_task_serde_round_trip() {
        let task = Task::new("greet the user", "test_channel", 3, Utc::now())
            .with_parent("root-1");

        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(task, back);
    }

    #[test]
    fn test_new_task_carries_channel_context() {
        let task = Task::new("observe", "chan-9", 0, Utc::now());
        assert_eq!(
            task.context.channel_context.as_ref().unwrap().channel_id,
            "chan-9"
        );
        assert_eq!(task.status, TaskStatus::Pending);
    }
}
