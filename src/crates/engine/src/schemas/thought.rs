//! Thought model: units of cognition generated from tasks.

use super::action::{ActionParameters, ActionType};
use super::graph::ContextExtras;
use super::snapshot::ChannelContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of thought
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtType {
    Standard,
    Seed,
    Guidance,
    MemoryMeta,
    Observation,
}

impl ThoughtType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Seed => "seed",
            Self::Guidance => "guidance",
            Self::MemoryMeta => "memory_meta",
            Self::Observation => "observation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "standard" => Some(Self::Standard),
            "seed" => Some(Self::Seed),
            "guidance" => Some(Self::Guidance),
            "memory_meta" => Some(Self::MemoryMeta),
            "observation" => Some(Self::Observation),
            _ => None,
        }
    }
}

/// Lifecycle status of a thought
///
/// A thought makes exactly one terminal transition: to COMPLETED, FAILED,
/// or DEFERRED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThoughtStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Deferred,
}

impl ThoughtStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Deferred => "deferred",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "deferred" => Some(Self::Deferred),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Deferred)
    }
}

/// Typed context carried by a thought
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ThoughtContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_context: Option<ChannelContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Questions carried forward from a prior PONDER round
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ponder_notes: Vec<String>,
    #[serde(default, skip_serializing_if = "ContextExtras::is_empty")]
    pub extras: ContextExtras,
}

/// Terminal record of what a thought resolved to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FinalAction {
    /// The selected and dispatched action
    Action {
        action: ActionType,
        parameters: ActionParameters,
        rationale: String,
    },
    /// The error that terminated the thought
    Error { error_kind: String, message: String },
}

impl FinalAction {
    pub fn error(error_kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            error_kind: error_kind.into(),
            message: message.into(),
        }
    }

    pub fn action_type(&self) -> Option<ActionType> {
        match self {
            Self::Action { action, .. } => Some(*action),
            Self::Error { .. } => None,
        }
    }
}

/// A unit of cognition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thought {
    pub thought_id: String,
    pub source_task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_thought_id: Option<String>,
    pub thought_type: ThoughtType,
    pub status: ThoughtStatus,
    pub round_number: i32,
    pub thought_depth: i32,
    pub content: String,
    #[serde(default)]
    pub context: ThoughtContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_action: Option<FinalAction>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Thought {
    /// Create a new PENDING thought with a generated id
    pub fn new(
        source_task_id: impl Into<String>,
        thought_type: ThoughtType,
        content: impl Into<String>,
        round_number: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            thought_id: format!("th-{}", uuid::Uuid::new_v4()),
            source_task_id: source_task_id.into(),
            parent_thought_id: None,
            thought_type,
            status: ThoughtStatus::Pending,
            round_number,
            thought_depth: 0,
            content: content.into(),
            context: ThoughtContext::default(),
            final_action: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a follow-up thought one level deeper than its parent
    ///
    /// Depth bounds are the caller's responsibility; the constructor only
    /// does the bookkeeping.
    pub fn follow_up(
        parent: &Thought,
        thought_type: ThoughtType,
        content: impl Into<String>,
        round_number: i32,
        now: DateTime<Utc>,
    ) -> Self {
        let mut thought = Self::new(
            parent.source_task_id.clone(),
            thought_type,
            content,
            round_number,
            now,
        );
        thought.parent_thought_id = Some(parent.thought_id.clone());
        thought.thought_depth = parent.thought_depth + 1;
        thought.context = parent.context.clone();
        thought
    }

    pub fn with_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.context.channel_id = Some(channel_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thought_serde_round_trip() {
        let mut thought = Thought::new("task-1", ThoughtType::Seed, "first pass", 0, Utc::now())
            .with_channel("chan");
        thought.final_action = Some(FinalAction::error("dispatch_failure", "no comm service"));

        let json = serde_json::to_string(&thought).unwrap();
        let back: Thought = serde_json::from_str(&json).unwrap();
        assert_eq!(thought, back);
    }

    #[test]
    fn test_follow_up_increments_depth_and_links_parent() {
        let parent = Thought::new("task-1", ThoughtType::Seed, "seed", 0, Utc::now());
        let child = Thought::follow_up(&parent, ThoughtType::Standard, "again", 1, Utc::now());

        assert_eq!(child.thought_depth, 1);
        assert_eq!(child.parent_thought_id.as_deref(), Some(parent.thought_id.as_str()));
        assert_eq!(child.source_task_id, parent.source_task_id);
        assert_eq!(child.status, ThoughtStatus::Pending);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ThoughtStatus::Completed.is_terminal());
        assert!(ThoughtStatus::Failed.is_terminal());
        assert!(ThoughtStatus::Deferred.is_terminal());
        assert!(!ThoughtStatus::Pending.is_terminal());
        assert!(!ThoughtStatus::Processing.is_terminal());
    }
}
