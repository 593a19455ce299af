//! Action types and their parameter schemas.
//!
//! `ActionParameters` is a sum type: parameters are validated against the
//! declared action at parse time, so untyped maps never cross the core
//! boundary. A mismatch is reported as a validation error string that the
//! pipeline folds into a PONDER fallback.

use super::graph::GraphScope;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The superset of actions the agent can select
///
/// The identity profile's `permitted_actions` restricts this set; unknown
/// or non-permitted actions are rejected at validation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Speak,
    Observe,
    Memorize,
    Recall,
    Forget,
    Tool,
    Defer,
    Reject,
    Ponder,
    TaskComplete,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Speak => "speak",
            Self::Observe => "observe",
            Self::Memorize => "memorize",
            Self::Recall => "recall",
            Self::Forget => "forget",
            Self::Tool => "tool",
            Self::Defer => "defer",
            Self::Reject => "reject",
            Self::Ponder => "ponder",
            Self::TaskComplete => "task_complete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "speak" => Some(Self::Speak),
            "observe" => Some(Self::Observe),
            "memorize" => Some(Self::Memorize),
            "recall" => Some(Self::Recall),
            "forget" => Some(Self::Forget),
            "tool" => Some(Self::Tool),
            "defer" => Some(Self::Defer),
            "reject" => Some(Self::Reject),
            "ponder" => Some(Self::Ponder),
            "task_complete" => Some(Self::TaskComplete),
            _ => None,
        }
    }

    /// All actions, in a stable order
    pub fn all() -> &'static [ActionType] {
        &[
            Self::Speak,
            Self::Observe,
            Self::Memorize,
            Self::Recall,
            Self::Forget,
            Self::Tool,
            Self::Defer,
            Self::Reject,
            Self::Ponder,
            Self::TaskComplete,
        ]
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakParams {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObserveParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorizeParams {
    pub knowledge_unit_description: String,
    pub knowledge_data: serde_json::Value,
    #[serde(default)]
    pub scope: GraphScope,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallParams {
    pub node_id: String,
    #[serde(default)]
    pub scope: GraphScope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForgetParams {
    pub node_id: String,
    pub reason: String,
    #[serde(default)]
    pub scope: GraphScope,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParams {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferParams {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectParams {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PonderParams {
    pub key_questions: Vec<String>,
}

fn default_completion_reason() -> String {
    "Task completed".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompleteParams {
    #[serde(default = "default_completion_reason")]
    pub completion_reason: String,
}

/// Parameters validated against the selected action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionParameters {
    Speak(SpeakParams),
    Observe(ObserveParams),
    Memorize(MemorizeParams),
    Recall(RecallParams),
    Forget(ForgetParams),
    Tool(ToolParams),
    Defer(DeferParams),
    Reject(RejectParams),
    Ponder(PonderParams),
    TaskComplete(TaskCompleteParams),
}

impl ActionParameters {
    /// Validate raw parameters against the declared action
    ///
    /// The error string carries enough detail (missing field names, type
    /// mismatches) to be surfaced in a PONDER fallback.
    pub fn parse(action: ActionType, raw: &serde_json::Value) -> Result<Self, String> {
        fn of<T: serde::de::DeserializeOwned>(
            action: ActionType,
            raw: &serde_json::Value,
        ) -> Result<T, String> {
            serde_json::from_value(raw.clone()).map_err(|e| {
                format!("validation error for {} parameters: {}", action.as_str(), e)
            })
        }

        let params = match action {
            ActionType::Speak => {
                let p: SpeakParams = of(action, raw)?;
                if p.content.trim().is_empty() {
                    return Err("validation error for speak parameters: content must not be empty"
                        .to_string());
                }
                Self::Speak(p)
            }
            ActionType::Observe => Self::Observe(of(action, raw)?),
            ActionType::Memorize => Self::Memorize(of(action, raw)?),
            ActionType::Recall => Self::Recall(of(action, raw)?),
            ActionType::Forget => Self::Forget(of(action, raw)?),
            ActionType::Tool => Self::Tool(of(action, raw)?),
            ActionType::Defer => Self::Defer(of(action, raw)?),
            ActionType::Reject => Self::Reject(of(action, raw)?),
            ActionType::Ponder => {
                let p: PonderParams = of(action, raw)?;
                if p.key_questions.is_empty() {
                    return Err(
                        "validation error for ponder parameters: key_questions must not be empty"
                            .to_string(),
                    );
                }
                Self::Ponder(p)
            }
            ActionType::TaskComplete => Self::TaskComplete(of(action, raw)?),
        };

        Ok(params)
    }

    pub fn action_type(&self) -> ActionType {
        match self {
            Self::Speak(_) => ActionType::Speak,
            Self::Observe(_) => ActionType::Observe,
            Self::Memorize(_) => ActionType::Memorize,
            Self::Recall(_) => ActionType::Recall,
            Self::Forget(_) => ActionType::Forget,
            Self::Tool(_) => ActionType::Tool,
            Self::Defer(_) => ActionType::Defer,
            Self::Reject(_) => ActionType::Reject,
            Self::Ponder(_) => ActionType::Ponder,
            Self::TaskComplete(_) => ActionType::TaskComplete,
        }
    }
}
