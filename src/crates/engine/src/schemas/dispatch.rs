//! Dispatch context: everything a handler needs to execute an action.

use super::action::ActionType;
use super::conscience::ConscienceVerdict;
use super::task::Task;
use super::thought::Thought;
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Typed context assembled just before an action is executed
///
/// A missing channel id is fatal here: by dispatch time every thought must
/// have resolved a concrete channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchContext {
    pub channel_id: String,
    pub author_id: String,
    pub author_name: String,
    pub origin_service: String,
    pub handler_name: String,
    pub action_type: ActionType,
    pub thought_id: String,
    pub task_id: String,
    pub source_task_id: String,
    pub event_summary: String,
    pub event_timestamp: DateTime<Utc>,
    pub correlation_id: String,
    pub round_number: i32,
    #[serde(default)]
    pub wa_authorized: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub guardrail_verdicts: Vec<ConscienceVerdict>,
}

/// Build a dispatch context from a thought and its task
///
/// Channel resolution at this layer is strict: task context, thought
/// context, then the task's own channel column. No fallback to a home
/// channel and never `"UNKNOWN"`.
pub fn build_dispatch_context(
    thought: &Thought,
    task: Option<&Task>,
    action_type: ActionType,
    origin_service: &str,
    handler_name: &str,
    round_number: i32,
    guardrail_verdicts: Vec<ConscienceVerdict>,
    now: DateTime<Utc>,
) -> Result<DispatchContext> {
    let channel_id = task
        .and_then(|t| {
            t.context
                .channel_context
                .as_ref()
                .map(|c| c.channel_id.clone())
        })
        .or_else(|| thought.context.channel_id.clone())
        .or_else(|| {
            thought
                .context
                .channel_context
                .as_ref()
                .map(|c| c.channel_id.clone())
        })
        .or_else(|| task.map(|t| t.channel_id.clone()))
        .filter(|c| !c.trim().is_empty());

    let channel_id = channel_id.ok_or_else(|| {
        EngineError::Dispatch(format!(
            "no channel_id found for thought {}; adapters must provide one in task context",
            thought.thought_id
        ))
    })?;

    let (author_id, author_name) = task
        .map(|t| {
            (
                t.context.author_id.clone().unwrap_or_else(|| "unknown".into()),
                t.context
                    .author_name
                    .clone()
                    .unwrap_or_else(|| "Unknown".into()),
            )
        })
        .unwrap_or_else(|| ("unknown".into(), "Unknown".into()));

    Ok(DispatchContext {
        channel_id,
        author_id,
        author_name,
        origin_service: origin_service.to_string(),
        handler_name: handler_name.to_string(),
        action_type,
        thought_id: thought.thought_id.clone(),
        task_id: task.map(|t| t.task_id.clone()).unwrap_or_default(),
        source_task_id: thought.source_task_id.clone(),
        event_summary: summarize(&thought.content),
        event_timestamp: now,
        correlation_id: uuid::Uuid::new_v4().to_string(),
        round_number,
        wa_authorized: false,
        guardrail_verdicts,
    })
}

fn summarize(content: &str) -> String {
    const LIMIT: usize = 140;
    let line = content.lines().next().unwrap_or_default();
    if line.chars().count() <= LIMIT {
        line.to_string()
    } else {
        let cut: String = line.chars().take(LIMIT).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::thought::ThoughtType;

    #[test]
    fn test_channel_from_task_context_wins() {
        let task = Task::new("t", "task-channel", 0, Utc::now());
        let thought = Thought::new(&task.task_id, ThoughtType::Seed, "x", 0, Utc::now())
            .with_channel("thought-channel");

        let ctx = build_dispatch_context(
            &thought,
            Some(&task),
            ActionType::Speak,
            "cli",
            "speak_handler",
            1,
            vec![],
            Utc::now(),
        )
        .unwrap();

        assert_eq!(ctx.channel_id, "task-channel");
        assert_eq!(ctx.action_type, ActionType::Speak);
        assert_eq!(ctx.round_number, 1);
    }

    #[test]
    fn test_missing_channel_is_fatal() {
        let thought = Thought::new("task-x", ThoughtType::Seed, "x", 0, Utc::now());

        let err = build_dispatch_context(
            &thought,
            None,
            ActionType::Speak,
            "cli",
            "speak_handler",
            0,
            vec![],
            Utc::now(),
        )
        .unwrap_err();

        assert!(matches!(err, EngineError::Dispatch(_)));
    }

    #[test]
    fn test_thought_channel_used_without_task() {
        let thought =
            Thought::new("task-x", ThoughtType::Seed, "x", 0, Utc::now()).with_channel("chan-7");

        let ctx = build_dispatch_context(
            &thought,
            None,
            ActionType::Ponder,
            "cli",
            "ponder_handler",
            0,
            vec![],
            Utc::now(),
        )
        .unwrap();

        assert_eq!(ctx.channel_id, "chan-7");
        assert_eq!(ctx.author_id, "unknown");
    }

    #[test]
    fn test_event_summary_is_first_line_truncated() {
        let long = format!("{}\nsecond line", "x".repeat(200));
        let thought = Thought::new("t", ThoughtType::Seed, long, 0, Utc::now()).with_channel("c");

        let ctx = build_dispatch_context(
            &thought,
            None,
            ActionType::Speak,
            "cli",
            "speak_handler",
            0,
            vec![],
            Utc::now(),
        )
        .unwrap();

        assert!(ctx.event_summary.chars().count() <= 141);
        assert!(!ctx.event_summary.contains('\n'));
    }
}
