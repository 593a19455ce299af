//! Visibility service: reasoning traces for transparency.
//!
//! Reconstructs, from persistence, what the agent thought and did for a
//! task: every thought in order with its status, depth, and resolved
//! action.

use crate::error::Result;
use crate::persistence::Persistence;
use crate::schemas::FinalAction;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// One thought in a task's trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThoughtTraceEntry {
    pub thought_id: String,
    pub thought_type: String,
    pub status: String,
    pub thought_depth: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_action: Option<String>,
    pub content: String,
}

/// The full reasoning trace of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTrace {
    pub task_id: String,
    pub description: String,
    pub status: String,
    pub thoughts: Vec<ThoughtTraceEntry>,
}

/// Read-only transparency surface over persistence
#[derive(Clone)]
pub struct VisibilityService {
    persistence: Arc<Persistence>,
}

impl VisibilityService {
    pub fn new(persistence: Arc<Persistence>) -> Self {
        Self { persistence }
    }

    /// The reasoning trace for one task, or `None` when it is unknown
    pub async fn task_trace(&self, task_id: &str) -> Result<Option<TaskTrace>> {
        let Some(task) = self.persistence.tasks.get(task_id).await? else {
            return Ok(None);
        };

        let thoughts = self.persistence.thoughts.for_task(task_id).await?;
        let entries = thoughts
            .into_iter()
            .map(|thought| ThoughtTraceEntry {
                thought_id: thought.thought_id,
                thought_type: thought.thought_type.as_str().to_string(),
                status: thought.status.as_str().to_string(),
                thought_depth: thought.thought_depth,
                resolved_action: match &thought.final_action {
                    Some(FinalAction::Action { action, .. }) => {
                        Some(action.as_str().to_string())
                    }
                    Some(FinalAction::Error { error_kind, .. }) => Some(error_kind.clone()),
                    None => None,
                },
                content: thought.content,
            })
            .collect();

        Ok(Some(TaskTrace {
            task_id: task.task_id,
            description: task.description,
            status: task.status.as_str().to_string(),
            thoughts: entries,
        }))
    }

    pub async fn stop(&self) {
        info!("Visibility service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, MigrationSet};
    use crate::schemas::{
        ActionParameters, ActionType, SpeakParams, Task, TaskStatus, Thought, ThoughtStatus,
        ThoughtType,
    };
    use chrono::Utc;

    async fn setup() -> (VisibilityService, Arc<Persistence>) {
        let db = Database::test_in_memory(MigrationSet::Engine).await.unwrap();
        let persistence = Arc::new(Persistence::new(db));
        (VisibilityService::new(persistence.clone()), persistence)
    }

    #[tokio::test]
    async fn test_trace_walks_thoughts_in_order() {
        let (visibility, persistence) = setup().await;
        let now = Utc::now();

        let task = Task::new("greet the user", "chan", 0, now).with_status(TaskStatus::Active);
        persistence.tasks.insert(&task).await.unwrap();

        let seed = Thought::new(&task.task_id, ThoughtType::Seed, "greet", 0, now);
        persistence.thoughts.insert(&seed).await.unwrap();
        persistence
            .thoughts
            .update_status(
                &seed.thought_id,
                ThoughtStatus::Completed,
                Some(&FinalAction::Action {
                    action: ActionType::Speak,
                    parameters: ActionParameters::Speak(SpeakParams {
                        content: "hello".into(),
                    }),
                    rationale: "greeting".into(),
                }),
                now,
            )
            .await
            .unwrap();

        let follow_up = Thought::follow_up(&seed, ThoughtType::Standard, "again", 1, now);
        persistence.thoughts.insert(&follow_up).await.unwrap();

        let trace = visibility.task_trace(&task.task_id).await.unwrap().unwrap();
        assert_eq!(trace.description, "greet the user");
        assert_eq!(trace.thoughts.len(), 2);
        assert_eq!(trace.thoughts[0].resolved_action.as_deref(), Some("speak"));
        assert_eq!(trace.thoughts[1].thought_depth, 1);
        assert!(trace.thoughts[1].resolved_action.is_none());
    }

    #[tokio::test]
    async fn test_unknown_task_is_none() {
        let (visibility, _) = setup().await;
        assert!(visibility.task_trace("missing").await.unwrap().is_none());
    }
}
