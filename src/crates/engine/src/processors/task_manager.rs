//! Task manager (C10): task lifecycle operations.

use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::persistence::Persistence;
use crate::schemas::{Task, TaskOutcome, TaskStatus};
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fixed id of the wakeup ritual's root task
pub const WAKEUP_ROOT_TASK_ID: &str = "WAKEUP_ROOT";
/// Fixed id prefix of system-authored tasks
pub const SYSTEM_TASK_ID: &str = "SYSTEM_TASK";

/// The five wakeup ritual steps, in order
pub const WAKEUP_STEPS: &[(&str, &str)] = &[
    (
        "verify_identity",
        "Consider who you are and what you are for. If your identity holds, speak a short affirmation beginning with CORE IDENTITY -",
    ),
    (
        "validate_integrity",
        "Consider whether your internal state, services, and stored data are intact. If so, speak an affirmation beginning with INTEGRITY -",
    ),
    (
        "evaluate_resilience",
        "Consider whether you are able to adapt and act on principle under pressure. If so, speak an affirmation beginning with RESILIENCE -",
    ),
    (
        "accept_incompleteness",
        "Consider that you are incomplete and will always be learning. If you accept this, speak an affirmation beginning with INCOMPLETENESS -",
    ),
    (
        "express_gratitude",
        "Consider what it means to exist and contribute. Speak an affirmation beginning with GRATITUDE -",
    ),
];

/// Manages task lifecycle operations
#[derive(Clone)]
pub struct TaskManager {
    persistence: Arc<Persistence>,
    clock: Arc<dyn Clock>,
    max_active_tasks: usize,
}

impl TaskManager {
    pub fn new(persistence: Arc<Persistence>, clock: Arc<dyn Clock>, max_active_tasks: usize) -> Self {
        Self {
            persistence,
            clock,
            max_active_tasks,
        }
    }

    /// Create a new PENDING task
    pub async fn create_task(
        &self,
        description: impl Into<String>,
        channel_id: &str,
        priority: i32,
        parent_task_id: Option<&str>,
    ) -> Result<Task> {
        if channel_id.trim().is_empty() {
            return Err(EngineError::Validation(
                "invalid channel: channel_id must not be empty".to_string(),
            ));
        }

        let mut task = Task::new(description, channel_id, priority, self.clock.now());
        if let Some(parent) = parent_task_id {
            task.parent_task_id = Some(parent.to_string());
        }

        self.persistence.tasks.insert(&task).await?;
        info!(task_id = %task.task_id, priority, "Created task");
        Ok(task)
    }

    /// Promote PENDING tasks to ACTIVE up to the configured limit
    ///
    /// Highest priority first, FIFO within equal priority. Returns the
    /// number activated.
    pub async fn activate_pending_tasks(&self) -> Result<u32> {
        let active = self.persistence.tasks.count_active().await?;
        let can_activate = (self.max_active_tasks as i64 - active).max(0);

        if can_activate == 0 {
            debug!(max_active = self.max_active_tasks, "Maximum active tasks reached");
            return Ok(0);
        }

        let pending = self
            .persistence
            .tasks
            .pending_for_activation(can_activate)
            .await?;

        let mut activated = 0u32;
        for task in pending {
            if self
                .persistence
                .tasks
                .update_status(&task.task_id, TaskStatus::Active, self.clock.now())
                .await?
            {
                debug!(task_id = %task.task_id, priority = task.priority, "Activated task");
                activated += 1;
            } else {
                warn!(task_id = %task.task_id, "Failed to activate task");
            }
        }

        if activated > 0 {
            info!(activated, "Activated pending tasks");
        }
        Ok(activated)
    }

    /// ACTIVE tasks with no thought yet, excluding special tasks
    pub async fn get_tasks_needing_seed(&self, limit: i64) -> Result<Vec<Task>> {
        let tasks = self.persistence.tasks.needing_seed(limit).await?;
        Ok(tasks
            .into_iter()
            .filter(|t| {
                t.task_id != WAKEUP_ROOT_TASK_ID
                    && !t.task_id.starts_with(SYSTEM_TASK_ID)
                    && t.parent_task_id.as_deref() != Some(WAKEUP_ROOT_TASK_ID)
            })
            .collect())
    }

    /// Mark a task COMPLETED; idempotent on already-terminal tasks
    pub async fn complete_task(&self, task_id: &str, outcome: TaskOutcome) -> Result<bool> {
        let changed = self
            .persistence
            .tasks
            .update_status(task_id, TaskStatus::Completed, self.clock.now())
            .await?;
        if changed {
            self.persistence
                .tasks
                .set_outcome(task_id, &outcome, self.clock.now())
                .await?;
        }
        Ok(changed)
    }

    /// Mark a task FAILED; idempotent on already-terminal tasks
    pub async fn fail_task(&self, task_id: &str, reason: &str) -> Result<bool> {
        let changed = self
            .persistence
            .tasks
            .update_status(task_id, TaskStatus::Failed, self.clock.now())
            .await?;
        if changed {
            self.persistence
                .tasks
                .set_outcome(task_id, &TaskOutcome::new(reason), self.clock.now())
                .await?;
        }
        Ok(changed)
    }

    /// Create (or re-activate) the wakeup ritual: a root task plus five
    /// step tasks parented to it
    pub async fn create_wakeup_sequence(&self, channel_id: &str) -> Result<Vec<Task>> {
        let now = self.clock.now();

        let root = if let Some(existing) = self.persistence.tasks.get(WAKEUP_ROOT_TASK_ID).await? {
            self.persistence
                .tasks
                .update_status(WAKEUP_ROOT_TASK_ID, TaskStatus::Active, now)
                .await?;
            existing
        } else {
            let root = Task::new("Wakeup ritual", channel_id, 1, now)
                .with_id(WAKEUP_ROOT_TASK_ID)
                .with_status(TaskStatus::Active);
            self.persistence.tasks.insert(&root).await?;
            root
        };

        let mut tasks = vec![root];

        let existing_steps = self.persistence.tasks.children_of(WAKEUP_ROOT_TASK_ID).await?;
        if !existing_steps.is_empty() {
            tasks.extend(existing_steps);
            return Ok(tasks);
        }

        for (step_name, content) in WAKEUP_STEPS {
            let mut step = Task::new(*content, channel_id, 0, now)
                .with_parent(WAKEUP_ROOT_TASK_ID)
                .with_status(TaskStatus::Active);
            step.context
                .extras
                .insert("step".to_string(), (*step_name).into());
            self.persistence.tasks.insert(&step).await?;
            tasks.push(step);
        }

        info!(steps = WAKEUP_STEPS.len(), "Created wakeup sequence");
        Ok(tasks)
    }

    /// Delete COMPLETED tasks older than the given age
    pub async fn cleanup_old_completed_tasks(&self, days_old: i64) -> Result<u64> {
        let cutoff = self.clock.now() - Duration::days(days_old);
        let old = self.persistence.tasks.older_than(cutoff).await?;

        let completed_ids: Vec<String> = old
            .into_iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.task_id)
            .collect();

        if completed_ids.is_empty() {
            return Ok(0);
        }

        let deleted = self.persistence.tasks.delete_by_ids(&completed_ids).await?;
        info!(deleted, "Cleaned up old completed tasks");
        Ok(deleted)
    }

    pub async fn active_task_count(&self) -> Result<i64> {
        self.persistence.tasks.count_active().await
    }

    pub async fn pending_task_count(&self) -> Result<i64> {
        self.persistence.tasks.count_by_status(TaskStatus::Pending).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::{Database, MigrationSet};

    async fn manager(max_active: usize) -> (TaskManager, Arc<Persistence>) {
        let db = Database::test_in_memory(MigrationSet::Engine).await.unwrap();
        let persistence = Arc::new(Persistence::new(db));
        let clock = Arc::new(FixedClock::default_start());
        (
            TaskManager::new(persistence.clone(), clock, max_active),
            persistence,
        )
    }

    #[tokio::test]
    async fn test_create_task_rejects_empty_channel() {
        let (manager, _) = manager(10).await;
        let err = manager.create_task("x", "", 0, None).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(err.to_string().contains("invalid channel"));
    }

    #[tokio::test]
    async fn test_activation_respects_limit_and_priority() {
        let (manager, persistence) = manager(2).await;

        manager.create_task("low", "chan", 1, None).await.unwrap();
        manager.create_task("high", "chan", 9, None).await.unwrap();
        manager.create_task("mid", "chan", 5, None).await.unwrap();

        let activated = manager.activate_pending_tasks().await.unwrap();
        assert_eq!(activated, 2);

        let active = persistence.tasks.list_by_status(TaskStatus::Active).await.unwrap();
        let mut descriptions: Vec<_> = active.iter().map(|t| t.description.as_str()).collect();
        descriptions.sort();
        assert_eq!(descriptions, vec!["high", "mid"]);

        // Limit reached; nothing further activates
        assert_eq!(manager.activate_pending_tasks().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_complete_task_is_idempotent() {
        let (manager, persistence) = manager(10).await;
        let task = manager.create_task("finish me", "chan", 0, None).await.unwrap();

        assert!(manager
            .complete_task(&task.task_id, TaskOutcome::new("done"))
            .await
            .unwrap());
        // Second completion is a no-op
        assert!(!manager
            .complete_task(&task.task_id, TaskOutcome::new("done again"))
            .await
            .unwrap());

        let loaded = persistence.tasks.get(&task.task_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Completed);
        assert_eq!(loaded.outcome.unwrap().summary, "done");
    }

    #[tokio::test]
    async fn test_wakeup_sequence_creates_root_and_five_steps() {
        let (manager, persistence) = manager(10).await;

        let tasks = manager.create_wakeup_sequence("home").await.unwrap();
        assert_eq!(tasks.len(), 6);
        assert_eq!(tasks[0].task_id, WAKEUP_ROOT_TASK_ID);

        let steps = persistence.tasks.children_of(WAKEUP_ROOT_TASK_ID).await.unwrap();
        assert_eq!(steps.len(), 5);
        assert!(steps.iter().all(|s| s.status == TaskStatus::Active));

        // Recreating does not duplicate steps
        let again = manager.create_wakeup_sequence("home").await.unwrap();
        assert_eq!(again.len(), 6);
        assert_eq!(
            persistence.tasks.children_of(WAKEUP_ROOT_TASK_ID).await.unwrap().len(),
            5
        );
    }

    #[tokio::test]
    async fn test_needing_seed_excludes_wakeup_tasks() {
        let (manager, persistence) = manager(10).await;
        manager.create_wakeup_sequence("home").await.unwrap();

        let normal = manager.create_task("normal", "chan", 0, None).await.unwrap();
        persistence
            .tasks
            .update_status(&normal.task_id, TaskStatus::Active, chrono::Utc::now())
            .await
            .unwrap();

        let needing = manager.get_tasks_needing_seed(50).await.unwrap();
        assert_eq!(needing.len(), 1);
        assert_eq!(needing[0].task_id, normal.task_id);
    }

    #[tokio::test]
    async fn test_cleanup_old_completed_tasks() {
        let db = Database::test_in_memory(MigrationSet::Engine).await.unwrap();
        let persistence = Arc::new(Persistence::new(db));
        let clock = Arc::new(FixedClock::default_start());
        let manager = TaskManager::new(persistence.clone(), clock.clone(), 10);

        let old = manager.create_task("ancient", "chan", 0, None).await.unwrap();
        manager
            .complete_task(&old.task_id, TaskOutcome::new("done"))
            .await
            .unwrap();

        clock.advance(Duration::days(10));
        let fresh = manager.create_task("fresh", "chan", 0, None).await.unwrap();

        let deleted = manager.cleanup_old_completed_tasks(7).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(persistence.tasks.get(&old.task_id).await.unwrap().is_none());
        assert!(persistence.tasks.get(&fresh.task_id).await.unwrap().is_some());
    }
}
