//! Task store: typed CRUD and the activation queries.

use crate::db::Database;
use crate::error::{EngineError, Result};
use crate::schemas::{Task, TaskContext, TaskOutcome, TaskStatus};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::warn;

/// Repository for task rows in the engine database
#[derive(Clone, Debug)]
pub struct TaskStore {
    db: Database,
}

const TASK_COLUMNS: &str = "task_id, channel_id, description, status, priority, parent_task_id, \
                            created_at, updated_at, context, outcome";

impl TaskStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new task
    pub async fn insert(&self, task: &Task) -> Result<()> {
        let context = serde_json::to_string(&task.context)?;
        let outcome = task
            .outcome
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO tasks (task_id, channel_id, description, status, priority, parent_task_id, \
                                created_at, updated_at, context, outcome)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&task.task_id)
        .bind(&task.channel_id)
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(task.priority)
        .bind(&task.parent_task_id)
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .bind(context)
        .bind(outcome)
        .execute(self.db.pool())
        .await
        .map_err(|e| EngineError::Persistence(format!("Failed to insert task: {}", e)))?;

        Ok(())
    }

    /// Fetch a task by id
    pub async fn get(&self, task_id: &str) -> Result<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {} FROM tasks WHERE task_id = ?", TASK_COLUMNS))
            .bind(task_id)
            .fetch_optional(self.db.pool())
            .await?;

        row.map(|r| task_from_row(&r)).transpose()
    }

    /// Whether a task exists
    pub async fn exists(&self, task_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE task_id = ?")
            .bind(task_id)
            .fetch_one(self.db.pool())
            .await?;
        Ok(count > 0)
    }

    /// Transition a task's status
    ///
    /// Terminal statuses are immutable: attempting to change a COMPLETED
    /// or FAILED task is a no-op returning `Ok(false)` with a warning.
    /// Returns `Ok(false)` for a missing task as well.
    pub async fn update_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(current) = self.get(task_id).await? else {
            warn!(task_id = %task_id, "Cannot update status of unknown task");
            return Ok(false);
        };

        if current.status.is_terminal() {
            if current.status != status {
                warn!(
                    task_id = %task_id,
                    current = current.status.as_str(),
                    requested = status.as_str(),
                    "Ignoring status change for terminal task"
                );
            }
            return Ok(false);
        }

        let result = sqlx::query("UPDATE tasks SET status = ?, updated_at = ? WHERE task_id = ?")
            .bind(status.as_str())
            .bind(now.to_rfc3339())
            .bind(task_id)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Record an outcome on a task
    pub async fn set_outcome(
        &self,
        task_id: &str,
        outcome: &TaskOutcome,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let outcome_json = serde_json::to_string(outcome)?;
        sqlx::query("UPDATE tasks SET outcome = ?, updated_at = ? WHERE task_id = ?")
            .bind(outcome_json)
            .bind(now.to_rfc3339())
            .bind(task_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// PENDING tasks eligible for activation: highest priority first, FIFO
    /// within equal priority
    pub async fn pending_for_activation(&self, limit: i64) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tasks WHERE status = 'pending' \
             ORDER BY priority DESC, created_at ASC LIMIT ?",
            TASK_COLUMNS
        ))
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    /// ACTIVE tasks that have no thought yet
    pub async fn needing_seed(&self, limit: i64) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tasks WHERE status = 'active' \
             AND task_id NOT IN (SELECT DISTINCT source_task_id FROM thoughts) \
             ORDER BY priority DESC, created_at ASC LIMIT ?",
            TASK_COLUMNS
        ))
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    /// Most recently completed tasks
    pub async fn recent_completed(&self, limit: i64) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tasks WHERE status = 'completed' \
             ORDER BY updated_at DESC LIMIT ?",
            TASK_COLUMNS
        ))
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    /// Highest-priority open tasks (pending or active)
    pub async fn top_tasks(&self, limit: i64) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tasks WHERE status IN ('pending', 'active') \
             ORDER BY priority DESC, created_at ASC LIMIT ?",
            TASK_COLUMNS
        ))
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    /// All tasks in a status
    pub async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tasks WHERE status = ? ORDER BY created_at ASC",
            TASK_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    /// Children of a parent task
    pub async fn children_of(&self, parent_task_id: &str) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tasks WHERE parent_task_id = ? ORDER BY created_at ASC",
            TASK_COLUMNS
        ))
        .bind(parent_task_id)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    pub async fn count_by_status(&self, status: TaskStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }

    pub async fn count_active(&self) -> Result<i64> {
        self.count_by_status(TaskStatus::Active).await
    }

    /// Tasks created before the cutoff
    pub async fn older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tasks WHERE created_at < ? ORDER BY created_at ASC",
            TASK_COLUMNS
        ))
        .bind(cutoff.to_rfc3339())
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(task_from_row).collect()
    }

    /// Delete tasks (and their thoughts) by id; returns rows removed
    pub async fn delete_by_ids(&self, task_ids: &[String]) -> Result<u64> {
        if task_ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.db.pool().begin().await?;
        let mut deleted = 0u64;

        for task_id in task_ids {
            sqlx::query("DELETE FROM thoughts WHERE source_task_id = ?")
                .bind(task_id)
                .execute(&mut *tx)
                .await?;
            let result = sqlx::query("DELETE FROM tasks WHERE task_id = ?")
                .bind(task_id)
                .execute(&mut *tx)
                .await?;
            deleted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(deleted)
    }
}

fn task_from_row(row: &SqliteRow) -> Result<Task> {
    let status_str: String = row.get("status");
    let status = TaskStatus::parse(&status_str)
        .ok_or_else(|| EngineError::Integrity(format!("unknown task status '{}'", status_str)))?;

    let context_json: String = row.get("context");
    let context: TaskContext = serde_json::from_str(&context_json)?;

    let outcome: Option<TaskOutcome> = row
        .get::<Option<String>, _>("outcome")
        .map(|s| serde_json::from_str(&s))
        .transpose()?;

    Ok(Task {
        task_id: row.get("task_id"),
        channel_id: row.get("channel_id"),
        description: row.get("description"),
        status,
        priority: row.get("priority"),
        parent_task_id: row.get("parent_task_id"),
        created_at: parse_timestamp(row, "created_at")?,
        updated_at: parse_timestamp(row, "updated_at")?,
        context,
        outcome,
    })
}

pub(crate) fn parse_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let raw: String = row.get(column);
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngineError::Integrity(format!("bad timestamp in {}: {}", column, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MigrationSet;

    async fn setup() -> TaskStore {
        let db = Database::test_in_memory(MigrationSet::Engine).await.unwrap();
        TaskStore::new(db)
    }

    #[tokio::test]
    async fn test_insert_and_get_round_trip() {
        let store = setup().await;
        let task = Task::new("greet the user", "test_channel", 3, Utc::now());

        store.insert(&task).await.unwrap();
        let loaded = store.get(&task.task_id).await.unwrap().unwrap();

        assert_eq!(loaded.task_id, task.task_id);
        assert_eq!(loaded.description, "greet the user");
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(
            loaded.context.channel_context.unwrap().channel_id,
            "test_channel"
        );
    }

    #[tokio::test]
    async fn test_terminal_status_is_immutable() {
        let store = setup().await;
        let task = Task::new("done soon", "chan", 0, Utc::now());
        store.insert(&task).await.unwrap();

        assert!(store
            .update_status(&task.task_id, TaskStatus::Completed, Utc::now())
            .await
            .unwrap());
        // Second transition is refused
        assert!(!store
            .update_status(&task.task_id, TaskStatus::Active, Utc::now())
            .await
            .unwrap());

        let loaded = store.get(&task.task_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_pending_for_activation_ordering() {
        let store = setup().await;
        let base = Utc::now();

        let low_old = Task::new("low old", "chan", 1, base);
        let high = Task::new("high", "chan", 5, base + chrono::Duration::seconds(1));
        let low_new = Task::new("low new", "chan", 1, base + chrono::Duration::seconds(2));

        for t in [&low_old, &high, &low_new] {
            store.insert(t).await.unwrap();
        }

        let ordered = store.pending_for_activation(10).await.unwrap();
        let ids: Vec<_> = ordered.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                high.task_id.as_str(),
                low_old.task_id.as_str(),
                low_new.task_id.as_str()
            ]
        );
    }

    #[tokio::test]
    async fn test_needing_seed_excludes_tasks_with_thoughts() {
        let db = Database::test_in_memory(MigrationSet::Engine).await.unwrap();
        let store = TaskStore::new(db.clone());
        let thoughts = super::super::ThoughtStore::new(db);
        let now = Utc::now();

        let seeded = Task::new("has thought", "chan", 0, now).with_status(TaskStatus::Active);
        let bare = Task::new("no thought", "chan", 0, now).with_status(TaskStatus::Active);
        store.insert(&seeded).await.unwrap();
        store.insert(&bare).await.unwrap();

        let thought = crate::schemas::Thought::new(
            &seeded.task_id,
            crate::schemas::ThoughtType::Seed,
            "seed",
            0,
            now,
        );
        thoughts.insert(&thought).await.unwrap();

        let needing = store.needing_seed(10).await.unwrap();
        assert_eq!(needing.len(), 1);
        assert_eq!(needing[0].task_id, bare.task_id);
    }

    #[tokio::test]
    async fn test_delete_by_ids_removes_thoughts_too() {
        let db = Database::test_in_memory(MigrationSet::Engine).await.unwrap();
        let store = TaskStore::new(db.clone());
        let thoughts = super::super::ThoughtStore::new(db.clone());
        let now = Utc::now();

        let task = Task::new("to delete", "chan", 0, now);
        store.insert(&task).await.unwrap();
        thoughts
            .insert(&crate::schemas::Thought::new(
                &task.task_id,
                crate::schemas::ThoughtType::Seed,
                "seed",
                0,
                now,
            ))
            .await
            .unwrap();

        let deleted = store.delete_by_ids(&[task.task_id.clone()]).await.unwrap();
        assert_eq!(deleted, 1);

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM thoughts")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn test_older_than_and_counts() {
        let store = setup().await;
        let old_time = Utc::now() - chrono::Duration::days(10);

        let mut old_task = Task::new("old", "chan", 0, old_time);
        old_task.status = TaskStatus::Completed;
        store.insert(&old_task).await.unwrap();
        store.insert(&Task::new("new", "chan", 0, Utc::now())).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(7);
        let old = store.older_than(cutoff).await.unwrap();
        assert_eq!(old.len(), 1);
        assert_eq!(old[0].task_id, old_task.task_id);

        assert_eq!(store.count_by_status(TaskStatus::Pending).await.unwrap(), 1);
        assert_eq!(store.count_active().await.unwrap(), 0);
    }
}
