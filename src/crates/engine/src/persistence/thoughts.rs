//! Thought store: typed CRUD and the queue queries.

use super::tasks::parse_timestamp;
use crate::db::Database;
use crate::error::{EngineError, Result};
use crate::schemas::{FinalAction, Thought, ThoughtContext, ThoughtStatus, ThoughtType};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::warn;

/// Repository for thought rows in the engine database
#[derive(Clone, Debug)]
pub struct ThoughtStore {
    db: Database,
}

const THOUGHT_COLUMNS: &str = "thought_id, source_task_id, parent_thought_id, thought_type, \
                               status, round_number, thought_depth, content, context, \
                               final_action, created_at, updated_at";

impl ThoughtStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new thought
    pub async fn insert(&self, thought: &Thought) -> Result<()> {
        let context = serde_json::to_string(&thought.context)?;
        let final_action = thought
            .final_action
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO thoughts (thought_id, source_task_id, parent_thought_id, thought_type, \
                                   status, round_number, thought_depth, content, context, \
                                   final_action, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&thought.thought_id)
        .bind(&thought.source_task_id)
        .bind(&thought.parent_thought_id)
        .bind(thought.thought_type.as_str())
        .bind(thought.status.as_str())
        .bind(thought.round_number)
        .bind(thought.thought_depth)
        .bind(&thought.content)
        .bind(context)
        .bind(final_action)
        .bind(thought.created_at.to_rfc3339())
        .bind(thought.updated_at.to_rfc3339())
        .execute(self.db.pool())
        .await
        .map_err(|e| EngineError::Persistence(format!("Failed to insert thought: {}", e)))?;

        Ok(())
    }

    /// Fetch a thought by id
    pub async fn get(&self, thought_id: &str) -> Result<Option<Thought>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM thoughts WHERE thought_id = ?",
            THOUGHT_COLUMNS
        ))
        .bind(thought_id)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|r| thought_from_row(&r)).transpose()
    }

    /// Transition a thought's status, optionally recording its final action
    ///
    /// A thought makes exactly one terminal transition; further changes
    /// are refused with a warning.
    pub async fn update_status(
        &self,
        thought_id: &str,
        status: ThoughtStatus,
        final_action: Option<&FinalAction>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(current) = self.get(thought_id).await? else {
            warn!(thought_id = %thought_id, "Cannot update status of unknown thought");
            return Ok(false);
        };

        if current.status.is_terminal() {
            warn!(
                thought_id = %thought_id,
                current = current.status.as_str(),
                requested = status.as_str(),
                "Ignoring status change for terminal thought"
            );
            return Ok(false);
        }

        let final_action_json = final_action.map(serde_json::to_string).transpose()?;

        let result = sqlx::query(
            "UPDATE thoughts SET status = ?, final_action = COALESCE(?, final_action), \
             updated_at = ? WHERE thought_id = ?",
        )
        .bind(status.as_str())
        .bind(final_action_json)
        .bind(now.to_rfc3339())
        .bind(thought_id)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Atomically claim a batch of PENDING thoughts as PROCESSING
    ///
    /// Thoughts that left PENDING since the batch was read are excluded
    /// from the returned set. The round number is stamped on claim.
    pub async fn mark_processing(
        &self,
        thought_ids: &[String],
        round_number: i32,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let mut tx = self.db.pool().begin().await?;
        let mut claimed = Vec::new();

        for thought_id in thought_ids {
            let result = sqlx::query(
                "UPDATE thoughts SET status = 'processing', round_number = ?, updated_at = ? \
                 WHERE thought_id = ? AND status = 'pending'",
            )
            .bind(round_number)
            .bind(now.to_rfc3339())
            .bind(thought_id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 1 {
                claimed.push(thought_id.clone());
            }
        }

        tx.commit().await?;
        Ok(claimed)
    }

    /// PENDING thoughts belonging to ACTIVE tasks, priority then FIFO
    pub async fn pending_for_active_tasks(&self) -> Result<Vec<Thought>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM thoughts t \
             JOIN tasks k ON k.task_id = t.source_task_id \
             WHERE t.status = 'pending' AND k.status = 'active' \
             ORDER BY k.priority DESC, t.created_at ASC",
            columns_prefixed("t")
        ))
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(thought_from_row).collect()
    }

    /// All thoughts for one task
    pub async fn for_task(&self, task_id: &str) -> Result<Vec<Thought>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM thoughts WHERE source_task_id = ? ORDER BY created_at ASC",
            THOUGHT_COLUMNS
        ))
        .bind(task_id)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(thought_from_row).collect()
    }

    /// Whether any thought exists for the task
    pub async fn exists_for_task(&self, task_id: &str) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM thoughts WHERE source_task_id = ?")
                .bind(task_id)
                .fetch_one(self.db.pool())
                .await?;
        Ok(count > 0)
    }

    pub async fn count_by_status(&self, status: ThoughtStatus) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM thoughts WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }

    /// Thoughts created before the cutoff
    pub async fn older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Thought>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM thoughts WHERE created_at < ? ORDER BY created_at ASC",
            THOUGHT_COLUMNS
        ))
        .bind(cutoff.to_rfc3339())
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(thought_from_row).collect()
    }

    /// Delete thoughts by id; returns rows removed
    pub async fn delete_by_ids(&self, thought_ids: &[String]) -> Result<u64> {
        if thought_ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.db.pool().begin().await?;
        let mut deleted = 0u64;

        for thought_id in thought_ids {
            let result = sqlx::query("DELETE FROM thoughts WHERE thought_id = ?")
                .bind(thought_id)
                .execute(&mut *tx)
                .await?;
            deleted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(deleted)
    }

    /// Startup maintenance: return stale PROCESSING thoughts to PENDING
    ///
    /// A crashed run can leave thoughts claimed but unprocessed; they are
    /// re-queued rather than lost.
    pub async fn reset_processing_to_pending(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE thoughts SET status = 'pending', updated_at = ? WHERE status = 'processing'",
        )
        .bind(now.to_rfc3339())
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected())
    }
}

fn columns_prefixed(alias: &str) -> String {
    THOUGHT_COLUMNS
        .split(", ")
        .map(|c| format!("{}.{}", alias, c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn thought_from_row(row: &SqliteRow) -> Result<Thought> {
    let type_str: String = row.get("thought_type");
    let thought_type = ThoughtType::parse(&type_str)
        .ok_or_else(|| EngineError::Integrity(format!("unknown thought type '{}'", type_str)))?;

    let status_str: String = row.get("status");
    let status = ThoughtStatus::parse(&status_str).ok_or_else(|| {
        EngineError::Integrity(format!("unknown thought status '{}'", status_str))
    })?;

    let context_json: String = row.get("context");
    let context: ThoughtContext = serde_json::from_str(&context_json)?;

    let final_action: Option<FinalAction> = row
        .get::<Option<String>, _>("final_action")
        .map(|s| serde_json::from_str(&s))
        .transpose()?;

    Ok(Thought {
        thought_id: row.get("thought_id"),
        source_task_id: row.get("source_task_id"),
        parent_thought_id: row.get("parent_thought_id"),
        thought_type,
        status,
        round_number: row.get("round_number"),
        thought_depth: row.get("thought_depth"),
        content: row.get("content"),
        context,
        final_action,
        created_at: parse_timestamp(row, "created_at")?,
        updated_at: parse_timestamp(row, "updated_at")?,
    })
}
