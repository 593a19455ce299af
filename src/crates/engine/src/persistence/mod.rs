//! Persistence contract over the engine database.
//!
//! Typed CRUD for tasks and thoughts plus the activation, seeding, and
//! queue queries the processors drive. All mutating operations are
//! transactional; the processor is the only writer of task/thought state
//! transitions.

mod tasks;
mod thoughts;

pub use tasks::TaskStore;
pub use thoughts::ThoughtStore;

use crate::db::Database;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Counts describing the work queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct QueueStatus {
    pub total_tasks: i64,
    pub total_thoughts: i64,
    pub pending_tasks: i64,
    pub pending_thoughts: i64,
    pub processing_thoughts: i64,
}

/// The engine database with its typed stores
#[derive(Clone, Debug)]
pub struct Persistence {
    db: Database,
    pub tasks: TaskStore,
    pub thoughts: ThoughtStore,
}

impl Persistence {
    pub fn new(db: Database) -> Self {
        Self {
            tasks: TaskStore::new(db.clone()),
            thoughts: ThoughtStore::new(db.clone()),
            db,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Snapshot of queue counts across tasks and thoughts
    pub async fn queue_status(&self) -> Result<QueueStatus> {
        let total_tasks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tasks")
            .fetch_one(self.db.pool())
            .await?;
        let total_thoughts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM thoughts")
            .fetch_one(self.db.pool())
            .await?;
        let pending_tasks: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE status = 'pending'")
                .fetch_one(self.db.pool())
                .await?;
        let pending_thoughts: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM thoughts WHERE status = 'pending'")
                .fetch_one(self.db.pool())
                .await?;
        let processing_thoughts: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM thoughts WHERE status = 'processing'")
                .fetch_one(self.db.pool())
                .await?;

        Ok(QueueStatus {
            total_tasks,
            total_thoughts,
            pending_tasks,
            pending_thoughts,
            processing_thoughts,
        })
    }
}
