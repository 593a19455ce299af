//! Database management and migrations
//!
//! SQLite connection wrappers for the three persisted stores: the main
//! engine database (tasks, thoughts, graph, correlations), the secrets
//! vault, and the audit log. Migrations are embedded in the binary under
//! `./migrations/<set>`.

use crate::error::{EngineError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// Which embedded migration set a database runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationSet {
    /// Main engine store: tasks, thoughts, graph_nodes, graph_edges,
    /// service_correlations
    Engine,
    /// Secrets vault
    Secrets,
    /// Audit log and signing keys
    Audit,
}

impl MigrationSet {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Engine => "engine",
            Self::Secrets => "secrets",
            Self::Audit => "audit",
        }
    }
}

/// Database connection wrapper
#[derive(Clone, Debug)]
pub struct Database {
    pool: Arc<SqlitePool>,
}

impl Database {
    /// Open (creating if missing) a database file
    pub async fn connect<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let path = database_path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    EngineError::Persistence(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| EngineError::Persistence("Invalid database path".to_string()))?;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| EngineError::Persistence(format!("Invalid database URL: {}", e)))?
            .create_if_missing(true);

        debug!(path = %path.display(), "Connecting to database");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| EngineError::Persistence(format!("Failed to connect to database: {}", e)))?;

        info!(path = %path.display(), "Database connection established");

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Create an in-memory database
    ///
    /// A single connection keeps all queries on the same in-memory store.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| {
                EngineError::Persistence(format!("Failed to connect to in-memory database: {}", e))
            })?;

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run the embedded migrations for the given set
    pub async fn run_migrations(&self, set: MigrationSet) -> Result<()> {
        info!(set = set.as_str(), "Running database migrations");

        let result = match set {
            MigrationSet::Engine => {
                sqlx::migrate!("./migrations/engine")
                    .run(self.pool.as_ref())
                    .await
            }
            MigrationSet::Secrets => {
                sqlx::migrate!("./migrations/secrets")
                    .run(self.pool.as_ref())
                    .await
            }
            MigrationSet::Audit => {
                sqlx::migrate!("./migrations/audit")
                    .run(self.pool.as_ref())
                    .await
            }
        };

        result.map_err(|e| {
            EngineError::Integrity(format!("{} migration failed: {}", set.as_str(), e))
        })?;

        info!(set = set.as_str(), "Database migrations completed");
        Ok(())
    }

    /// Open a database file and run migrations
    pub async fn initialize<P: AsRef<Path>>(path: P, set: MigrationSet) -> Result<Self> {
        let db = Self::connect(path).await?;
        db.run_migrations(set).await?;
        Ok(db)
    }

    /// Create an in-memory database with migrations applied
    pub async fn test_in_memory(set: MigrationSet) -> Result<Self> {
        let db = Self::in_memory().await?;
        db.run_migrations(set).await?;
        Ok(db)
    }

    /// Check whether a table exists
    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(count > 0)
    }

    /// Perform a health check by running a simple query
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(self.pool.as_ref())
            .await
            .map_err(|e| EngineError::Persistence(format!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Close the database connection
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_in_memory_health_check() {
        let db = Database::in_memory().await.unwrap();
        assert!(db.health_check().await.is_ok());
        db.close().await;
    }

    #[tokio::test]
    async fn test_engine_migrations_create_required_tables() {
        let db = Database::test_in_memory(MigrationSet::Engine).await.unwrap();

        for table in ["tasks", "thoughts", "graph_nodes", "graph_edges", "service_correlations"] {
            assert!(db.table_exists(table).await.unwrap(), "missing table {}", table);
        }

        db.close().await;
    }

    #[tokio::test]
    async fn test_audit_migrations_create_required_tables() {
        let db = Database::test_in_memory(MigrationSet::Audit).await.unwrap();
        assert!(db.table_exists("audit_log").await.unwrap());
        assert!(db.table_exists("audit_signing_keys").await.unwrap());
        db.close().await;
    }

    #[tokio::test]
    async fn test_secrets_migrations() {
        let db = Database::test_in_memory(MigrationSet::Secrets).await.unwrap();
        assert!(db.table_exists("secrets").await.unwrap());
        assert!(!db.table_exists("tasks").await.unwrap());
        db.close().await;
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let db = Database::in_memory().await.unwrap();
        db.run_migrations(MigrationSet::Engine).await.unwrap();
        db.run_migrations(MigrationSet::Engine).await.unwrap();
        db.close().await;
    }

    #[tokio::test]
    async fn test_file_database_created_with_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.db");

        let db = Database::initialize(&path, MigrationSet::Engine).await.unwrap();
        assert!(path.exists());
        assert!(db.table_exists("tasks").await.unwrap());
        db.close().await;
    }
}
