//! Typed graph memory on top of the engine database.
//!
//! Nodes and edges are id-based references stored in dedicated tables;
//! traversal is a bounded-depth BFS with an explicit visited set, so
//! cyclic graphs are safe.

pub mod consolidation;

use crate::db::Database;
use crate::error::{EngineError, Result};
use crate::schemas::{ContextExtras, GraphEdge, GraphNode, GraphScope, NodeType, Relationship};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// Graph memory service (C3)
#[derive(Clone, Debug)]
pub struct GraphMemory {
    db: Database,
}

impl GraphMemory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace a node
    pub async fn memorize(&self, node: &GraphNode) -> Result<()> {
        let attributes = serde_json::to_string(&node.attributes)?;

        sqlx::query(
            "INSERT INTO graph_nodes (node_id, scope, node_type, attributes, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (node_id, scope)
             DO UPDATE SET node_type = excluded.node_type, attributes = excluded.attributes",
        )
        .bind(&node.node_id)
        .bind(node.scope.as_str())
        .bind(node.node_type.as_str())
        .bind(attributes)
        .bind(node.created_at.to_rfc3339())
        .execute(self.db.pool())
        .await?;

        debug!(node_id = %node.node_id, scope = node.scope.as_str(), "Memorized graph node");
        Ok(())
    }

    /// Fetch a node by id and scope
    pub async fn recall(&self, node_id: &str, scope: GraphScope) -> Result<Option<GraphNode>> {
        let row = sqlx::query(
            "SELECT node_id, scope, node_type, attributes, created_at \
             FROM graph_nodes WHERE node_id = ? AND scope = ?",
        )
        .bind(node_id)
        .bind(scope.as_str())
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|r| node_from_row(&r)).transpose()
    }

    /// All nodes of a type within a scope
    pub async fn recall_by_type(
        &self,
        node_type: NodeType,
        scope: GraphScope,
        limit: i64,
    ) -> Result<Vec<GraphNode>> {
        let rows = sqlx::query(
            "SELECT node_id, scope, node_type, attributes, created_at \
             FROM graph_nodes WHERE node_type = ? AND scope = ? \
             ORDER BY created_at ASC LIMIT ?",
        )
        .bind(node_type.as_str())
        .bind(scope.as_str())
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(node_from_row).collect()
    }

    /// Remove a node and the edges touching it
    pub async fn forget(&self, node_id: &str, scope: GraphScope) -> Result<bool> {
        let mut tx = self.db.pool().begin().await?;

        sqlx::query("DELETE FROM graph_edges WHERE (source = ? OR target = ?) AND scope = ?")
            .bind(node_id)
            .bind(node_id)
            .bind(scope.as_str())
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM graph_nodes WHERE node_id = ? AND scope = ?")
            .bind(node_id)
            .bind(scope.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Insert an edge (idempotent on the full key)
    pub async fn add_edge(&self, edge: &GraphEdge) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO graph_edges (source, target, relationship, scope, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&edge.source)
        .bind(&edge.target)
        .bind(edge.relationship.as_str())
        .bind(edge.scope.as_str())
        .bind(edge.created_at.to_rfc3339())
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Edges where the node is source or target
    pub async fn edges_touching(&self, node_id: &str, scope: GraphScope) -> Result<Vec<GraphEdge>> {
        let rows = sqlx::query(
            "SELECT source, target, relationship, scope, created_at FROM graph_edges \
             WHERE (source = ? OR target = ?) AND scope = ?",
        )
        .bind(node_id)
        .bind(node_id)
        .bind(scope.as_str())
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(edge_from_row).collect()
    }

    /// Bounded-depth BFS from a start node
    ///
    /// Follows edges in both directions; the start node is not included
    /// in the result. Depth 0 returns nothing.
    pub async fn traverse(
        &self,
        start_node_id: &str,
        scope: GraphScope,
        max_depth: u32,
    ) -> Result<Vec<GraphNode>> {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(start_node_id.to_string());

        let mut frontier: VecDeque<(String, u32)> = VecDeque::new();
        frontier.push_back((start_node_id.to_string(), 0));

        let mut found = Vec::new();

        while let Some((node_id, depth)) = frontier.pop_front() {
            if depth >= max_depth {
                continue;
            }

            for edge in self.edges_touching(&node_id, scope).await? {
                let neighbor = if edge.source == node_id {
                    edge.target
                } else {
                    edge.source
                };

                if visited.insert(neighbor.clone()) {
                    if let Some(node) = self.recall(&neighbor, scope).await? {
                        found.push(node);
                    }
                    frontier.push_back((neighbor, depth + 1));
                }
            }
        }

        Ok(found)
    }

    /// Substring search over node ids and attributes
    pub async fn search(&self, query: &str, limit: i64) -> Result<Vec<GraphNode>> {
        let pattern = format!("%{}%", query);
        let rows = sqlx::query(
            "SELECT node_id, scope, node_type, attributes, created_at FROM graph_nodes \
             WHERE node_id LIKE ? OR attributes LIKE ? \
             ORDER BY created_at DESC LIMIT ?",
        )
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(node_from_row).collect()
    }

    pub async fn count_nodes(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM graph_nodes")
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }

    /// Nodes of a type created before a cutoff that no summary covers
    pub async fn unsummarized_before(
        &self,
        node_type: NodeType,
        scope: GraphScope,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<GraphNode>> {
        let rows = sqlx::query(
            "SELECT node_id, scope, node_type, attributes, created_at FROM graph_nodes n \
             WHERE n.node_type = ? AND n.scope = ? AND n.created_at < ? \
             AND NOT EXISTS (SELECT 1 FROM graph_edges e \
                             WHERE e.target = n.node_id AND e.relationship = ? AND e.scope = n.scope) \
             ORDER BY n.created_at ASC",
        )
        .bind(node_type.as_str())
        .bind(scope.as_str())
        .bind(cutoff.to_rfc3339())
        .bind(Relationship::Summarizes.as_str())
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(node_from_row).collect()
    }
}

fn node_from_row(row: &SqliteRow) -> Result<GraphNode> {
    let scope_str: String = row.get("scope");
    let scope = GraphScope::parse(&scope_str)
        .ok_or_else(|| EngineError::Integrity(format!("unknown graph scope '{}'", scope_str)))?;

    let type_str: String = row.get("node_type");
    let node_type = NodeType::parse(&type_str)
        .ok_or_else(|| EngineError::Integrity(format!("unknown node type '{}'", type_str)))?;

    let attributes_json: String = row.get("attributes");
    let attributes: ContextExtras = serde_json::from_str(&attributes_json)?;

    let created_at: String = row.get("created_at");
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| EngineError::Integrity(format!("bad node timestamp: {}", e)))?
        .with_timezone(&Utc);

    Ok(GraphNode {
        node_id: row.get("node_id"),
        node_type,
        scope,
        attributes,
        created_at,
    })
}

fn edge_from_row(row: &SqliteRow) -> Result<GraphEdge> {
    let scope_str: String = row.get("scope");
    let scope = GraphScope::parse(&scope_str)
        .ok_or_else(|| EngineError::Integrity(format!("unknown graph scope '{}'", scope_str)))?;

    let rel_str: String = row.get("relationship");
    let relationship = Relationship::parse(&rel_str)
        .ok_or_else(|| EngineError::Integrity(format!("unknown relationship '{}'", rel_str)))?;

    let created_at: String = row.get("created_at");
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| EngineError::Integrity(format!("bad edge timestamp: {}", e)))?
        .with_timezone(&Utc);

    Ok(GraphEdge {
        source: row.get("source"),
        target: row.get("target"),
        relationship,
        scope,
        created_at,
    })
}
