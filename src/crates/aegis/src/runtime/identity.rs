//! Identity management: the singleton `agent/identity` graph node.
//!
//! Created from the template on first run, loaded and hash-verified
//! thereafter. Every save increments `modification_count` by exactly one
//! and rewrites the identity hash.

use engine::clock::Clock;
use engine::error::{EngineError, Result};
use engine::memory::GraphMemory;
use engine::schemas::{AgentIdentity, AttrValue, GraphNode, GraphScope, NodeType};
use std::sync::Arc;
use tracing::{info, warn};

/// Node id of the identity singleton
pub const IDENTITY_NODE_ID: &str = "agent/identity";

/// Loads, creates, and persists the agent identity
#[derive(Clone)]
pub struct IdentityManager {
    memory: Arc<GraphMemory>,
    clock: Arc<dyn Clock>,
}

impl IdentityManager {
    pub fn new(memory: Arc<GraphMemory>, clock: Arc<dyn Clock>) -> Self {
        Self { memory, clock }
    }

    /// Load the stored identity, if any
    pub async fn load(&self) -> Result<Option<AgentIdentity>> {
        let Some(node) = self.memory.recall(IDENTITY_NODE_ID, GraphScope::Identity).await? else {
            return Ok(None);
        };

        let Some(AttrValue::Json(value)) = node.attributes.get("identity") else {
            return Err(EngineError::Identity(
                "identity node is missing its identity attribute".to_string(),
            ));
        };

        let identity: AgentIdentity = serde_json::from_value(value.clone())
            .map_err(|e| EngineError::Identity(format!("stored identity is malformed: {}", e)))?;
        Ok(Some(identity))
    }

    /// Persist the identity, bumping `modification_count` by one
    pub async fn save(&self, identity: &mut AgentIdentity) -> Result<()> {
        identity.record_modification();

        let node = GraphNode::new(
            IDENTITY_NODE_ID,
            NodeType::Agent,
            GraphScope::Identity,
            self.clock.now(),
        )
        .with_attr("agent_id", identity.agent_id.as_str())
        .with_attr(
            "identity",
            AttrValue::Json(serde_json::to_value(&identity)?),
        );

        self.memory.memorize(&node).await?;
        Ok(())
    }

    /// Load `agent/identity`, or create it from the template on first run
    ///
    /// A stored identity whose hash does not verify aborts startup.
    pub async fn load_or_create(&self, agent_id: &str) -> Result<AgentIdentity> {
        if let Some(identity) = self.load().await? {
            if !identity.verify_hash() {
                return Err(EngineError::Identity(format!(
                    "identity integrity check failed for '{}'",
                    identity.agent_id
                )));
            }
            if identity.agent_id != agent_id {
                warn!(
                    stored = %identity.agent_id,
                    configured = %agent_id,
                    "Configured agent id differs from stored identity; keeping stored"
                );
            }
            info!(agent_id = %identity.agent_id, "Loaded existing identity");
            return Ok(identity);
        }

        let mut identity = AgentIdentity::from_template(agent_id, self.clock.now());
        self.save(&mut identity).await?;
        info!(agent_id = %agent_id, "Created identity from template");
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::clock::FixedClock;
    use engine::db::{Database, MigrationSet};

    async fn manager() -> IdentityManager {
        let db = Database::test_in_memory(MigrationSet::Engine).await.unwrap();
        IdentityManager::new(
            Arc::new(GraphMemory::new(db)),
            Arc::new(FixedClock::default_start()),
        )
    }

    #[tokio::test]
    async fn test_create_then_load_round_trips() {
        let manager = manager().await;

        let created = manager.load_or_create("aegis").await.unwrap();
        assert_eq!(created.metadata.modification_count, 1);
        assert!(created.verify_hash());

        let loaded = manager.load_or_create("aegis").await.unwrap();
        assert_eq!(loaded, created);
    }

    #[tokio::test]
    async fn test_every_save_increments_count_once() {
        let manager = manager().await;
        let mut identity = manager.load_or_create("aegis").await.unwrap();
        let count = identity.metadata.modification_count;

        manager.save(&mut identity).await.unwrap();
        assert_eq!(identity.metadata.modification_count, count + 1);

        let reloaded = manager.load().await.unwrap().unwrap();
        assert_eq!(reloaded, identity);
    }

    #[tokio::test]
    async fn test_tampered_identity_fails_load() {
        let manager = manager().await;
        let mut identity = manager.load_or_create("aegis").await.unwrap();

        // Corrupt the stored hash
        identity.identity_hash = "0".repeat(64);
        let node = GraphNode::new(
            IDENTITY_NODE_ID,
            NodeType::Agent,
            GraphScope::Identity,
            chrono::Utc::now(),
        )
        .with_attr("identity", AttrValue::Json(serde_json::to_value(&identity).unwrap()));
        manager.memory.memorize(&node).await.unwrap();

        let err = manager.load_or_create("aegis").await.unwrap_err();
        assert!(matches!(err, EngineError::Identity(_)));
    }
}
