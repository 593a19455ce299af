//! Agent identity: the singleton profile that governs what the agent is
//! and what it may do.

use super::action::ActionType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// The agent's core profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreProfile {
    pub description: String,
    pub role_description: String,
    /// Domain identifier for the domain evaluator; a base domain is used
    /// when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub domain_knowledge: BTreeMap<String, String>,
    /// Prompt overrides for the common-sense evaluator
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub common_sense_overrides: BTreeMap<String, String>,
    /// Prompt overrides for action selection
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub action_selection_overrides: BTreeMap<String, String>,
}

/// Provenance and change tracking for the identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityMetadata {
    pub created_at: DateTime<Utc>,
    pub creator: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lineage: Vec<String>,
    pub modification_count: u32,
}

/// The agent identity record
///
/// Stored as the singleton `agent/identity` node in scope IDENTITY.
/// Every save increments `modification_count` and recomputes
/// `identity_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub identity_hash: String,
    pub core_profile: CoreProfile,
    pub permitted_actions: Vec<ActionType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restricted_capabilities: Vec<String>,
    pub metadata: IdentityMetadata,
}

impl AgentIdentity {
    /// Build a fresh identity from the default template
    pub fn from_template(agent_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        let mut identity = Self {
            agent_id: agent_id.into(),
            identity_hash: String::new(),
            core_profile: CoreProfile {
                description: "An autonomous agent that reasons before it acts.".to_string(),
                role_description:
                    "Process tasks through ethically constrained evaluation and act only within permitted capabilities."
                        .to_string(),
                domain: None,
                domain_knowledge: BTreeMap::new(),
                common_sense_overrides: BTreeMap::new(),
                action_selection_overrides: BTreeMap::new(),
            },
            permitted_actions: ActionType::all().to_vec(),
            restricted_capabilities: Vec::new(),
            metadata: IdentityMetadata {
                created_at: now,
                creator: "system".to_string(),
                lineage: Vec::new(),
                modification_count: 0,
            },
        };
        identity.identity_hash = identity.compute_hash();
        identity
    }

    /// Hash over the identity-defining fields
    ///
    /// Metadata is excluded so that bookkeeping updates alone do not
    /// change what the identity *is*; any profile or capability change
    /// does.
    pub fn compute_hash(&self) -> String {
        let canonical = serde_json::json!({
            "agent_id": self.agent_id,
            "core_profile": self.core_profile,
            "permitted_actions": self.permitted_actions,
            "restricted_capabilities": self.restricted_capabilities,
        });
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Whether the stored hash matches the current fields
    pub fn verify_hash(&self) -> bool {
        self.identity_hash == self.compute_hash()
    }

    /// Record a modification: bump the counter and rewrite the hash
    pub fn record_modification(&mut self) {
        self.metadata.modification_count += 1;
        self.identity_hash = self.compute_hash();
    }

    pub fn is_permitted(&self, action: ActionType) -> bool {
        self.permitted_actions.contains(&action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_identity_has_valid_hash() {
        let identity = AgentIdentity::from_template("aegis", Utc::now());
        assert!(identity.verify_hash());
        assert_eq!(identity.metadata.modification_count, 0);
        assert!(identity.is_permitted(ActionType::Speak));
    }

    #[test]
    fn test_modification_increments_count_and_rehashes() {
        let mut identity = AgentIdentity::from_template("aegis", Utc::now());
        let original_hash = identity.identity_hash.clone();

        identity.permitted_actions.retain(|a| *a != ActionType::Tool);
        identity.record_modification();

        assert_eq!(identity.metadata.modification_count, 1);
        assert_ne!(identity.identity_hash, original_hash);
        assert!(identity.verify_hash());
    }

    #[test]
    fn test_tampered_profile_fails_verification() {
        let mut identity = AgentIdentity::from_template("aegis", Utc::now());
        identity.core_profile.description = "something else".to_string();
        assert!(!identity.verify_hash());
    }

    #[test]
    fn test_identity_serde_round_trip() {
        let identity = AgentIdentity::from_template("aegis", Utc::now());
        let json = serde_json::to_string(&identity).unwrap();
        let back: AgentIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(identity, back);
    }
}
