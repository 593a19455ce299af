//! Graph memory model: typed nodes, edges, and the bounded attribute value.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bounded attribute value for node attributes and context extras
///
/// Variant order matters for untagged deserialization: booleans and
/// integers must be tried before floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
}

impl AttrValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

/// String-keyed map of bounded attribute values
pub type ContextExtras = BTreeMap<String, AttrValue>;

/// Visibility scope of a graph node or edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GraphScope {
    #[default]
    Local,
    Identity,
    Community,
}

impl GraphScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Identity => "identity",
            Self::Community => "community",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(Self::Local),
            "identity" => Some(Self::Identity),
            "community" => Some(Self::Community),
            _ => None,
        }
    }
}

/// Node type in the memory graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Agent,
    User,
    Channel,
    Concept,
    TsdbData,
    TsdbSummary,
    AuditEntry,
    Config,
    Shutdown,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::User => "user",
            Self::Channel => "channel",
            Self::Concept => "concept",
            Self::TsdbData => "tsdb_data",
            Self::TsdbSummary => "tsdb_summary",
            Self::AuditEntry => "audit_entry",
            Self::Config => "config",
            Self::Shutdown => "shutdown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "agent" => Some(Self::Agent),
            "user" => Some(Self::User),
            "channel" => Some(Self::Channel),
            "concept" => Some(Self::Concept),
            "tsdb_data" => Some(Self::TsdbData),
            "tsdb_summary" => Some(Self::TsdbSummary),
            "audit_entry" => Some(Self::AuditEntry),
            "config" => Some(Self::Config),
            "shutdown" => Some(Self::Shutdown),
            _ => None,
        }
    }
}

/// Edge relationship kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relationship {
    TemporalPrev,
    TemporalNext,
    Summarizes,
    SameDaySummary,
    RelatesTo,
}

impl Relationship {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TemporalPrev => "temporal_prev",
            Self::TemporalNext => "temporal_next",
            Self::Summarizes => "summarizes",
            Self::SameDaySummary => "same_day_summary",
            Self::RelatesTo => "relates_to",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "temporal_prev" => Some(Self::TemporalPrev),
            "temporal_next" => Some(Self::TemporalNext),
            "summarizes" => Some(Self::Summarizes),
            "same_day_summary" => Some(Self::SameDaySummary),
            "relates_to" => Some(Self::RelatesTo),
            _ => None,
        }
    }
}

/// A typed node in the memory graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub node_id: String,
    pub node_type: NodeType,
    pub scope: GraphScope,
    #[serde(default)]
    pub attributes: ContextExtras,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl GraphNode {
    pub fn new(
        node_id: impl Into<String>,
        node_type: NodeType,
        scope: GraphScope,
        created_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            node_type,
            scope,
            attributes: ContextExtras::new(),
            created_at,
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attr_text(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(AttrValue::as_text)
    }
}

/// A typed edge between two graph nodes
///
/// Edges are id-based references; nodes never own each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub relationship: Relationship,
    pub scope: GraphScope,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
