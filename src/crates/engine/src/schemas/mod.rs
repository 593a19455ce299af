//! Typed data model for the cognitive core.
//!
//! Everything that crosses a component boundary is a real type: statuses
//! are enums, action parameters are a sum type validated at parse time,
//! and extension data is a bounded attribute map instead of untyped dicts.

pub mod action;
pub mod audit;
pub mod conscience;
pub mod correlation;
pub mod dispatch;
pub mod dma;
pub mod graph;
pub mod identity;
pub mod resources;
pub mod snapshot;
pub mod task;
pub mod thought;

pub use action::{
    ActionParameters, ActionType, DeferParams, ForgetParams, MemorizeParams, ObserveParams,
    PonderParams, RecallParams, RejectParams, SpeakParams, TaskCompleteParams, ToolParams,
};
pub use audit::{AuditEntry, AuditVerificationReport};
pub use conscience::{ConscienceVerdict, Severity};
pub use correlation::{CorrelationStatus, CorrelationType, ServiceCorrelation};
pub use dispatch::DispatchContext;
pub use dma::{
    ActionSelectionResult, CommonSenseAssessment, DmaOutcome, DomainAssessment,
    EthicalAssessment,
};
pub use graph::{AttrValue, ContextExtras, GraphEdge, GraphNode, GraphScope, NodeType, Relationship};
pub use identity::{AgentIdentity, CoreProfile, IdentityMetadata};
pub use resources::{ResourceAction, ResourceBudget, ResourceBudgets, ResourceSnapshot};
pub use snapshot::{
    ChannelContext, SecretsSnapshot, ShutdownContext, SystemSnapshot, TaskSummary,
    TelemetrySummary, ThoughtSummary, UserProfile,
};
pub use task::{Task, TaskContext, TaskOutcome, TaskStatus};
pub use thought::{FinalAction, Thought, ThoughtContext, ThoughtStatus, ThoughtType};
