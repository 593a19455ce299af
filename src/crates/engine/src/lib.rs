//! Cognitive core for the aegis agent runtime.
//!
//! The engine moves work through an ordered lifecycle of `Task` → `Thought`
//! → `Action`. Each thought is evaluated by a multi-stage decision pipeline
//! (ethical, common-sense, and domain evaluators feeding action selection),
//! reviewed by conscience guardrails, and dispatched to a capability-routed
//! service. All reasoning, graph memory, correlations, and audit evidence
//! are persisted across three SQLite databases.
//!
//! Module map:
//!
//! - [`schemas`] - typed data model (tasks, thoughts, actions, graph,
//!   snapshots, audit, identity)
//! - [`db`] / [`persistence`] - SQLite stores and the persistence contract
//! - [`memory`] - typed graph memory with bounded traversal and
//!   consolidation
//! - [`secrets`] - secrets detection/replacement with a retrieval vault
//! - [`audit`] - append-only hash-chained audit log with signatures
//! - [`telemetry`] - service correlations and summary aggregates
//! - [`resources`] - budget tracking with breach actions
//! - [`registry`] / [`buses`] - capability-indexed service lookup with
//!   circuit breakers, and the typed buses used by the core
//! - [`auth`] - adapter authentication tokens
//! - [`scheduler`] - agent-authored future work
//! - [`incidents`] - bounded incident log for review
//! - [`observation`] - periodic self-observation over telemetry
//! - [`visibility`] - reasoning traces for transparency
//! - [`context`] - per-thought `SystemSnapshot` assembly
//! - [`dma`] - the decision-making pipeline
//! - [`conscience`] - post-selection guardrails
//! - [`dispatch`] - action execution and outcome persistence
//! - [`processors`] - state machine, managers, per-state processors, and
//!   the main agent loop
//! - [`wise_authority`] - deferral guidance handling
//! - [`shutdown`] - the shared graceful-shutdown coordinator

pub mod audit;
pub mod auth;
pub mod buses;
pub mod clock;
pub mod conscience;
pub mod context;
pub mod db;
pub mod dispatch;
pub mod dma;
pub mod error;
pub mod incidents;
pub mod memory;
pub mod observation;
pub mod persistence;
pub mod processors;
pub mod registry;
pub mod resources;
pub mod schemas;
pub mod scheduler;
pub mod secrets;
pub mod services;
pub mod shutdown;
pub mod telemetry;
pub mod testing;
pub mod visibility;
pub mod wise_authority;

pub use error::{EngineError, Result};
