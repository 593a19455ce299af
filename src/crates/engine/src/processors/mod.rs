//! Processors (C10–C12): state machine, managers, per-state processors,
//! and the main agent loop.

pub mod agent;
pub mod dream;
pub mod play;
pub mod shutdown;
pub mod solitude;
pub mod state;
pub mod task_manager;
pub mod thought_manager;
pub mod thought_processor;
pub mod wakeup;
pub mod work;

pub use agent::{AgentProcessor, AgentStatus, ProcessingDelays};
pub use state::{AgentState, StateMachine};
pub use task_manager::TaskManager;
pub use thought_manager::ThoughtManager;
pub use thought_processor::{ProcessedThought, ThoughtProcessor};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Per-round result shared by every sub-processor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoundResult {
    pub round_number: u32,
    pub tasks_activated: u32,
    pub thoughts_generated: u32,
    pub thoughts_processed: u32,
    pub errors: u32,
    pub was_idle: bool,
    /// Set by processors that recommend leaving their state
    pub should_exit_state: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_reason: Option<String>,
    /// Set by the wakeup processor when the ritual finishes
    pub wakeup_complete: bool,
}

/// Cumulative counters per processor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessorMetrics {
    pub rounds_completed: u64,
    pub items_processed: u64,
    pub errors: u64,
}

/// Status summary exposed by every processor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorStatus {
    pub name: String,
    pub supported_states: Vec<AgentState>,
    pub is_running: bool,
    pub metrics: ProcessorMetrics,
}

/// Contract every per-state sub-processor fulfils
#[async_trait]
pub trait Processor: Send {
    async fn initialize(&mut self) -> Result<()>;

    async fn process(&mut self, round_number: u32) -> Result<RoundResult>;

    async fn cleanup(&mut self) -> Result<()>;

    fn get_supported_states(&self) -> Vec<AgentState>;

    fn can_process(&self, state: AgentState) -> bool {
        self.get_supported_states().contains(&state)
    }

    fn get_status(&self) -> ProcessorStatus;
}
