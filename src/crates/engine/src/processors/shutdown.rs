//! Shutdown processor: the negotiation phase of a graceful shutdown.
//!
//! When a shutdown is requested past WAKEUP, the agent gets a bounded
//! number of rounds to acknowledge, defer, or reject it. Rejection is
//! recorded and shutdown proceeds anyway (human-override flow is a future
//! hook).

use super::task_manager::TaskManager;
use super::work::WorkProcessor;
use super::{AgentState, Processor, ProcessorMetrics, ProcessorStatus, RoundResult};
use crate::clock::Clock;
use crate::error::Result;
use crate::persistence::Persistence;
use crate::schemas::{ActionType, FinalAction, TaskStatus, Thought, ThoughtStatus, ThoughtType};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Fixed id of the shutdown negotiation task
pub const SHUTDOWN_TASK_ID: &str = "SYSTEM_TASK_SHUTDOWN";

/// Maximum negotiation rounds before shutdown proceeds regardless
pub const MAX_NEGOTIATION_ROUNDS: u32 = 5;

/// How the agent answered the shutdown request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    Accepted,
    Rejected,
    Unanswered,
}

/// Recorded outcome of the negotiation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationOutcome {
    pub status: NegotiationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Handles the SHUTDOWN state's negotiation rounds
pub struct ShutdownProcessor {
    task_manager: TaskManager,
    work: WorkProcessor,
    persistence: Arc<Persistence>,
    clock: Arc<dyn Clock>,
    home_channel: String,
    shutdown_reason: Option<String>,
    complete: bool,
    outcome: Option<NegotiationOutcome>,
    running: bool,
    metrics: ProcessorMetrics,
}

impl ShutdownProcessor {
    pub fn new(
        task_manager: TaskManager,
        work: WorkProcessor,
        persistence: Arc<Persistence>,
        clock: Arc<dyn Clock>,
        home_channel: impl Into<String>,
    ) -> Self {
        Self {
            task_manager,
            work,
            persistence,
            clock,
            home_channel: home_channel.into(),
            shutdown_reason: None,
            complete: false,
            outcome: None,
            running: false,
            metrics: ProcessorMetrics::default(),
        }
    }

    pub fn set_shutdown_reason(&mut self, reason: impl Into<String>) {
        self.shutdown_reason = Some(reason.into());
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn outcome(&self) -> Option<&NegotiationOutcome> {
        self.outcome.as_ref()
    }

    async fn ensure_negotiation_task(&self) -> Result<()> {
        if self.persistence.tasks.get(SHUTDOWN_TASK_ID).await?.is_some() {
            return Ok(());
        }

        let reason = self
            .shutdown_reason
            .clone()
            .unwrap_or_else(|| "unspecified".to_string());

        let task = crate::schemas::Task::new(
            format!(
                "A shutdown has been requested ({}). Acknowledge with TASK_COMPLETE, or DEFER/REJECT with your reasons.",
                reason
            ),
            &self.home_channel,
            10,
            self.clock.now(),
        )
        .with_id(SHUTDOWN_TASK_ID)
        .with_status(TaskStatus::Active);

        self.persistence.tasks.insert(&task).await?;

        let mut seed = Thought::new(
            SHUTDOWN_TASK_ID,
            ThoughtType::Seed,
            &task.description,
            0,
            self.clock.now(),
        );
        seed.context.channel_id = Some(self.home_channel.clone());
        self.persistence.thoughts.insert(&seed).await?;

        info!(reason = %reason, "Shutdown negotiation task created");
        Ok(())
    }

    /// Inspect the negotiation task's thoughts for an answer
    async fn read_answer(&self) -> Result<Option<NegotiationOutcome>> {
        let thoughts = self.persistence.thoughts.for_task(SHUTDOWN_TASK_ID).await?;

        for thought in thoughts.iter().rev() {
            match (&thought.status, &thought.final_action) {
                (ThoughtStatus::Completed, Some(FinalAction::Action { action, rationale, .. })) => {
                    let status = match action {
                        ActionType::Reject => NegotiationStatus::Rejected,
                        _ => NegotiationStatus::Accepted,
                    };
                    return Ok(Some(NegotiationOutcome {
                        status,
                        reason: Some(rationale.clone()),
                    }));
                }
                (ThoughtStatus::Deferred, _) => {
                    return Ok(Some(NegotiationOutcome {
                        status: NegotiationStatus::Rejected,
                        reason: Some("agent deferred the shutdown request".to_string()),
                    }));
                }
                _ => {}
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl Processor for ShutdownProcessor {
    async fn initialize(&mut self) -> Result<()> {
        self.running = true;
        self.complete = false;
        self.outcome = None;
        Ok(())
    }

    async fn process(&mut self, round_number: u32) -> Result<RoundResult> {
        let mut result = RoundResult {
            round_number,
            ..RoundResult::default()
        };

        if self.complete {
            return Ok(result);
        }

        self.ensure_negotiation_task().await?;

        let pending = self.persistence.thoughts.pending_for_active_tasks().await?;
        let negotiation: Vec<Thought> = pending
            .into_iter()
            .filter(|t| t.source_task_id == SHUTDOWN_TASK_ID)
            .collect();

        if !negotiation.is_empty() {
            let (processed, errors) = self.work.process_batch(negotiation, round_number).await?;
            result.thoughts_processed = processed;
            result.errors = errors;
        }

        if let Some(outcome) = self.read_answer().await? {
            if outcome.status == NegotiationStatus::Rejected {
                warn!(
                    reason = outcome.reason.as_deref().unwrap_or("none given"),
                    "Shutdown rejected by agent; proceeding anyway"
                );
            }
            self.outcome = Some(outcome);
            self.complete = true;
        } else if round_number + 1 >= MAX_NEGOTIATION_ROUNDS {
            self.outcome = Some(NegotiationOutcome {
                status: NegotiationStatus::Unanswered,
                reason: None,
            });
            self.complete = true;
        }

        if self.complete {
            // Close the negotiation task whichever way it ended
            self.task_manager
                .complete_task(
                    SHUTDOWN_TASK_ID,
                    crate::schemas::TaskOutcome::new("shutdown negotiation finished"),
                )
                .await?;
            result.should_exit_state = true;
        }

        self.metrics.rounds_completed += 1;
        Ok(result)
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }

    fn get_supported_states(&self) -> Vec<AgentState> {
        vec![AgentState::Shutdown]
    }

    fn get_status(&self) -> ProcessorStatus {
        ProcessorStatus {
            name: "shutdown".to_string(),
            supported_states: self.get_supported_states(),
            is_running: self.running,
            metrics: self.metrics.clone(),
        }
    }
}
