//! Wakeup processor: drives the wakeup ritual to completion.
//!
//! Creates the ritual sequence if absent, then each round seeds and
//! processes thoughts for the step tasks (including auto-generated child
//! thoughts) until every non-root step is COMPLETED.

use super::task_manager::{TaskManager, WAKEUP_ROOT_TASK_ID};
use super::thought_manager::ThoughtManager;
use super::thought_processor::ThoughtProcessor;
use super::work::WorkProcessor;
use super::{AgentState, Processor, ProcessorMetrics, ProcessorStatus, RoundResult};
use crate::clock::Clock;
use crate::dispatch::ActionDispatcher;
use crate::error::Result;
use crate::persistence::Persistence;
use crate::schemas::{TaskOutcome, TaskStatus, Thought, ThoughtType};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Handles the WAKEUP state
pub struct WakeupProcessor {
    task_manager: TaskManager,
    work: WorkProcessor,
    persistence: Arc<Persistence>,
    clock: Arc<dyn Clock>,
    home_channel: String,
    complete: bool,
    running: bool,
    metrics: ProcessorMetrics,
}

impl WakeupProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_manager: TaskManager,
        thought_manager: ThoughtManager,
        thought_processor: Arc<ThoughtProcessor>,
        dispatcher: Arc<ActionDispatcher>,
        persistence: Arc<Persistence>,
        clock: Arc<dyn Clock>,
        origin_service: impl Into<String>,
        home_channel: impl Into<String>,
    ) -> Self {
        let work = WorkProcessor::new(
            task_manager.clone(),
            thought_manager,
            thought_processor,
            dispatcher,
            persistence.clone(),
            clock.clone(),
            origin_service,
            super::work::DEFAULT_BATCH_SIZE,
        );

        Self {
            task_manager,
            work,
            persistence,
            clock,
            home_channel: home_channel.into(),
            complete: false,
            running: false,
            metrics: ProcessorMetrics::default(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Whether every non-root step task has COMPLETED
    async fn all_steps_complete(&self) -> Result<bool> {
        let steps = self.persistence.tasks.children_of(WAKEUP_ROOT_TASK_ID).await?;
        if steps.is_empty() {
            return Ok(false);
        }
        Ok(steps.iter().all(|s| s.status == TaskStatus::Completed))
    }

    async fn seed_wakeup_thoughts(&self, round_number: u32) -> Result<u32> {
        let steps = self.persistence.tasks.children_of(WAKEUP_ROOT_TASK_ID).await?;
        let mut generated = 0u32;

        for step in steps {
            if step.status != TaskStatus::Active {
                continue;
            }
            if self.persistence.thoughts.exists_for_task(&step.task_id).await? {
                continue;
            }

            let mut seed = Thought::new(
                &step.task_id,
                ThoughtType::Seed,
                &step.description,
                round_number as i32,
                self.clock.now(),
            );
            seed.context.channel_id = Some(step.channel_id.clone());
            seed.context.channel_context = step.context.channel_context.clone();
            self.persistence.thoughts.insert(&seed).await?;
            generated += 1;
        }

        Ok(generated)
    }
}

#[async_trait]
impl Processor for WakeupProcessor {
    async fn initialize(&mut self) -> Result<()> {
        self.running = true;
        self.complete = false;
        self.task_manager
            .create_wakeup_sequence(&self.home_channel)
            .await?;
        info!("Wakeup sequence ready");
        Ok(())
    }

    async fn process(&mut self, round_number: u32) -> Result<RoundResult> {
        let mut result = RoundResult {
            round_number,
            ..RoundResult::default()
        };

        if self.complete {
            result.wakeup_complete = true;
            return Ok(result);
        }

        result.thoughts_generated = self.seed_wakeup_thoughts(round_number).await?;

        // Process pending wakeup thoughts, including child thoughts
        // enqueued by prior rounds
        let pending = self.persistence.thoughts.pending_for_active_tasks().await?;
        if !pending.is_empty() {
            let (processed, errors) = self.work.process_batch(pending, round_number).await?;
            result.thoughts_processed = processed;
            result.errors = errors;
        }

        if self.all_steps_complete().await? {
            self.complete = true;
            result.wakeup_complete = true;
            self.task_manager
                .complete_task(
                    WAKEUP_ROOT_TASK_ID,
                    TaskOutcome::new("wakeup ritual complete"),
                )
                .await?;
            info!("Wakeup sequence completed");
        }

        self.metrics.rounds_completed += 1;
        self.metrics.items_processed += result.thoughts_processed as u64;
        Ok(result)
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }

    fn get_supported_states(&self) -> Vec<AgentState> {
        vec![AgentState::Wakeup]
    }

    fn get_status(&self) -> ProcessorStatus {
        ProcessorStatus {
            name: "wakeup".to_string(),
            supported_states: self.get_supported_states(),
            is_running: self.running,
            metrics: self.metrics.clone(),
        }
    }
}
