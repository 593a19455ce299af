//! Work processor: the normal task/thought processing loop.
//!
//! Phases per round: (1) activate pending tasks, (2) generate seed
//! thoughts, (3) populate the queue, (4) process a batch. Idle rounds are
//! counted but drive no transitions.

use super::task_manager::TaskManager;
use super::thought_manager::ThoughtManager;
use super::thought_processor::ThoughtProcessor;
use super::{AgentState, Processor, ProcessorMetrics, ProcessorStatus, RoundResult};
use crate::clock::Clock;
use crate::dispatch::ActionDispatcher;
use crate::error::Result;
use crate::persistence::Persistence;
use crate::schemas::dispatch::build_dispatch_context;
use crate::schemas::{FinalAction, Thought, ThoughtStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Default thoughts per processing batch
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Handles the WORK state
pub struct WorkProcessor {
    pub(crate) task_manager: TaskManager,
    pub(crate) thought_manager: ThoughtManager,
    pub(crate) thought_processor: Arc<ThoughtProcessor>,
    pub(crate) dispatcher: Arc<ActionDispatcher>,
    pub(crate) persistence: Arc<Persistence>,
    pub(crate) clock: Arc<dyn Clock>,
    origin_service: String,
    batch_size: usize,
    idle_rounds: u32,
    last_activity: DateTime<Utc>,
    running: bool,
    metrics: ProcessorMetrics,
}

impl WorkProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_manager: TaskManager,
        thought_manager: ThoughtManager,
        thought_processor: Arc<ThoughtProcessor>,
        dispatcher: Arc<ActionDispatcher>,
        persistence: Arc<Persistence>,
        clock: Arc<dyn Clock>,
        origin_service: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        let last_activity = clock.now();
        Self {
            task_manager,
            thought_manager,
            thought_processor,
            dispatcher,
            persistence,
            clock,
            origin_service: origin_service.into(),
            batch_size,
            idle_rounds: 0,
            last_activity,
            running: false,
            metrics: ProcessorMetrics::default(),
        }
    }

    pub fn idle_rounds(&self) -> u32 {
        self.idle_rounds
    }

    /// Seconds since the last round that processed anything
    pub fn idle_duration_secs(&self) -> f64 {
        ((self.clock.now() - self.last_activity).num_milliseconds().max(0) as f64) / 1000.0
    }

    /// Run the four work phases for one round
    pub(crate) async fn run_round(&mut self, round_number: u32) -> Result<RoundResult> {
        let mut result = RoundResult {
            round_number,
            ..RoundResult::default()
        };

        // Phase 1: task activation
        result.tasks_activated = self.task_manager.activate_pending_tasks().await?;

        // Phase 2: seed thought generation
        let needing_seed = self.task_manager.get_tasks_needing_seed(50).await?;
        result.thoughts_generated = self
            .thought_manager
            .generate_seed_thoughts(&needing_seed, round_number)
            .await?;

        // Phase 3: populate the queue
        let queue_size = self.thought_manager.populate_queue(round_number).await?;

        if queue_size == 0 {
            self.idle_rounds += 1;
            result.was_idle = true;
            debug!(round_number, idle_rounds = self.idle_rounds, "No thoughts to process");
            self.metrics.rounds_completed += 1;
            return Ok(result);
        }

        // Phase 4: batch processing
        let batch = self.thought_manager.get_queue_batch(self.batch_size);
        let (processed, errors) = self.process_batch(batch, round_number).await?;
        result.thoughts_processed = processed;
        result.errors = errors;

        self.idle_rounds = 0;
        self.last_activity = self.clock.now();
        self.metrics.rounds_completed += 1;
        self.metrics.items_processed += processed as u64;
        self.metrics.errors += errors as u64;

        Ok(result)
    }

    /// Claim and process a batch of thoughts concurrently
    pub(crate) async fn process_batch(
        &self,
        batch: Vec<Thought>,
        round_number: u32,
    ) -> Result<(u32, u32)> {
        let marked = self
            .thought_manager
            .mark_thoughts_processing(batch, round_number)
            .await?;

        if marked.is_empty() {
            return Ok((0, 0));
        }

        info!(batch = marked.len(), round_number, "Processing thought batch");
        let batch_context = self.thought_processor.batch_context().await?;

        let outcomes = futures::future::join_all(
            marked
                .iter()
                .map(|thought| self.process_one(thought, &batch_context, round_number)),
        )
        .await;

        let mut processed = 0u32;
        let mut errors = 0u32;
        for (thought, outcome) in marked.iter().zip(outcomes) {
            match outcome {
                Ok(()) => processed += 1,
                Err(e) => {
                    error!(thought_id = %thought.thought_id, error = %e, "Thought processing failed");
                    errors += 1;
                }
            }
        }

        Ok((processed, errors))
    }

    async fn process_one(
        &self,
        thought: &Thought,
        batch_context: &crate::context::BatchContext,
        round_number: u32,
    ) -> Result<()> {
        let task = self.persistence.tasks.get(&thought.source_task_id).await?;

        let processed = match self
            .thought_processor
            .process(thought, task.as_ref(), batch_context)
            .await
        {
            Ok(processed) => processed,
            Err(e) => {
                let error_kind = match &e {
                    crate::error::EngineError::ResourceBreach(_) => "resource_breach",
                    _ => "evaluation_failure",
                };
                self.mark_thought_failed(thought, error_kind, &e.to_string())
                    .await?;
                return Err(e);
            }
        };

        let handler_name = format!("{}_handler", processed.selection.selected_action);
        let ctx = match build_dispatch_context(
            thought,
            task.as_ref(),
            processed.selection.selected_action,
            &self.origin_service,
            &handler_name,
            round_number as i32,
            processed.verdicts.clone(),
            self.clock.now(),
        ) {
            Ok(ctx) => ctx,
            Err(e) => {
                self.mark_thought_failed(thought, "dispatch_failure", &e.to_string())
                    .await?;
                return Err(e);
            }
        };

        self.dispatcher
            .dispatch(&processed.selection, thought, &ctx)
            .await
    }

    async fn mark_thought_failed(
        &self,
        thought: &Thought,
        error_kind: &str,
        message: &str,
    ) -> Result<()> {
        self.persistence
            .thoughts
            .update_status(
                &thought.thought_id,
                ThoughtStatus::Failed,
                Some(&FinalAction::error(error_kind, message)),
                self.clock.now(),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Processor for WorkProcessor {
    async fn initialize(&mut self) -> Result<()> {
        self.running = true;
        self.idle_rounds = 0;
        Ok(())
    }

    async fn process(&mut self, round_number: u32) -> Result<RoundResult> {
        let started = self.clock.now();
        info!(round_number, "Starting work round");

        let result = self.run_round(round_number).await?;

        let duration = (self.clock.now() - started).num_milliseconds();
        info!(
            round_number,
            processed = result.thoughts_processed,
            duration_ms = duration,
            "Finished work round"
        );
        Ok(result)
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }

    fn get_supported_states(&self) -> Vec<AgentState> {
        vec![AgentState::Work]
    }

    fn get_status(&self) -> ProcessorStatus {
        ProcessorStatus {
            name: "work".to_string(),
            supported_states: self.get_supported_states(),
            is_running: self.running,
            metrics: self.metrics.clone(),
        }
    }
}
