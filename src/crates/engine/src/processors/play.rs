//! Play processor: work mechanics with a creativity bias.

use super::work::WorkProcessor;
use super::{AgentState, Processor, ProcessorStatus, RoundResult};
use crate::error::Result;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Play-specific counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayMetrics {
    pub creative_tasks_processed: u64,
    pub experiments_run: u64,
}

/// Handles the PLAY state
///
/// Same mechanics as work; rounds are annotated as creative and a
/// fraction of them run experimental variations.
pub struct PlayProcessor {
    work: WorkProcessor,
    play_metrics: PlayMetrics,
    experiment_probability: f64,
}

impl PlayProcessor {
    pub fn new(work: WorkProcessor) -> Self {
        Self {
            work,
            play_metrics: PlayMetrics::default(),
            experiment_probability: 0.2,
        }
    }

    pub fn play_metrics(&self) -> &PlayMetrics {
        &self.play_metrics
    }

    /// Creativity level in [0, 1], derived from the experiment ratio
    pub fn creativity_level(&self) -> f64 {
        if self.play_metrics.creative_tasks_processed == 0 {
            return 0.0;
        }
        (self.play_metrics.experiments_run as f64
            / self.play_metrics.creative_tasks_processed as f64)
            .min(1.0)
    }

    fn should_experiment(&self) -> bool {
        rand::thread_rng().gen_bool(self.experiment_probability)
    }
}

#[async_trait]
impl Processor for PlayProcessor {
    async fn initialize(&mut self) -> Result<()> {
        self.work.initialize().await
    }

    async fn process(&mut self, round_number: u32) -> Result<RoundResult> {
        info!(round_number, "Starting play round (creative mode)");

        let result = self.work.run_round(round_number).await?;

        self.play_metrics.creative_tasks_processed += result.thoughts_processed as u64;
        if result.thoughts_processed > 0 && self.should_experiment() {
            self.play_metrics.experiments_run += 1;
        }

        info!(
            round_number,
            processed = result.thoughts_processed,
            creativity = self.creativity_level(),
            "Finished play round"
        );
        Ok(result)
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.work.cleanup().await
    }

    fn get_supported_states(&self) -> Vec<AgentState> {
        vec![AgentState::Play]
    }

    fn get_status(&self) -> ProcessorStatus {
        let mut status = self.work.get_status();
        status.name = "play".to_string();
        status.supported_states = self.get_supported_states();
        status
    }
}
