//! Solitude processor: minimal processing and reflection.
//!
//! In this state the agent only watches for critical tasks, performs
//! periodic maintenance and reflection, and otherwise conserves
//! resources. Exit conditions: critical tasks exist, the maximum duration
//! elapses, or the pending backlog grows past the threshold.

use super::task_manager::TaskManager;
use super::{AgentState, Processor, ProcessorMetrics, ProcessorStatus, RoundResult};
use crate::clock::Clock;
use crate::error::Result;
use crate::persistence::Persistence;
use crate::schemas::TaskStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Minimum priority for a task to count as critical
pub const DEFAULT_CRITICAL_PRIORITY_THRESHOLD: i32 = 8;
/// Maximum continuous time in solitude, in seconds
pub const MAX_SOLITUDE_SECS: i64 = 1800;
/// Pending backlog size that forces an exit
pub const BACKLOG_EXIT_THRESHOLD: i64 = 5;

const MAINTENANCE_EVERY: u32 = 10;
const REFLECTION_EVERY: u32 = 5;

/// Reflection bookkeeping
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReflectionData {
    pub tasks_reviewed: u64,
    pub cleanup_performed: bool,
}

/// Handles the SOLITUDE state
pub struct SolitudeProcessor {
    task_manager: TaskManager,
    persistence: Arc<Persistence>,
    clock: Arc<dyn Clock>,
    critical_priority_threshold: i32,
    entered_at: Option<DateTime<Utc>>,
    reflection: ReflectionData,
    running: bool,
    metrics: ProcessorMetrics,
}

impl SolitudeProcessor {
    pub fn new(
        task_manager: TaskManager,
        persistence: Arc<Persistence>,
        clock: Arc<dyn Clock>,
        critical_priority_threshold: i32,
    ) -> Self {
        Self {
            task_manager,
            persistence,
            clock,
            critical_priority_threshold,
            entered_at: None,
            reflection: ReflectionData::default(),
            running: false,
            metrics: ProcessorMetrics::default(),
        }
    }

    pub fn reflection(&self) -> &ReflectionData {
        &self.reflection
    }

    async fn check_critical_tasks(&self) -> Result<u32> {
        let pending = self.persistence.tasks.pending_for_activation(20).await?;
        let critical = pending
            .iter()
            .filter(|t| t.priority >= self.critical_priority_threshold)
            .count() as u32;

        for task in pending
            .iter()
            .filter(|t| t.priority >= self.critical_priority_threshold)
        {
            info!(
                task_id = %task.task_id,
                priority = task.priority,
                "Critical task found during solitude"
            );
        }
        Ok(critical)
    }

    async fn perform_maintenance(&mut self) -> Result<u64> {
        info!("Performing solitude maintenance");
        let deleted_tasks = self.task_manager.cleanup_old_completed_tasks(7).await?;

        let cutoff = self.clock.now() - chrono::Duration::days(7);
        let old_thoughts = self.persistence.thoughts.older_than(cutoff).await?;
        let old_ids: Vec<String> = old_thoughts
            .into_iter()
            .filter(|t| t.status.is_terminal())
            .map(|t| t.thought_id)
            .collect();
        let deleted_thoughts = self.persistence.thoughts.delete_by_ids(&old_ids).await?;

        self.reflection.cleanup_performed = true;
        Ok(deleted_tasks + deleted_thoughts)
    }

    async fn reflect(&mut self) -> Result<u64> {
        let recent = self.persistence.tasks.recent_completed(20).await?;
        self.reflection.tasks_reviewed += recent.len() as u64;

        if let Some(most_common_channel) = most_common(recent.iter().map(|t| t.channel_id.clone()))
        {
            debug!(channel = %most_common_channel, "Most common recent task channel");
        }
        Ok(recent.len() as u64)
    }

    async fn exit_conditions(&self) -> Result<(bool, Option<String>)> {
        let duration = self
            .entered_at
            .map(|entered| (self.clock.now() - entered).num_seconds())
            .unwrap_or(0);
        if duration > MAX_SOLITUDE_SECS {
            return Ok((true, Some("maximum solitude duration reached".to_string())));
        }

        let pending = self
            .persistence
            .tasks
            .count_by_status(TaskStatus::Pending)
            .await?;
        if pending > BACKLOG_EXIT_THRESHOLD {
            return Ok((true, Some(format!("accumulated {} pending tasks", pending))));
        }

        Ok((false, None))
    }
}

fn most_common<I: Iterator<Item = String>>(items: I) -> Option<String> {
    let mut counts = std::collections::HashMap::new();
    for item in items {
        *counts.entry(item).or_insert(0usize) += 1;
    }
    counts.into_iter().max_by_key(|(_, n)| *n).map(|(item, _)| item)
}

#[async_trait]
impl Processor for SolitudeProcessor {
    async fn initialize(&mut self) -> Result<()> {
        self.running = true;
        self.entered_at = Some(self.clock.now());
        Ok(())
    }

    async fn process(&mut self, round_number: u32) -> Result<RoundResult> {
        debug!(round_number, "Solitude round: minimal processing");

        let mut result = RoundResult {
            round_number,
            was_idle: true,
            ..RoundResult::default()
        };

        let critical = self.check_critical_tasks().await?;
        if critical > 0 {
            result.should_exit_state = true;
            result.exit_reason = Some(format!("{} critical tasks pending", critical));
            return Ok(result);
        }

        if round_number > 0 && round_number % MAINTENANCE_EVERY == 0 {
            self.perform_maintenance().await?;
        }
        if round_number > 0 && round_number % REFLECTION_EVERY == 0 {
            self.reflect().await?;
        }

        let (should_exit, reason) = self.exit_conditions().await?;
        result.should_exit_state = should_exit;
        result.exit_reason = reason;

        self.metrics.rounds_completed += 1;
        Ok(result)
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.running = false;
        self.entered_at = None;
        Ok(())
    }

    fn get_supported_states(&self) -> Vec<AgentState> {
        vec![AgentState::Solitude]
    }

    fn get_status(&self) -> ProcessorStatus {
        ProcessorStatus {
            name: "solitude".to_string(),
            supported_states: self.get_supported_states(),
            is_running: self.running,
            metrics: self.metrics.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::{Database, MigrationSet};
    use crate::schemas::Task;

    async fn setup() -> (SolitudeProcessor, Arc<Persistence>, Arc<FixedClock>) {
        let db = Database::test_in_memory(MigrationSet::Engine).await.unwrap();
        let persistence = Arc::new(Persistence::new(db));
        let clock = Arc::new(FixedClock::default_start());
        let task_manager = TaskManager::new(persistence.clone(), clock.clone(), 10);
        (
            SolitudeProcessor::new(
                task_manager,
                persistence.clone(),
                clock.clone(),
                DEFAULT_CRITICAL_PRIORITY_THRESHOLD,
            ),
            persistence,
            clock,
        )
    }

    #[tokio::test]
    async fn test_quiet_round_stays_in_solitude() {
        let (mut processor, _, _) = setup().await;
        processor.initialize().await.unwrap();

        let result = processor.process(1).await.unwrap();
        assert!(!result.should_exit_state);
        assert!(result.was_idle);
    }

    #[tokio::test]
    async fn test_critical_task_forces_exit() {
        let (mut processor, persistence, _) = setup().await;
        processor.initialize().await.unwrap();

        persistence
            .tasks
            .insert(&Task::new("urgent", "chan", 9, Utc::now()))
            .await
            .unwrap();

        let result = processor.process(1).await.unwrap();
        assert!(result.should_exit_state);
        assert!(result.exit_reason.unwrap().contains("critical"));
    }

    #[tokio::test]
    async fn test_backlog_forces_exit() {
        let (mut processor, persistence, _) = setup().await;
        processor.initialize().await.unwrap();

        for i in 0..6 {
            persistence
                .tasks
                .insert(&Task::new(format!("task {}", i), "chan", 1, Utc::now()))
                .await
                .unwrap();
        }

        let result = processor.process(1).await.unwrap();
        assert!(result.should_exit_state);
        assert!(result.exit_reason.unwrap().contains("pending"));
    }

    #[tokio::test]
    async fn test_duration_forces_exit() {
        let (mut processor, _, clock) = setup().await;
        processor.initialize().await.unwrap();

        clock.advance(chrono::Duration::seconds(MAX_SOLITUDE_SECS + 1));
        let result = processor.process(1).await.unwrap();
        assert!(result.should_exit_state);
        assert!(result.exit_reason.unwrap().contains("duration"));
    }

    #[tokio::test]
    async fn test_maintenance_runs_on_schedule() {
        let (mut processor, _, _) = setup().await;
        processor.initialize().await.unwrap();

        processor.process(10).await.unwrap();
        assert!(processor.reflection().cleanup_performed);
    }
}
