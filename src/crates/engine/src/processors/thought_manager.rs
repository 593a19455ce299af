//! Thought manager (C10): seed generation, queueing, and batching.

use crate::clock::Clock;
use crate::error::Result;
use crate::persistence::Persistence;
use crate::schemas::{Task, Thought, ThoughtStatus, ThoughtType};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};

/// Manages the thought queue for one processor
pub struct ThoughtManager {
    persistence: Arc<Persistence>,
    clock: Arc<dyn Clock>,
    max_active_thoughts: usize,
    default_channel_id: Option<String>,
    queue: VecDeque<Thought>,
}

impl ThoughtManager {
    pub fn new(
        persistence: Arc<Persistence>,
        clock: Arc<dyn Clock>,
        max_active_thoughts: usize,
        default_channel_id: Option<String>,
    ) -> Self {
        Self {
            persistence,
            clock,
            max_active_thoughts,
            default_channel_id,
            queue: VecDeque::new(),
        }
    }

    /// One SEED thought per task, PENDING at depth 0
    pub async fn generate_seed_thoughts(&self, tasks: &[Task], round_number: u32) -> Result<u32> {
        let mut generated = 0u32;

        for task in tasks {
            let mut seed = Thought::new(
                &task.task_id,
                ThoughtType::Seed,
                &task.description,
                round_number as i32,
                self.clock.now(),
            );
            seed.context.channel_id = if task.channel_id.trim().is_empty() {
                self.default_channel_id.clone()
            } else {
                Some(task.channel_id.clone())
            };
            seed.context.channel_context = task.context.channel_context.clone();

            self.persistence.thoughts.insert(&seed).await?;
            generated += 1;
        }

        if generated > 0 {
            info!(generated, round_number, "Generated seed thoughts");
        }
        Ok(generated)
    }

    /// Pull PENDING thoughts from active tasks into the round queue
    ///
    /// Priority then creation order, capped at `max_active_thoughts`.
    /// Memory-meta thoughts have exclusive rounds: when any is pending,
    /// only memory-meta thoughts are queued.
    pub async fn populate_queue(&mut self, round_number: u32) -> Result<usize> {
        let mut pending = self.persistence.thoughts.pending_for_active_tasks().await?;

        if pending.iter().any(|t| t.thought_type == ThoughtType::MemoryMeta) {
            debug!(round_number, "Memory-meta thoughts pending; exclusive round");
            pending.retain(|t| t.thought_type == ThoughtType::MemoryMeta);
        }

        pending.truncate(self.max_active_thoughts);

        self.queue = pending.into();
        debug!(queued = self.queue.len(), round_number, "Populated thought queue");
        Ok(self.queue.len())
    }

    /// Take up to `batch_size` thoughts from the queue
    pub fn get_queue_batch(&mut self, batch_size: usize) -> Vec<Thought> {
        let take = batch_size.min(self.queue.len());
        self.queue.drain(..take).collect()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Atomically claim a batch as PROCESSING
    ///
    /// Thoughts that left PENDING since queueing are dropped from the
    /// returned batch.
    pub async fn mark_thoughts_processing(
        &self,
        batch: Vec<Thought>,
        round_number: u32,
    ) -> Result<Vec<Thought>> {
        let ids: Vec<String> = batch.iter().map(|t| t.thought_id.clone()).collect();
        let claimed = self
            .persistence
            .thoughts
            .mark_processing(&ids, round_number as i32, self.clock.now())
            .await?;

        Ok(batch
            .into_iter()
            .filter(|t| claimed.contains(&t.thought_id))
            .map(|mut t| {
                t.status = ThoughtStatus::Processing;
                t.round_number = round_number as i32;
                t
            })
            .collect())
    }

    /// Insert a follow-up thought one level deeper than its parent
    pub async fn create_follow_up(
        &self,
        parent: &Thought,
        thought_type: ThoughtType,
        content: impl Into<String>,
        round_number: u32,
    ) -> Result<Thought> {
        let follow_up = Thought::follow_up(
            parent,
            thought_type,
            content,
            round_number as i32,
            self.clock.now(),
        );
        self.persistence.thoughts.insert(&follow_up).await?;
        Ok(follow_up)
    }

    pub async fn pending_thought_count(&self) -> Result<i64> {
        self.persistence
            .thoughts
            .count_by_status(ThoughtStatus::Pending)
            .await
    }

    pub async fn processing_thought_count(&self) -> Result<i64> {
        self.persistence
            .thoughts
            .count_by_status(ThoughtStatus::Processing)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::{Database, MigrationSet};
    use crate::schemas::TaskStatus;
    use chrono::Utc;

    async fn setup(max_active: usize) -> (ThoughtManager, Arc<Persistence>) {
        let db = Database::test_in_memory(MigrationSet::Engine).await.unwrap();
        let persistence = Arc::new(Persistence::new(db));
        let clock = Arc::new(FixedClock::default_start());
        (
            ThoughtManager::new(persistence.clone(), clock, max_active, Some("home".into())),
            persistence,
        )
    }

    async fn active_task(persistence: &Persistence, description: &str, priority: i32) -> Task {
        let task = Task::new(description, "chan", priority, Utc::now())
            .with_status(TaskStatus::Active);
        persistence.tasks.insert(&task).await.unwrap();
        task
    }

    #[tokio::test]
    async fn test_seed_thoughts_one_per_task() {
        let (manager, persistence) = setup(50).await;
        let a = active_task(&persistence, "task a", 0).await;
        let b = active_task(&persistence, "task b", 0).await;

        let generated = manager
            .generate_seed_thoughts(&[a.clone(), b.clone()], 1)
            .await
            .unwrap();
        assert_eq!(generated, 2);

        let thoughts = persistence.thoughts.for_task(&a.task_id).await.unwrap();
        assert_eq!(thoughts.len(), 1);
        assert_eq!(thoughts[0].thought_type, ThoughtType::Seed);
        assert_eq!(thoughts[0].thought_depth, 0);
        assert_eq!(thoughts[0].status, ThoughtStatus::Pending);
        assert_eq!(thoughts[0].content, "task a");
    }

    #[tokio::test]
    async fn test_populate_queue_caps_at_max_active() {
        let (mut manager, persistence) = setup(2).await;
        let task = active_task(&persistence, "t", 0).await;

        for i in 0..5 {
            persistence
                .thoughts
                .insert(&Thought::new(
                    &task.task_id,
                    ThoughtType::Standard,
                    format!("thought {}", i),
                    0,
                    Utc::now(),
                ))
                .await
                .unwrap();
        }

        let queued = manager.populate_queue(1).await.unwrap();
        assert_eq!(queued, 2);
    }

    #[tokio::test]
    async fn test_zero_max_active_thoughts_queues_nothing() {
        let (mut manager, persistence) = setup(0).await;
        let task = active_task(&persistence, "t", 0).await;
        manager
            .generate_seed_thoughts(&[task], 0)
            .await
            .unwrap();

        assert_eq!(manager.populate_queue(0).await.unwrap(), 0);
        assert!(manager.get_queue_batch(5).is_empty());
    }

    #[tokio::test]
    async fn test_memory_meta_rounds_are_exclusive() {
        let (mut manager, persistence) = setup(50).await;
        let task = active_task(&persistence, "t", 0).await;

        persistence
            .thoughts
            .insert(&Thought::new(&task.task_id, ThoughtType::Standard, "normal", 0, Utc::now()))
            .await
            .unwrap();
        persistence
            .thoughts
            .insert(&Thought::new(
                &task.task_id,
                ThoughtType::MemoryMeta,
                "consolidate",
                0,
                Utc::now(),
            ))
            .await
            .unwrap();

        let queued = manager.populate_queue(1).await.unwrap();
        assert_eq!(queued, 1);
        let batch = manager.get_queue_batch(5);
        assert_eq!(batch[0].thought_type, ThoughtType::MemoryMeta);
    }

    #[tokio::test]
    async fn test_mark_processing_filters_claimed() {
        let (mut manager, persistence) = setup(50).await;
        let task = active_task(&persistence, "t", 0).await;
        manager.generate_seed_thoughts(&[task], 0).await.unwrap();

        manager.populate_queue(1).await.unwrap();
        let batch = manager.get_queue_batch(5);
        assert_eq!(batch.len(), 1);

        let marked = manager.mark_thoughts_processing(batch.clone(), 1).await.unwrap();
        assert_eq!(marked.len(), 1);
        assert_eq!(marked[0].status, ThoughtStatus::Processing);

        // Already claimed: a second attempt claims nothing
        let remarked = manager.mark_thoughts_processing(batch, 1).await.unwrap();
        assert!(remarked.is_empty());
    }
}
