//! Task scheduler service: agent-authored future work.
//!
//! Entries carry a description, channel, priority, and a due time. The
//! runtime polls for due entries and turns them into ordinary PENDING
//! tasks through the task manager. A stopped scheduler refuses new
//! entries so shutdown creates no further work.

use crate::clock::Clock;
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// One scheduled piece of future work
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEntry {
    pub entry_id: String,
    pub description: String,
    pub channel_id: String,
    pub priority: i32,
    pub run_at: DateTime<Utc>,
}

/// In-memory future-task scheduler
#[derive(Clone)]
pub struct SchedulerService {
    clock: Arc<dyn Clock>,
    entries: Arc<Mutex<Vec<ScheduledEntry>>>,
    stopped: Arc<AtomicBool>,
}

impl SchedulerService {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Arc::new(Mutex::new(Vec::new())),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Schedule work for a future time
    pub fn schedule(
        &self,
        description: impl Into<String>,
        channel_id: impl Into<String>,
        priority: i32,
        run_at: DateTime<Utc>,
    ) -> Result<ScheduledEntry> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(EngineError::ShutdownRequested(
                "scheduler is stopped".to_string(),
            ));
        }

        let entry = ScheduledEntry {
            entry_id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            channel_id: channel_id.into(),
            priority,
            run_at,
        };

        debug!(entry_id = %entry.entry_id, run_at = %entry.run_at, "Scheduled future task");
        self.entries.lock().push(entry.clone());
        Ok(entry)
    }

    /// Remove and return every entry whose time has come
    pub fn take_due_entries(&self) -> Vec<ScheduledEntry> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        let (due, pending): (Vec<_>, Vec<_>) =
            entries.drain(..).partition(|entry| entry.run_at <= now);
        *entries = pending;
        due
    }

    /// Cancel a scheduled entry by id
    pub fn cancel(&self, entry_id: &str) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| entry.entry_id != entry_id);
        entries.len() < before
    }

    pub fn pending_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Refuse further scheduling and report what was left undone
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let remaining = self.entries.lock().len();
        info!(remaining, "Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::Duration;

    fn service() -> (SchedulerService, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::default_start());
        (SchedulerService::new(clock.clone()), clock)
    }

    #[test]
    fn test_entries_become_due_with_time() {
        let (scheduler, clock) = service();
        let soon = clock.now() + Duration::seconds(30);
        let later = clock.now() + Duration::seconds(300);

        scheduler.schedule("check the backlog", "chan", 2, soon).unwrap();
        scheduler.schedule("weekly review", "chan", 1, later).unwrap();

        assert!(scheduler.take_due_entries().is_empty());
        assert_eq!(scheduler.pending_count(), 2);

        clock.advance(Duration::seconds(60));
        let due = scheduler.take_due_entries();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].description, "check the backlog");
        assert_eq!(scheduler.pending_count(), 1);
    }

    #[test]
    fn test_due_entries_are_taken_once() {
        let (scheduler, clock) = service();
        scheduler
            .schedule("one shot", "chan", 0, clock.now())
            .unwrap();

        assert_eq!(scheduler.take_due_entries().len(), 1);
        assert!(scheduler.take_due_entries().is_empty());
    }

    #[test]
    fn test_cancel() {
        let (scheduler, clock) = service();
        let entry = scheduler
            .schedule("cancel me", "chan", 0, clock.now() + Duration::seconds(10))
            .unwrap();

        assert!(scheduler.cancel(&entry.entry_id));
        assert!(!scheduler.cancel(&entry.entry_id));
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_stopped_scheduler_refuses_new_entries() {
        let (scheduler, clock) = service();
        scheduler.stop().await;

        let err = scheduler
            .schedule("too late", "chan", 0, clock.now())
            .unwrap_err();
        assert!(matches!(err, EngineError::ShutdownRequested(_)));
    }
}
