//! Dream processor: bounded benchmark pulses while the agent is idle.
//!
//! A dream cycle runs pulses at `pulse_interval` until `duration` elapses
//! or the cycle is stopped. Each pulse records a topic and a score,
//! insights are generated every third pulse, and a summary is available
//! during and after the cycle.

use super::{AgentState, Processor, ProcessorMetrics, ProcessorStatus, RoundResult};
use crate::clock::Clock;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

const PULSE_TOPICS: &[&str] = &[
    "pattern recall",
    "counterfactual planning",
    "value tradeoffs",
    "memory compression",
    "channel etiquette",
    "failure modes",
];

const MAX_PULSE_HISTORY: usize = 5;

/// Summary of the current or last dream cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DreamSummary {
    pub dreaming: bool,
    pub total_pulses: u64,
    pub topics: Vec<String>,
    pub average_score: f64,
    pub recent_pulses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct DreamState {
    total_pulses: u64,
    topics: Vec<String>,
    scores: Vec<f64>,
    pulse_history: Vec<String>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

struct DreamInner {
    clock: Arc<dyn Clock>,
    pulse_interval: Duration,
    state: Mutex<DreamState>,
    stop_flag: AtomicBool,
    stop_notify: Notify,
}

impl DreamInner {
    fn pulse(&self) {
        let mut state = self.state.lock();
        state.total_pulses += 1;
        let pulse_number = state.total_pulses;

        let mut rng = rand::thread_rng();
        let topic = PULSE_TOPICS
            .choose(&mut rng)
            .copied()
            .unwrap_or("unfocused")
            .to_string();
        let score: f64 = rng.gen_range(0.5..1.0);

        let line = format!(
            "pulse {}: dreamt about '{}', score {:.2}",
            pulse_number, topic, score
        );
        info!(pulse = pulse_number, topic = %topic, score, "Dream pulse");

        state.topics.push(topic);
        state.scores.push(score);
        state.pulse_history.push(line);
        if state.pulse_history.len() > MAX_PULSE_HISTORY {
            state.pulse_history.remove(0);
        }

        if pulse_number % 3 == 0 {
            let average: f64 = state.scores.iter().sum::<f64>() / state.scores.len() as f64;
            info!(
                pulses = pulse_number,
                average_score = average,
                recent = %state.pulse_history.join("; "),
                "Dream insights"
            );
        }
    }
}

/// Handles the DREAM state
pub struct DreamProcessor {
    inner: Arc<DreamInner>,
    dream_task: Option<tokio::task::JoinHandle<()>>,
    running: bool,
    metrics: ProcessorMetrics,
}

impl DreamProcessor {
    pub fn new(clock: Arc<dyn Clock>, pulse_interval: Duration) -> Self {
        Self {
            inner: Arc::new(DreamInner {
                clock,
                pulse_interval,
                state: Mutex::new(DreamState::default()),
                stop_flag: AtomicBool::new(false),
                stop_notify: Notify::new(),
            }),
            dream_task: None,
            running: false,
            metrics: ProcessorMetrics::default(),
        }
    }

    pub fn is_dreaming(&self) -> bool {
        self.dream_task
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    /// Start a dream cycle bounded by `duration`
    pub fn start_dreaming(&mut self, duration: Duration) {
        if self.is_dreaming() {
            warn!("Dream cycle already running");
            return;
        }

        {
            let mut state = self.inner.state.lock();
            state.started_at = Some(self.inner.clock.now());
            state.ended_at = None;
        }
        self.inner.stop_flag.store(false, Ordering::SeqCst);

        let inner = self.inner.clone();
        info!(duration_secs = duration.as_secs(), "Starting dream cycle");

        self.dream_task = Some(tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + duration;

            while !inner.stop_flag.load(Ordering::SeqCst) {
                if tokio::time::Instant::now() >= deadline {
                    info!("Dream duration reached");
                    break;
                }

                inner.pulse();

                tokio::select! {
                    _ = inner.stop_notify.notified() => break,
                    _ = tokio::time::sleep(inner.pulse_interval) => {}
                }
            }

            inner.state.lock().ended_at = Some(inner.clock.now());
            info!("Dream cycle completed");
        }));
    }

    /// Stop the dream cycle gracefully
    pub async fn stop_dreaming(&mut self) {
        let Some(task) = self.dream_task.take() else {
            return;
        };

        self.inner.stop_flag.store(true, Ordering::SeqCst);
        self.inner.stop_notify.notify_waiters();

        if tokio::time::timeout(Duration::from_secs(10), task).await.is_err() {
            warn!("Dream cycle did not stop within timeout");
        }

        let mut state = self.inner.state.lock();
        if state.ended_at.is_none() {
            state.ended_at = Some(self.inner.clock.now());
        }
    }

    /// Summary of the current or last dream session
    pub fn summary(&self) -> DreamSummary {
        let state = self.inner.state.lock();
        let average_score = if state.scores.is_empty() {
            0.0
        } else {
            state.scores.iter().sum::<f64>() / state.scores.len() as f64
        };

        DreamSummary {
            dreaming: self.is_dreaming(),
            total_pulses: state.total_pulses,
            topics: state.topics.clone(),
            average_score,
            recent_pulses: state.pulse_history.clone(),
            started_at: state.started_at,
            ended_at: state.ended_at,
        }
    }
}

#[async_trait]
impl Processor for DreamProcessor {
    async fn initialize(&mut self) -> Result<()> {
        self.running = true;
        Ok(())
    }

    /// While in DREAM the pulse loop does the work; a round only reports
    async fn process(&mut self, round_number: u32) -> Result<RoundResult> {
        self.metrics.rounds_completed += 1;
        Ok(RoundResult {
            round_number,
            was_idle: !self.is_dreaming(),
            ..RoundResult::default()
        })
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.stop_dreaming().await;
        self.running = false;
        Ok(())
    }

    fn get_supported_states(&self) -> Vec<AgentState> {
        vec![AgentState::Dream]
    }

    fn get_status(&self) -> ProcessorStatus {
        ProcessorStatus {
            name: "dream".to_string(),
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

    #[tokio::test]
    async fn test_dream_cycle_pulses_and_stops() {
        let clock = Arc::new(FixedClock::default_start());
        let mut dream = DreamProcessor::new(clock, Duration::from_millis(5));

        dream.start_dreaming(Duration::from_secs(30));
        tokio::time::sleep(Duration::from_millis(40)).await;
        dream.stop_dreaming().await;

        let summary = dream.summary();
        assert!(!summary.dreaming);
        assert!(summary.total_pulses >= 2, "pulses: {}", summary.total_pulses);
        assert!(summary.average_score >= 0.5);
        assert!(summary.recent_pulses.len() <= MAX_PULSE_HISTORY);
        assert!(summary.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_dream_respects_duration_bound() {
        let clock = Arc::new(FixedClock::default_start());
        let mut dream = DreamProcessor::new(clock, Duration::from_millis(5));

        dream.start_dreaming(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(!dream.is_dreaming());
        dream.stop_dreaming().await;
    }

    #[tokio::test]
    async fn test_double_start_is_ignored() {
        let clock = Arc::new(FixedClock::default_start());
        let mut dream = DreamProcessor::new(clock, Duration::from_millis(5));

        dream.start_dreaming(Duration::from_secs(10));
        let pulses_before = dream.summary().total_pulses;
        dream.start_dreaming(Duration::from_secs(10));

        tokio::time::sleep(Duration::from_millis(15)).await;
        dream.stop_dreaming().await;
        assert!(dream.summary().total_pulses >= pulses_before);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let clock = Arc::new(FixedClock::default_start());
        let mut dream = DreamProcessor::new(clock, Duration::from_millis(5));
        dream.stop_dreaming().await;
        assert_eq!(dream.summary().total_pulses, 0);
    }
}
