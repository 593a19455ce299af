//! Self-observation service: the agent's view of its own recent
//! behavior.
//!
//! Each review pass tallies recent service correlations into a behavior
//! summary (actions taken, failure count). The runtime reviews
//! periodically so the latest summary is always available for
//! reflection.

use crate::clock::Clock;
use crate::error::Result;
use crate::schemas::CorrelationStatus;
use crate::telemetry::TelemetryService;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

const REVIEW_WINDOW: i64 = 100;

/// Tallied view of recent behavior
#[derive(Debug, Clone, PartialEq)]
pub struct BehaviorSummary {
    /// Count per action type observed in recent correlations
    pub actions: BTreeMap<String, u64>,
    pub failures: u64,
    pub reviewed_at: DateTime<Utc>,
}

/// Periodic behavior review over telemetry
#[derive(Clone)]
pub struct SelfObservationService {
    telemetry: Arc<TelemetryService>,
    clock: Arc<dyn Clock>,
    last: Arc<Mutex<Option<BehaviorSummary>>>,
}

impl SelfObservationService {
    pub fn new(telemetry: Arc<TelemetryService>, clock: Arc<dyn Clock>) -> Self {
        Self {
            telemetry,
            clock,
            last: Arc::new(Mutex::new(None)),
        }
    }

    /// Run one review pass and keep the summary
    pub async fn review(&self) -> Result<BehaviorSummary> {
        let correlations = self.telemetry.recent(REVIEW_WINDOW).await?;

        let mut actions: BTreeMap<String, u64> = BTreeMap::new();
        let mut failures = 0u64;
        for correlation in &correlations {
            *actions.entry(correlation.action_type.clone()).or_insert(0) += 1;
            if correlation.status == CorrelationStatus::Failed {
                failures += 1;
            }
        }

        let summary = BehaviorSummary {
            actions,
            failures,
            reviewed_at: self.clock.now(),
        };

        debug!(
            actions = summary.actions.len(),
            failures = summary.failures,
            "Self-observation review complete"
        );

        *self.last.lock() = Some(summary.clone());
        Ok(summary)
    }

    /// The most recent summary, if a review has run
    pub fn last_summary(&self) -> Option<BehaviorSummary> {
        self.last.lock().clone()
    }

    /// Report the final summary
    pub async fn stop(&self) {
        match self.last_summary() {
            Some(summary) => info!(
                actions = summary.actions.len(),
                failures = summary.failures,
                "Self-observation stopped"
            ),
            None => info!("Self-observation stopped; no reviews ran"),
        }
    }
}
