//! Resource monitor (part of C5's operating envelope).
//!
//! Tracks usage against declared budgets. Warning thresholds produce
//! warnings in the snapshot; critical thresholds produce critical entries
//! and a breach action that the work loop applies (throttle, defer,
//! reject, or shutdown). Critical breaches keep appearing in every
//! snapshot until usage drops back below the threshold.

use crate::clock::Clock;
use crate::schemas::{ResourceAction, ResourceBudget, ResourceBudgets, ResourceSnapshot};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug)]
struct UsageState {
    memory_mb: f64,
    tokens_hour: f64,
    hour_window_start: DateTime<Utc>,
    tokens_day: f64,
    day_window_start: DateTime<Utc>,
    active_thoughts: f64,
}

/// Budgeted resource monitor
#[derive(Clone)]
pub struct ResourceMonitor {
    budgets: ResourceBudgets,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<UsageState>>,
}

impl ResourceMonitor {
    pub fn new(budgets: ResourceBudgets, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            budgets,
            clock,
            state: Arc::new(Mutex::new(UsageState {
                memory_mb: 0.0,
                tokens_hour: 0.0,
                hour_window_start: now,
                tokens_day: 0.0,
                day_window_start: now,
                active_thoughts: 0.0,
            })),
        }
    }

    pub fn budgets(&self) -> &ResourceBudgets {
        &self.budgets
    }

    /// Record tokens consumed by an LLM call
    pub fn record_tokens(&self, tokens: u64) {
        let now = self.clock.now();
        let mut state = self.state.lock();

        if now - state.hour_window_start >= Duration::hours(1) {
            state.tokens_hour = 0.0;
            state.hour_window_start = now;
        }
        if now - state.day_window_start >= Duration::days(1) {
            state.tokens_day = 0.0;
            state.day_window_start = now;
        }

        state.tokens_hour += tokens as f64;
        state.tokens_day += tokens as f64;
    }

    /// Report the current number of in-flight thoughts
    pub fn set_active_thoughts(&self, count: u64) {
        self.state.lock().active_thoughts = count as f64;
    }

    /// Report current process memory usage
    pub fn set_memory_mb(&self, memory_mb: f64) {
        self.state.lock().memory_mb = memory_mb;
    }

    /// Current usage against budgets
    pub fn snapshot(&self) -> ResourceSnapshot {
        let state = self.state.lock();
        let mut usage = BTreeMap::new();
        let mut warnings = Vec::new();
        let mut critical = Vec::new();

        let tracked: [(&str, f64, ResourceBudget); 4] = [
            ("memory_mb", state.memory_mb, self.budgets.memory_mb),
            ("tokens_hour", state.tokens_hour, self.budgets.tokens_hour),
            ("tokens_day", state.tokens_day, self.budgets.tokens_day),
            (
                "active_thoughts",
                state.active_thoughts,
                self.budgets.active_thoughts,
            ),
        ];

        for (name, value, budget) in tracked {
            usage.insert(name.to_string(), value);
            if value >= budget.critical {
                critical.push(format!(
                    "{} at {:.0} (critical threshold {:.0})",
                    name, value, budget.critical
                ));
            } else if value >= budget.warning {
                warnings.push(format!(
                    "{} at {:.0} (warning threshold {:.0})",
                    name, value, budget.warning
                ));
            }
        }

        ResourceSnapshot {
            healthy: critical.is_empty(),
            warnings,
            critical,
            usage,
        }
    }

    /// Report final usage at shutdown
    pub fn stop(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            healthy = snapshot.healthy,
            warnings = snapshot.warnings.len(),
            critical = snapshot.critical.len(),
            "Resource monitor stopped"
        );
    }

    /// The action to take for the most severe active breach, if any
    pub fn breach_action(&self) -> Option<(ResourceAction, String)> {
        let state = self.state.lock();

        let tracked: [(&str, f64, ResourceBudget); 4] = [
            ("memory_mb", state.memory_mb, self.budgets.memory_mb),
            ("tokens_hour", state.tokens_hour, self.budgets.tokens_hour),
            ("tokens_day", state.tokens_day, self.budgets.tokens_day),
            (
                "active_thoughts",
                state.active_thoughts,
                self.budgets.active_thoughts,
            ),
        ];

        // Shutdown > reject > defer > throttle when several budgets breach
        let mut worst: Option<(ResourceAction, String)> = None;
        for (name, value, budget) in tracked {
            if value >= budget.critical {
                let candidate = (budget.action, format!("{} budget breached", name));
                worst = match worst {
                    None => Some(candidate),
                    Some(current) if severity(candidate.0) > severity(current.0) => Some(candidate),
                    keep => keep,
                };
            }
        }
        worst
    }
}

fn severity(action: ResourceAction) -> u8 {
    match action {
        ResourceAction::Throttle => 0,
        ResourceAction::Defer => 1,
        ResourceAction::Reject => 2,
        ResourceAction::Shutdown => 3,
    }
}
