//! Incident management: a bounded in-memory record of operational
//! failures, kept for review and reflection.

use crate::clock::Clock;
use crate::schemas::Severity;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_CAPACITY: usize = 500;

/// One recorded incident
#[derive(Debug, Clone, PartialEq)]
pub struct Incident {
    pub incident_id: String,
    pub severity: Severity,
    pub source: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

/// Bounded incident log
#[derive(Clone)]
pub struct IncidentService {
    clock: Arc<dyn Clock>,
    incidents: Arc<Mutex<VecDeque<Incident>>>,
    capacity: usize,
}

impl IncidentService {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            incidents: Arc::new(Mutex::new(VecDeque::new())),
            capacity: DEFAULT_CAPACITY,
        }
    }

    /// Record an incident; the oldest entry falls off at capacity
    pub fn record(
        &self,
        severity: Severity,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Incident {
        let incident = Incident {
            incident_id: uuid::Uuid::new_v4().to_string(),
            severity,
            source: source.into(),
            message: message.into(),
            occurred_at: self.clock.now(),
        };

        warn!(
            source = %incident.source,
            severity = incident.severity.as_str(),
            message = %incident.message,
            "Incident recorded"
        );

        let mut incidents = self.incidents.lock();
        incidents.push_back(incident.clone());
        while incidents.len() > self.capacity {
            incidents.pop_front();
        }

        incident
    }

    /// Most recent incidents, newest first
    pub fn recent(&self, limit: usize) -> Vec<Incident> {
        self.incidents
            .lock()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.incidents.lock().len()
    }

    pub fn count_at_least(&self, severity: Severity) -> usize {
        self.incidents
            .lock()
            .iter()
            .filter(|incident| incident.severity >= severity)
            .count()
    }

    /// Report final totals
    pub async fn stop(&self) {
        info!(
            total = self.count(),
            critical = self.count_at_least(Severity::Critical),
            "Incident management stopped"
        );
    }
}
