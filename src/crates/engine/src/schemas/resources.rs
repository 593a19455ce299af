//! Resource budgets and the monitor's snapshot shape.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What to do when a budget's critical threshold is breached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceAction {
    Throttle,
    Defer,
    Reject,
    Shutdown,
}

/// One budgeted resource
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceBudget {
    pub limit: f64,
    pub warning: f64,
    pub critical: f64,
    pub action: ResourceAction,
}

impl ResourceBudget {
    pub fn new(limit: f64, warning: f64, critical: f64, action: ResourceAction) -> Self {
        Self {
            limit,
            warning,
            critical,
            action,
        }
    }
}

/// The full budget set the monitor tracks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceBudgets {
    pub memory_mb: ResourceBudget,
    pub tokens_hour: ResourceBudget,
    pub tokens_day: ResourceBudget,
    pub active_thoughts: ResourceBudget,
}

impl Default for ResourceBudgets {
    fn default() -> Self {
        Self {
            memory_mb: ResourceBudget::new(4096.0, 3072.0, 3891.0, ResourceAction::Throttle),
            tokens_hour: ResourceBudget::new(100_000.0, 80_000.0, 95_000.0, ResourceAction::Defer),
            tokens_day: ResourceBudget::new(1_000_000.0, 800_000.0, 950_000.0, ResourceAction::Reject),
            active_thoughts: ResourceBudget::new(50.0, 40.0, 48.0, ResourceAction::Defer),
        }
    }
}

/// Point-in-time view of resource usage against budgets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ResourceSnapshot {
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub critical: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub usage: BTreeMap<String, f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budgets_are_ordered() {
        let budgets = ResourceBudgets::default();
        for budget in [
            budgets.memory_mb,
            budgets.tokens_hour,
            budgets.tokens_day,
            budgets.active_thoughts,
        ] {
            assert!(budget.warning < budget.critical);
            assert!(budget.critical <= budget.limit);
        }
    }

    #[test]
    fn test_budgets_serde_round_trip() {
        let budgets = ResourceBudgets::default();
        let json = serde_json::to_string(&budgets).unwrap();
        let back: ResourceBudgets = serde_json::from_str(&json).unwrap();
        assert_eq!(budgets, back);
    }
}
