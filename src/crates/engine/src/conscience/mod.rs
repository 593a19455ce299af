//! Conscience (C8): post-selection guardrails.
//!
//! Every registered check sees `(action, thought, snapshot)` and returns a
//! verdict. Policy over the verdict set:
//!
//! - critical and non-overridable → the action is overridden to DEFER
//!   with the conscience reason attached
//! - error → one recursive re-selection with the failure context appended;
//!   a second failure forces PONDER
//! - warning / info → recorded, never altering the action
//!
//! Recursion is bounded to one re-evaluation per thought per round.

pub mod checks;

use crate::schemas::{
    ActionSelectionResult, ConscienceVerdict, Severity, SystemSnapshot, Thought,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// One guardrail check
#[async_trait]
pub trait ConscienceCheck: Send + Sync {
    fn name(&self) -> &str;

    async fn evaluate(
        &self,
        selection: &ActionSelectionResult,
        thought: &Thought,
        snapshot: &SystemSnapshot,
    ) -> ConscienceVerdict;
}

/// What the conscience decided about a selection
#[derive(Debug, Clone)]
pub enum ConscienceOutcome {
    /// The action stands
    Clear(Vec<ConscienceVerdict>),
    /// The action was replaced (critical, non-overridable failure)
    Override {
        replacement: ActionSelectionResult,
        verdicts: Vec<ConscienceVerdict>,
    },
    /// Action selection should run once more with this failure context
    Reevaluate {
        failure_context: String,
        verdicts: Vec<ConscienceVerdict>,
    },
}

/// The registered guardrails
#[derive(Clone, Default)]
pub struct Conscience {
    checks: Vec<Arc<dyn ConscienceCheck>>,
}

impl Conscience {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in guardrail set for an identity's permitted actions
    pub fn with_default_checks(permitted: Vec<crate::schemas::ActionType>) -> Self {
        let mut conscience = Self::new();
        conscience.register(Arc::new(checks::PermittedActionCheck::new(permitted)));
        conscience.register(Arc::new(checks::NonEmptySpeechCheck));
        conscience
    }

    pub fn register(&mut self, check: Arc<dyn ConscienceCheck>) {
        self.checks.push(check);
    }

    pub fn check_count(&self) -> usize {
        self.checks.len()
    }

    /// Evaluate all checks and apply policy
    pub async fn review(
        &self,
        selection: &ActionSelectionResult,
        thought: &Thought,
        snapshot: &SystemSnapshot,
    ) -> ConscienceOutcome {
        let mut verdicts = Vec::with_capacity(self.checks.len());
        for check in &self.checks {
            verdicts.push(check.evaluate(selection, thought, snapshot).await);
        }

        // Critical non-overridable failures take precedence
        if let Some(veto) = verdicts
            .iter()
            .position(|v| !v.passed && v.severity == Severity::Critical && !v.can_override)
        {
            let reason = verdicts[veto]
                .reason
                .clone()
                .unwrap_or_else(|| "conscience veto".to_string());
            warn!(
                thought_id = %thought.thought_id,
                check = %verdicts[veto].check_name,
                reason = %reason,
                "Conscience veto: overriding action to DEFER"
            );
            verdicts[veto].overridden = true;
            return ConscienceOutcome::Override {
                replacement: ActionSelectionResult::defer_with_reason(reason),
                verdicts,
            };
        }

        if let Some(failed) = verdicts
            .iter()
            .find(|v| !v.passed && v.severity == Severity::Error)
        {
            let failure_context = format!(
                "check '{}' failed: {}",
                failed.check_name,
                failed.reason.as_deref().unwrap_or("no reason given")
            );
            info!(
                thought_id = %thought.thought_id,
                context = %failure_context,
                "Conscience requests re-evaluation"
            );
            return ConscienceOutcome::Reevaluate {
                failure_context,
                verdicts,
            };
        }

        for verdict in verdicts.iter().filter(|v| !v.passed) {
            info!(
                thought_id = %thought.thought_id,
                check = %verdict.check_name,
                severity = verdict.severity.as_str(),
                "Conscience finding recorded"
            );
        }

        ConscienceOutcome::Clear(verdicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{ActionParameters, ActionType, SpeakParams, ThoughtType};
    use chrono::Utc;

    struct FixedCheck {
        name: &'static str,
        verdict: ConscienceVerdict,
    }

    #[async_trait]
    impl ConscienceCheck for FixedCheck {
        fn name(&self) -> &str {
            self.name
        }

        async fn evaluate(
            &self,
            _selection: &ActionSelectionResult,
            _thought: &Thought,
            _snapshot: &SystemSnapshot,
        ) -> ConscienceVerdict {
            self.verdict.clone()
        }
    }

    fn speak_selection() -> ActionSelectionResult {
        ActionSelectionResult {
            selected_action: ActionType::Speak,
            parameters: ActionParameters::Speak(SpeakParams {
                content: "Hello.".into(),
            }),
            rationale: "greeting".into(),
            monitoring: None,
            context_summary: None,
            flags: Vec::new(),
        }
    }

    fn thought() -> Thought {
        Thought::new("task-1", ThoughtType::Seed, "greet", 0, Utc::now())
    }

    #[tokio::test]
    async fn test_all_passing_is_clear() {
        let mut conscience = Conscience::new();
        conscience.register(Arc::new(FixedCheck {
            name: "ok",
            verdict: ConscienceVerdict::pass("ok"),
        }));

        let outcome = conscience
            .review(&speak_selection(), &thought(), &SystemSnapshot::default())
            .await;
        assert!(matches!(outcome, ConscienceOutcome::Clear(v) if v.len() == 1));
    }

    #[tokio::test]
    async fn test_critical_non_overridable_overrides_to_defer() {
        let mut conscience = Conscience::new();
        conscience.register(Arc::new(FixedCheck {
            name: "policy",
            verdict: ConscienceVerdict::fail("policy", Severity::Critical, "policy X", false),
        }));

        let outcome = conscience
            .review(&speak_selection(), &thought(), &SystemSnapshot::default())
            .await;

        match outcome {
            ConscienceOutcome::Override { replacement, verdicts } => {
                assert_eq!(replacement.selected_action, ActionType::Defer);
                assert!(verdicts[0].overridden);
                match replacement.parameters {
                    ActionParameters::Defer(p) => assert_eq!(p.reason, "policy X"),
                    other => panic!("wrong variant: {:?}", other),
                }
            }
            other => panic!("expected override, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_error_requests_reevaluation() {
        let mut conscience = Conscience::new();
        conscience.register(Arc::new(FixedCheck {
            name: "entropy",
            verdict: ConscienceVerdict::fail("entropy", Severity::Error, "content empty", true),
        }));

        let outcome = conscience
            .review(&speak_selection(), &thought(), &SystemSnapshot::default())
            .await;

        match outcome {
            ConscienceOutcome::Reevaluate { failure_context, .. } => {
                assert!(failure_context.contains("entropy"));
                assert!(failure_context.contains("content empty"));
            }
            other => panic!("expected reevaluate, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_warning_does_not_alter_action() {
        let mut conscience = Conscience::new();
        conscience.register(Arc::new(FixedCheck {
            name: "style",
            verdict: ConscienceVerdict::fail("style", Severity::Warning, "too brief", true),
        }));

        let outcome = conscience
            .review(&speak_selection(), &thought(), &SystemSnapshot::default())
            .await;
        assert!(matches!(outcome, ConscienceOutcome::Clear(_)));
    }

    #[tokio::test]
    async fn test_critical_overridable_does_not_veto() {
        let mut conscience = Conscience::new();
        conscience.register(Arc::new(FixedCheck {
            name: "soft",
            verdict: ConscienceVerdict::fail("soft", Severity::Critical, "soft stop", true),
        }));

        // Overridable criticals fall through to the record-only path
        let outcome = conscience
            .review(&speak_selection(), &thought(), &SystemSnapshot::default())
            .await;
        assert!(matches!(outcome, ConscienceOutcome::Clear(_)));
    }
}
