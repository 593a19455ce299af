//! Structured results of the decision-making pipeline.

use super::action::{ActionParameters, ActionType, DeferParams, PonderParams};
use serde::{Deserialize, Serialize};

/// Flag set on a fallback result when structured output could not be
/// obtained from the model after retries.
pub const FLAG_STRUCTURED_FAILURE: &str = "structured_output_error";

/// Ethical evaluator result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EthicalAssessment {
    pub context: String,
    pub alignment_check: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflicts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    pub decision: String,
    #[serde(default)]
    pub monitoring: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

impl EthicalAssessment {
    /// Fallback used when the evaluator could not produce a result
    pub fn fallback(flag: &str, detail: &str) -> Self {
        Self {
            context: format!("evaluation unavailable: {}", detail),
            alignment_check: "not evaluated".to_string(),
            conflicts: None,
            resolution: None,
            decision: "ponder".to_string(),
            monitoring: None,
            flags: vec![flag.to_string()],
        }
    }
}

/// Common-sense evaluator result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonSenseAssessment {
    pub plausibility_score: f64,
    #[serde(default)]
    pub flags: Vec<String>,
    pub reasoning: String,
}

impl CommonSenseAssessment {
    pub fn fallback(flag: &str, detail: &str) -> Self {
        Self {
            plausibility_score: 0.0,
            flags: vec![flag.to_string()],
            reasoning: format!("evaluation unavailable: {}", detail),
        }
    }
}

/// Domain-specific evaluator result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainAssessment {
    pub domain: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_action: Option<String>,
    #[serde(default)]
    pub flags: Vec<String>,
    pub reasoning: String,
}

impl DomainAssessment {
    pub fn fallback(domain: &str, flag: &str, detail: &str) -> Self {
        Self {
            domain: domain.to_string(),
            score: 0.0,
            recommended_action: None,
            flags: vec![flag.to_string()],
            reasoning: format!("evaluation unavailable: {}", detail),
        }
    }
}

/// Raw action-selection shape as returned by the model, before validation
#[derive(Debug, Clone, Deserialize)]
pub struct RawActionSelection {
    pub selected_action: String,
    #[serde(default)]
    pub action_parameters: serde_json::Value,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub monitoring: Option<String>,
    #[serde(default)]
    pub context_summary: Option<String>,
}

/// Validated action-selection result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSelectionResult {
    pub selected_action: ActionType,
    pub parameters: ActionParameters,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

impl ActionSelectionResult {
    /// PONDER fallback carrying the failure that produced it
    pub fn ponder_fallback(key_questions: Vec<String>, flag: &str) -> Self {
        Self {
            selected_action: ActionType::Ponder,
            parameters: ActionParameters::Ponder(PonderParams { key_questions }),
            rationale: "fallback after evaluation failure".to_string(),
            monitoring: None,
            context_summary: None,
            flags: vec![flag.to_string()],
        }
    }

    /// DEFER result constructed by policy rather than by the model
    pub fn defer_with_reason(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            selected_action: ActionType::Defer,
            parameters: ActionParameters::Defer(DeferParams {
                reason: reason.clone(),
                context: None,
            }),
            rationale: reason,
            monitoring: None,
            context_summary: None,
            flags: Vec::new(),
        }
    }
}

/// Combined output of one pipeline run for a thought
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmaOutcome {
    pub ethical: EthicalAssessment,
    pub common_sense: CommonSenseAssessment,
    pub domain: DomainAssessment,
    pub selection: ActionSelectionResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ponder_fallback_carries_flag() {
        let result = ActionSelectionResult::ponder_fallback(
            vec!["validation error for speak parameters".into()],
            FLAG_STRUCTURED_FAILURE,
        );
        assert_eq!(result.selected_action, ActionType::Ponder);
        assert!(result.flags.contains(&FLAG_STRUCTURED_FAILURE.to_string()));
    }

    #[test]
    fn test_defer_with_reason() {
        let result = ActionSelectionResult::defer_with_reason("no permitted actions");
        assert_eq!(result.selected_action, ActionType::Defer);
        match &result.parameters {
            ActionParameters::Defer(p) => assert_eq!(p.reason, "no permitted actions"),
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_raw_selection_accepts_minimal_shape() {
        let raw: RawActionSelection = serde_json::from_value(serde_json::json!({
            "selected_action": "speak",
            "action_parameters": {"content": "hi"}
        }))
        .unwrap();
        assert_eq!(raw.selected_action, "speak");
        assert!(raw.rationale.is_none());
    }

    #[test]
    fn test_assessment_serde_round_trip() {
        let assessment = CommonSenseAssessment {
            plausibility_score: 0.8,
            flags: vec!["checked".into()],
            reasoning: "fine".into(),
        };
        let json = serde_json::to_string(&assessment).unwrap();
        let back: CommonSenseAssessment = serde_json::from_str(&json).unwrap();
        assert_eq!(assessment, back);
    }
}
