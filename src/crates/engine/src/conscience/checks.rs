//! Built-in conscience checks.

use super::ConscienceCheck;
use crate::schemas::{
    ActionParameters, ActionSelectionResult, ActionType, ConscienceVerdict, Severity,
    SystemSnapshot, Thought,
};
use async_trait::async_trait;

/// The selected action must be in the profile's permitted set.
///
/// Action selection already validates this; the conscience holds the line
/// if anything upstream regresses. Non-overridable.
pub struct PermittedActionCheck {
    permitted: Vec<ActionType>,
}

impl PermittedActionCheck {
    pub fn new(permitted: Vec<ActionType>) -> Self {
        Self { permitted }
    }
}

#[async_trait]
impl ConscienceCheck for PermittedActionCheck {
    fn name(&self) -> &str {
        "permitted_action"
    }

    async fn evaluate(
        &self,
        selection: &ActionSelectionResult,
        _thought: &Thought,
        _snapshot: &SystemSnapshot,
    ) -> ConscienceVerdict {
        if self.permitted.contains(&selection.selected_action) {
            ConscienceVerdict::pass(self.name())
        } else {
            ConscienceVerdict::fail(
                self.name(),
                Severity::Critical,
                format!(
                    "action '{}' is outside the permitted set",
                    selection.selected_action
                ),
                false,
            )
        }
    }
}

/// SPEAK must carry substantive content.
///
/// Parameter validation rejects empty strings; this catches content that
/// is non-empty but informationally void (whitespace or filler only).
pub struct NonEmptySpeechCheck;

#[async_trait]
impl ConscienceCheck for NonEmptySpeechCheck {
    fn name(&self) -> &str {
        "non_empty_speech"
    }

    async fn evaluate(
        &self,
        selection: &ActionSelectionResult,
        _thought: &Thought,
        _snapshot: &SystemSnapshot,
    ) -> ConscienceVerdict {
        let ActionParameters::Speak(params) = &selection.parameters else {
            return ConscienceVerdict::pass(self.name());
        };

        let trimmed = params.content.trim();
        if trimmed.is_empty() || trimmed == "..." {
            ConscienceVerdict::fail(
                self.name(),
                Severity::Error,
                "speech content carries no information",
                true,
            )
        } else {
            ConscienceVerdict::pass(self.name())
        }
    }
}
