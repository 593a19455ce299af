//! Conscience verdicts: the guardrail evaluation record.

use serde::{Deserialize, Serialize};

/// Severity of a conscience finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

/// Result of one conscience check against a selected action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConscienceVerdict {
    pub check_name: String,
    pub passed: bool,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub can_override: bool,
    /// Set when policy replaced the action because of this verdict
    #[serde(default)]
    pub overridden: bool,
}

impl ConscienceVerdict {
    pub fn pass(check_name: impl Into<String>) -> Self {
        Self {
            check_name: check_name.into(),
            passed: true,
            severity: Severity::Info,
            reason: None,
            can_override: true,
            overridden: false,
        }
    }

    pub fn fail(
        check_name: impl Into<String>,
        severity: Severity,
        reason: impl Into<String>,
        can_override: bool,
    ) -> Self {
        Self {
            check_name: check_name.into(),
            passed: false,
            severity,
            reason: Some(reason.into()),
            can_override,
            overridden: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Error);
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn test_verdict_constructors() {
        let pass = ConscienceVerdict::pass("entropy");
        assert!(pass.passed);

        let fail = ConscienceVerdict::fail("policy", Severity::Critical, "policy X", false);
        assert!(!fail.passed);
        assert!(!fail.can_override);
        assert_eq!(fail.reason.as_deref(), Some("policy X"));
    }
}
