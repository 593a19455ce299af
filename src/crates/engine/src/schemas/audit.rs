//! Audit log entries and verification reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One hash-chained, signed audit entry
///
/// `entry_hash = H(sequence_number || previous_hash || canonical(payload))`
/// and sequence numbers are gapless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sequence_number: i64,
    pub event_type: String,
    pub actor: String,
    pub payload: serde_json::Value,
    pub previous_hash: String,
    pub entry_hash: String,
    pub signature: String,
    pub signing_key_id: String,
    pub event_timestamp: DateTime<Utc>,
}

/// Result of verifying the chain, in whole or in range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditVerificationReport {
    pub valid: bool,
    pub entries_verified: u64,
    pub verification_time_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl AuditVerificationReport {
    pub fn empty_chain(elapsed_ms: u64) -> Self {
        Self {
            valid: true,
            entries_verified: 0,
            verification_time_ms: elapsed_ms,
            errors: Vec::new(),
            warnings: vec!["audit chain is empty".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_serde_round_trip() {
        let entry = AuditEntry {
            sequence_number: 1,
            event_type: "speak".into(),
            actor: "agent".into(),
            payload: serde_json::json!({"channel_id": "chan"}),
            previous_hash: "0".repeat(64),
            entry_hash: "a".repeat(64),
            signature: "sig".into(),
            signing_key_id: "key-1".into(),
            event_timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        let back: AuditEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(entry, back);
    }

    #[test]
    fn test_empty_chain_report_is_valid_with_warning() {
        let report = AuditVerificationReport::empty_chain(3);
        assert!(report.valid);
        assert_eq!(report.entries_verified, 0);
        assert_eq!(report.warnings.len(), 1);
    }
}
