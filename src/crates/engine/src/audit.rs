//! Append-only audit service with a hash chain and signatures.
//!
//! `entry_hash = H(sequence_number || previous_hash || canonical(payload))`
//! where `canonical` serializes the payload with sorted keys. Sequence
//! numbers are gapless; appends serialize behind a mutex. Signature
//! primitives stay behind the [`AuditSigner`] trait; the default signer is
//! a keyed digest whose material lives in the audit database so chains
//! verify across restarts.

use crate::clock::Clock;
use crate::db::Database;
use crate::error::{EngineError, Result};
use crate::schemas::{AuditEntry, AuditVerificationReport};
use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::Row;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Previous-hash value of the first entry
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Signature provider for audit entries
pub trait AuditSigner: Send + Sync {
    fn key_id(&self) -> &str;
    fn sign(&self, entry_hash: &str) -> String;
}

/// Default signer: keyed SHA-256 digest over the entry hash
#[derive(Debug, Clone)]
pub struct KeyedDigestSigner {
    key_id: String,
    key_material: String,
}

impl KeyedDigestSigner {
    pub fn new(key_id: impl Into<String>, key_material: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            key_material: key_material.into(),
        }
    }

    /// Generate a fresh key with random material
    pub fn generate() -> Self {
        let mut material = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut material);
        Self {
            key_id: format!("audit-key-{}", uuid::Uuid::new_v4()),
            key_material: hex::encode(material),
        }
    }

    pub fn key_material(&self) -> &str {
        &self.key_material
    }

    fn digest(key_material: &str, entry_hash: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key_material.as_bytes());
        hasher.update(entry_hash.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl AuditSigner for KeyedDigestSigner {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn sign(&self, entry_hash: &str) -> String {
        Self::digest(&self.key_material, entry_hash)
    }
}

/// Append-only audit log service
#[derive(Clone)]
pub struct AuditService {
    db: Database,
    clock: Arc<dyn Clock>,
    signer: Arc<KeyedDigestSigner>,
    append_lock: Arc<Mutex<()>>,
}

impl AuditService {
    /// Create the service, registering the signing key if it is new
    pub async fn new(db: Database, clock: Arc<dyn Clock>) -> Result<Self> {
        let signer = KeyedDigestSigner::generate();

        sqlx::query(
            "INSERT INTO audit_signing_keys (key_id, key_material, created_at, revoked_at)
             VALUES (?, ?, ?, NULL)",
        )
        .bind(signer.key_id())
        .bind(signer.key_material())
        .bind(clock.now_iso())
        .execute(db.pool())
        .await?;

        info!(key_id = signer.key_id(), "Audit signing key registered");

        Ok(Self {
            db,
            clock,
            signer: Arc::new(signer),
            append_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Append an entry to the chain
    pub async fn log_action(
        &self,
        event_type: &str,
        actor: &str,
        payload: serde_json::Value,
    ) -> Result<AuditEntry> {
        let _guard = self.append_lock.lock().await;

        let (sequence_number, previous_hash) = match self.last_entry().await? {
            Some(last) => (last.sequence_number + 1, last.entry_hash),
            None => (1, GENESIS_HASH.to_string()),
        };

        let entry_hash = compute_entry_hash(sequence_number, &previous_hash, &payload);
        let signature = self.signer.sign(&entry_hash);
        let event_timestamp = self.clock.now();

        sqlx::query(
            "INSERT INTO audit_log (sequence_number, event_type, actor, payload, previous_hash, \
                                    entry_hash, signature, signing_key_id, event_timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(sequence_number)
        .bind(event_type)
        .bind(actor)
        .bind(payload.to_string())
        .bind(&previous_hash)
        .bind(&entry_hash)
        .bind(&signature)
        .bind(self.signer.key_id())
        .bind(event_timestamp.to_rfc3339())
        .execute(self.db.pool())
        .await?;

        Ok(AuditEntry {
            sequence_number,
            event_type: event_type.to_string(),
            actor: actor.to_string(),
            payload,
            previous_hash,
            entry_hash,
            signature,
            signing_key_id: self.signer.key_id().to_string(),
            event_timestamp,
        })
    }

    /// Latest entry, if the chain is non-empty
    pub async fn last_entry(&self) -> Result<Option<AuditEntry>> {
        let row = sqlx::query(
            "SELECT sequence_number, event_type, actor, payload, previous_hash, entry_hash, \
                    signature, signing_key_id, event_timestamp \
             FROM audit_log ORDER BY sequence_number DESC LIMIT 1",
        )
        .fetch_optional(self.db.pool())
        .await?;

        row.map(|r| entry_from_row(&r)).transpose()
    }

    pub async fn count_entries(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_log")
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }

    /// Entries with sequence in `[from_seq, to_seq]`, ascending
    pub async fn entries_in_range(&self, from_seq: i64, to_seq: i64) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            "SELECT sequence_number, event_type, actor, payload, previous_hash, entry_hash, \
                    signature, signing_key_id, event_timestamp \
             FROM audit_log WHERE sequence_number BETWEEN ? AND ? \
             ORDER BY sequence_number ASC",
        )
        .bind(from_seq)
        .bind(to_seq)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    /// Entries matching an event type, ascending
    pub async fn entries_for_event(&self, event_type: &str) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            "SELECT sequence_number, event_type, actor, payload, previous_hash, entry_hash, \
                    signature, signing_key_id, event_timestamp \
             FROM audit_log WHERE event_type = ? ORDER BY sequence_number ASC",
        )
        .bind(event_type)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    /// Verify the entire chain
    pub async fn verify_complete_chain(&self) -> Result<AuditVerificationReport> {
        let last = self.last_entry().await?;
        match last {
            Some(entry) => self.verify_range(1, entry.sequence_number).await,
            None => Ok(AuditVerificationReport::empty_chain(0)),
        }
    }

    /// Verify the chain over a sequence range
    pub async fn verify_range(&self, from_seq: i64, to_seq: i64) -> Result<AuditVerificationReport> {
        let started = Instant::now();
        let entries = self.entries_in_range(from_seq, to_seq).await?;

        if entries.is_empty() {
            return Ok(AuditVerificationReport::empty_chain(
                started.elapsed().as_millis() as u64,
            ));
        }

        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // When the range starts mid-chain, linkage to the prior entry is
        // checked against the stored previous entry.
        let mut expected_previous = if from_seq > 1 {
            self.entries_in_range(from_seq - 1, from_seq - 1)
                .await?
                .first()
                .map(|e| e.entry_hash.clone())
        } else {
            Some(GENESIS_HASH.to_string())
        };

        let mut expected_seq = entries[0].sequence_number;

        for entry in &entries {
            if entry.sequence_number != expected_seq {
                errors.push(format!(
                    "sequence gap: expected {}, found {}",
                    expected_seq, entry.sequence_number
                ));
                expected_seq = entry.sequence_number;
            }
            expected_seq += 1;

            if let Some(previous) = &expected_previous {
                if &entry.previous_hash != previous {
                    errors.push(format!(
                        "entry {} previous_hash does not match prior entry_hash",
                        entry.sequence_number
                    ));
                }
            } else {
                warnings.push(format!(
                    "entry {} linkage not checked: prior entry unavailable",
                    entry.sequence_number
                ));
            }

            let recomputed =
                compute_entry_hash(entry.sequence_number, &entry.previous_hash, &entry.payload);
            if recomputed != entry.entry_hash {
                errors.push(format!("entry {} hash mismatch", entry.sequence_number));
            }

            match self.verify_signature(entry).await {
                Ok(true) => {}
                Ok(false) => errors.push(format!(
                    "entry {} signature invalid under key {}",
                    entry.sequence_number, entry.signing_key_id
                )),
                Err(e) => errors.push(format!(
                    "entry {} signature check failed: {}",
                    entry.sequence_number, e
                )),
            }

            expected_previous = Some(entry.entry_hash.clone());
        }

        let report = AuditVerificationReport {
            valid: errors.is_empty(),
            entries_verified: entries.len() as u64,
            verification_time_ms: started.elapsed().as_millis() as u64,
            errors,
            warnings,
        };

        if !report.valid {
            warn!(errors = report.errors.len(), "Audit chain verification failed");
        }

        Ok(report)
    }

    async fn verify_signature(&self, entry: &AuditEntry) -> Result<bool> {
        let row = sqlx::query(
            "SELECT key_material, revoked_at FROM audit_signing_keys WHERE key_id = ?",
        )
        .bind(&entry.signing_key_id)
        .fetch_optional(self.db.pool())
        .await?;

        let Some(row) = row else {
            return Err(EngineError::Integrity(format!(
                "unknown signing key {}",
                entry.signing_key_id
            )));
        };

        // A key revoked before the entry was signed invalidates it
        if let Some(revoked_at) = row.get::<Option<String>, _>("revoked_at") {
            let revoked_at = DateTime::parse_from_rfc3339(&revoked_at)
                .map_err(|e| EngineError::Integrity(format!("bad revocation timestamp: {}", e)))?
                .with_timezone(&Utc);
            if revoked_at <= entry.event_timestamp {
                return Ok(false);
            }
        }

        let key_material: String = row.get("key_material");
        let expected = KeyedDigestSigner::digest(&key_material, &entry.entry_hash);
        Ok(expected == entry.signature)
    }

    /// Revoke a signing key as of now
    pub async fn revoke_key(&self, key_id: &str) -> Result<()> {
        sqlx::query("UPDATE audit_signing_keys SET revoked_at = ? WHERE key_id = ?")
            .bind(self.clock.now_iso())
            .bind(key_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    pub fn signing_key_id(&self) -> &str {
        self.signer.key_id()
    }

    /// Report the final chain length at shutdown
    pub async fn stop(&self) {
        match self.count_entries().await {
            Ok(count) => info!(entries = count, "Audit service stopped"),
            Err(e) => warn!(error = %e, "Audit service stopped without a final count"),
        }
    }
}

/// Hash over `sequence || previous_hash || canonical(payload)`
pub fn compute_entry_hash(
    sequence_number: i64,
    previous_hash: &str,
    payload: &serde_json::Value,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sequence_number.to_string().as_bytes());
    hasher.update(previous_hash.as_bytes());
    hasher.update(canonical_json(payload).as_bytes());
    hex::encode(hasher.finalize())
}

/// Canonical serialization: objects re-emitted with sorted keys
pub fn canonical_json(value: &serde_json::Value) -> String {
    fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let sorted: std::collections::BTreeMap<_, _> =
                    map.iter().map(|(k, v)| (k.clone(), canonicalize(v))).collect();
                serde_json::to_value(sorted).expect("canonical object")
            }
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(canonicalize).collect())
            }
            other => other.clone(),
        }
    }

    canonicalize(value).to_string()
}

fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<AuditEntry> {
    let payload_json: String = row.get("payload");
    let payload = serde_json::from_str(&payload_json)?;

    let event_timestamp: String = row.get("event_timestamp");
    let event_timestamp = DateTime::parse_from_rfc3339(&event_timestamp)
        .map_err(|e| EngineError::Integrity(format!("bad audit timestamp: {}", e)))?
        .with_timezone(&Utc);

    Ok(AuditEntry {
        sequence_number: row.get("sequence_number"),
        event_type: row.get("event_type"),
        actor: row.get("actor"),
        payload,
        previous_hash: row.get("previous_hash"),
        entry_hash: row.get("entry_hash"),
        signature: row.get("signature"),
        signing_key_id: row.get("signing_key_id"),
        event_timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::MigrationSet;
    use serde_json::json;

    async fn setup() -> AuditService {
        let db = Database::test_in_memory(MigrationSet::Audit).await.unwrap();
        AuditService::new(db, Arc::new(FixedClock::default_start()))
            .await
            .unwrap()
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let a = json!({"b": 1, "a": {"z": true, "y": [1, 2]}});
        let b = json!({"a": {"y": [1, 2], "z": true}, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[tokio::test]
    async fn test_chain_links_and_sequences() {
        let audit = setup().await;

        let first = audit.log_action("speak", "agent", json!({"n": 1})).await.unwrap();
        let second = audit.log_action("defer", "agent", json!({"n": 2})).await.unwrap();
        let third = audit.log_action("speak", "agent", json!({"n": 3})).await.unwrap();

        assert_eq!(first.sequence_number, 1);
        assert_eq!(first.previous_hash, GENESIS_HASH);
        assert_eq!(second.sequence_number, 2);
        assert_eq!(second.previous_hash, first.entry_hash);
        assert_eq!(third.previous_hash, second.entry_hash);
    }

    #[tokio::test]
    async fn test_verify_complete_chain_passes() {
        let audit = setup().await;
        for i in 0..5 {
            audit.log_action("event", "agent", json!({"i": i})).await.unwrap();
        }

        let report = audit.verify_complete_chain().await.unwrap();
        assert!(report.valid, "errors: {:?}", report.errors);
        assert_eq!(report.entries_verified, 5);
    }

    #[tokio::test]
    async fn test_verify_range_mid_chain() {
        let audit = setup().await;
        for i in 0..6 {
            audit.log_action("event", "agent", json!({"i": i})).await.unwrap();
        }

        let report = audit.verify_range(3, 5).await.unwrap();
        assert!(report.valid, "errors: {:?}", report.errors);
        assert_eq!(report.entries_verified, 3);
    }

    #[tokio::test]
    async fn test_tampered_payload_detected() {
        let audit = setup().await;
        audit.log_action("event", "agent", json!({"amount": 10})).await.unwrap();
        audit.log_action("event", "agent", json!({"amount": 20})).await.unwrap();

        sqlx::query("UPDATE audit_log SET payload = ? WHERE sequence_number = 1")
            .bind(json!({"amount": 9999}).to_string())
            .execute(audit.db.pool())
            .await
            .unwrap();

        let report = audit.verify_complete_chain().await.unwrap();
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("hash mismatch")));
    }

    #[tokio::test]
    async fn test_revoked_key_invalidates_entries() {
        let audit = setup().await;
        audit.log_action("event", "agent", json!({})).await.unwrap();

        // Revocation timestamp equals the signing clock, so the entry is
        // treated as signed under a revoked key.
        audit.revoke_key(audit.signing_key_id()).await.unwrap();

        let report = audit.verify_complete_chain().await.unwrap();
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("signature")));
    }

    #[tokio::test]
    async fn test_empty_chain_report() {
        let audit = setup().await;
        let report = audit.verify_complete_chain().await.unwrap();
        assert!(report.valid);
        assert_eq!(report.entries_verified, 0);
        assert!(!report.warnings.is_empty());
    }
}
