//! Telemetry service: service correlations and summary aggregates.
//!
//! Every external interaction flows through [`TelemetryService::instrument`],
//! the explicit middleware that records a request correlation, times the
//! call, and closes the correlation with the outcome and latency.

use crate::clock::Clock;
use crate::db::Database;
use crate::error::{EngineError, Result};
use crate::schemas::{
    CorrelationStatus, CorrelationType, ServiceCorrelation, TelemetrySummary,
};
use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Telemetry and correlation service
#[derive(Clone)]
pub struct TelemetryService {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl TelemetryService {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Append a correlation
    pub async fn record(&self, correlation: &ServiceCorrelation) -> Result<()> {
        sqlx::query(
            "INSERT INTO service_correlations (correlation_id, correlation_type, service_type, \
                 handler_name, action_type, request_data, response_data, trace_context, status, \
                 created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&correlation.correlation_id)
        .bind(correlation.correlation_type.as_str())
        .bind(&correlation.service_type)
        .bind(&correlation.handler_name)
        .bind(&correlation.action_type)
        .bind(correlation.request_data.as_ref().map(|v| v.to_string()))
        .bind(correlation.response_data.as_ref().map(|v| v.to_string()))
        .bind(correlation.trace_context.as_ref().map(|v| v.to_string()))
        .bind(correlation.status.as_str())
        .bind(correlation.created_at.to_rfc3339())
        .bind(correlation.updated_at.to_rfc3339())
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Close a correlation with its outcome
    pub async fn complete(
        &self,
        correlation_id: &str,
        status: CorrelationStatus,
        response_data: Option<serde_json::Value>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE service_correlations SET status = ?, response_data = ?, updated_at = ? \
             WHERE correlation_id = ?",
        )
        .bind(status.as_str())
        .bind(response_data.map(|v| v.to_string()))
        .bind(self.clock.now_iso())
        .bind(correlation_id)
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    /// Most recent correlations, newest first
    pub async fn recent(&self, limit: i64) -> Result<Vec<ServiceCorrelation>> {
        let rows = sqlx::query(
            "SELECT correlation_id, correlation_type, service_type, handler_name, action_type, \
                    request_data, response_data, trace_context, status, created_at, updated_at \
             FROM service_correlations ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(correlation_from_row).collect()
    }

    /// Correlations with a given action type, newest first
    pub async fn recent_for_action(
        &self,
        action_type: &str,
        limit: i64,
    ) -> Result<Vec<ServiceCorrelation>> {
        let rows = sqlx::query(
            "SELECT correlation_id, correlation_type, service_type, handler_name, action_type, \
                    request_data, response_data, trace_context, status, created_at, updated_at \
             FROM service_correlations WHERE action_type = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(action_type)
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(correlation_from_row).collect()
    }

    /// Aggregates for the snapshot
    pub async fn summary(&self) -> Result<TelemetrySummary> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM service_correlations")
            .fetch_one(self.db.pool())
            .await?;

        let hour_ago = (self.clock.now() - Duration::hours(1)).to_rfc3339();

        let requests_last_hour: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM service_correlations WHERE created_at >= ?",
        )
        .bind(&hour_ago)
        .fetch_one(self.db.pool())
        .await?;

        let failures_last_hour: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM service_correlations \
             WHERE created_at >= ? AND status = 'failed'",
        )
        .bind(&hour_ago)
        .fetch_one(self.db.pool())
        .await?;

        // Latency comes from the middleware's recorded latency_ms field
        let recent = self.recent(100).await?;
        let latencies: Vec<f64> = recent
            .iter()
            .filter_map(|c| c.response_data.as_ref())
            .filter_map(|v| v.get("latency_ms"))
            .filter_map(|v| v.as_f64())
            .collect();
        let average_latency_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };

        Ok(TelemetrySummary {
            total_correlations: total as u64,
            requests_last_hour: requests_last_hour as u64,
            failures_last_hour: failures_last_hour as u64,
            average_latency_ms,
        })
    }

    /// Report final aggregates at shutdown
    pub async fn stop(&self) {
        match self.summary().await {
            Ok(summary) => tracing::info!(
                total = summary.total_correlations,
                failures_last_hour = summary.failures_last_hour,
                "Telemetry service stopped"
            ),
            Err(e) => tracing::warn!(error = %e, "Telemetry service stopped without a final summary"),
        }
    }

    /// Correlation-emitting middleware around an external call
    ///
    /// Records a PENDING request correlation, runs the operation, then
    /// closes the correlation as COMPLETED or FAILED with the measured
    /// latency and error kind.
    pub async fn instrument<F, T, E>(
        &self,
        service_type: &str,
        handler_name: &str,
        action_type: &str,
        request_data: serde_json::Value,
        operation: F,
    ) -> std::result::Result<T, E>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        let correlation = ServiceCorrelation::request(
            service_type,
            handler_name,
            action_type,
            Some(request_data),
            self.clock.now(),
        );
        let correlation_id = correlation.correlation_id.clone();

        // A correlation that cannot be recorded must not fail the call
        if let Err(e) = self.record(&correlation).await {
            tracing::warn!(error = %e, "Failed to record request correlation");
        }

        let started = Instant::now();
        let result = operation.await;
        let latency_ms = started.elapsed().as_millis() as f64;

        let (status, response) = match &result {
            Ok(_) => (
                CorrelationStatus::Completed,
                serde_json::json!({ "latency_ms": latency_ms }),
            ),
            Err(e) => (
                CorrelationStatus::Failed,
                serde_json::json!({ "latency_ms": latency_ms, "error": e.to_string() }),
            ),
        };

        if let Err(e) = self.complete(&correlation_id, status, Some(response)).await {
            tracing::warn!(error = %e, "Failed to complete correlation");
        }

        result
    }
}

fn correlation_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ServiceCorrelation> {
    let type_str: String = row.get("correlation_type");
    let correlation_type = CorrelationType::parse(&type_str).ok_or_else(|| {
        EngineError::Integrity(format!("unknown correlation type '{}'", type_str))
    })?;

    let status_str: String = row.get("status");
    let status = CorrelationStatus::parse(&status_str).ok_or_else(|| {
        EngineError::Integrity(format!("unknown correlation status '{}'", status_str))
    })?;

    fn parse_json(raw: Option<String>) -> Result<Option<serde_json::Value>> {
        raw.map(|s| serde_json::from_str(&s).map_err(Into::into))
            .transpose()
    }

    fn parse_time(raw: String, column: &str) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| EngineError::Integrity(format!("bad timestamp in {}: {}", column, e)))
    }

    Ok(ServiceCorrelation {
        correlation_id: row.get("correlation_id"),
        correlation_type,
        service_type: row.get("service_type"),
        handler_name: row.get("handler_name"),
        action_type: row.get("action_type"),
        request_data: parse_json(row.get("request_data"))?,
        response_data: parse_json(row.get("response_data"))?,
        trace_context: parse_json(row.get("trace_context"))?,
        status,
        created_at: parse_time(row.get("created_at"), "created_at")?,
        updated_at: parse_time(row.get("updated_at"), "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::MigrationSet;

    async fn setup() -> TelemetryService {
        let db = Database::test_in_memory(MigrationSet::Engine).await.unwrap();
        TelemetryService::new(db, Arc::new(FixedClock::default_start()))
    }

    #[tokio::test]
    async fn test_record_and_complete() {
        let telemetry = setup().await;
        let correlation = ServiceCorrelation::request(
            "communication",
            "speak_handler",
            "speak",
            None,
            telemetry.clock.now(),
        );

        telemetry.record(&correlation).await.unwrap();
        telemetry
            .complete(
                &correlation.correlation_id,
                CorrelationStatus::Completed,
                Some(serde_json::json!({"latency_ms": 12.0})),
            )
            .await
            .unwrap();

        let recent = telemetry.recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].status, CorrelationStatus::Completed);
        assert_eq!(recent[0].response_data.as_ref().unwrap()["latency_ms"], 12.0);
    }

    #[tokio::test]
    async fn test_instrument_records_success() {
        let telemetry = setup().await;

        let result: std::result::Result<i32, String> = telemetry
            .instrument("llm", "dma", "structured_call", serde_json::json!({}), async {
                Ok(42)
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        let recent = telemetry.recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].status, CorrelationStatus::Completed);
        assert_eq!(recent[0].action_type, "structured_call");
    }

    #[tokio::test]
    async fn test_instrument_records_failure_with_error() {
        let telemetry = setup().await;

        let result: std::result::Result<i32, String> = telemetry
            .instrument("llm", "dma", "structured_call", serde_json::json!({}), async {
                Err("boom".to_string())
            })
            .await;

        assert!(result.is_err());
        let recent = telemetry.recent(10).await.unwrap();
        assert_eq!(recent[0].status, CorrelationStatus::Failed);
        assert_eq!(recent[0].response_data.as_ref().unwrap()["error"], "boom");
    }

    #[tokio::test]
    async fn test_summary_counts_failures() {
        let telemetry = setup().await;

        let _: std::result::Result<(), String> = telemetry
            .instrument("tool", "h", "execute", serde_json::json!({}), async { Ok(()) })
            .await;
        let _: std::result::Result<(), String> = telemetry
            .instrument("tool", "h", "execute", serde_json::json!({}), async {
                Err("nope".into())
            })
            .await;

        let summary = telemetry.summary().await.unwrap();
        assert_eq!(summary.total_correlations, 2);
        assert_eq!(summary.failures_last_hour, 1);
    }

    #[tokio::test]
    async fn test_recent_for_action_filters() {
        let telemetry = setup().await;
        let now = telemetry.clock.now();

        telemetry
            .record(&ServiceCorrelation::request("c", "h", "speak", None, now))
            .await
            .unwrap();
        telemetry
            .record(&ServiceCorrelation::request("c", "h", "defer", None, now))
            .await
            .unwrap();

        let speaks = telemetry.recent_for_action("speak", 10).await.unwrap();
        assert_eq!(speaks.len(), 1);
        assert_eq!(speaks[0].action_type, "speak");
    }
}
