//! Service correlations: the append-only trace of external interactions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a correlation records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationType {
    Request,
    Response,
    TraceSpan,
}

impl CorrelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::TraceSpan => "trace_span",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "request" => Some(Self::Request),
            "response" => Some(Self::Response),
            "trace_span" => Some(Self::TraceSpan),
            _ => None,
        }
    }
}

/// Completion state of a correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationStatus {
    Pending,
    Completed,
    Failed,
}

impl CorrelationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One recorded service interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCorrelation {
    pub correlation_id: String,
    pub correlation_type: CorrelationType,
    pub service_type: String,
    pub handler_name: String,
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_context: Option<serde_json::Value>,
    pub status: CorrelationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceCorrelation {
    /// New PENDING request correlation with a generated id
    pub fn request(
        service_type: impl Into<String>,
        handler_name: impl Into<String>,
        action_type: impl Into<String>,
        request_data: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            correlation_type: CorrelationType::Request,
            service_type: service_type.into(),
            handler_name: handler_name.into(),
            action_type: action_type.into(),
            request_data,
            response_data: None,
            trace_context: None,
            status: CorrelationStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_constructor_defaults() {
        let c = ServiceCorrelation::request("communication", "speak_handler", "speak", None, Utc::now());
        assert_eq!(c.correlation_type, CorrelationType::Request);
        assert_eq!(c.status, CorrelationStatus::Pending);
        assert!(c.response_data.is_none());
    }

    #[test]
    fn test_status_parse_round_trip() {
        for status in [
            CorrelationStatus::Pending,
            CorrelationStatus::Completed,
            CorrelationStatus::Failed,
        ] {
            assert_eq!(CorrelationStatus::parse(status.as_str()), Some(status));
        }
    }
}
