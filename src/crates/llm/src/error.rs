//! Error types for LLM providers.

use thiserror::Error;

/// Result type for LLM operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors that can occur when calling a language model.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Transport-level failure (connection refused, DNS, TLS, timeout).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The provider rejected the request for rate limiting.
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// The provider returned a non-success HTTP status.
    #[error("Provider returned status {code}: {message}")]
    Status { code: u16, message: String },

    /// Transport succeeded but the response did not contain valid
    /// structured output.
    #[error("Structured output error: {0}")]
    Structured(String),

    /// Provider configuration error (missing endpoint, key, model).
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LlmError {
    /// Whether retrying the same call may succeed.
    ///
    /// Structured failures are not retryable at this layer; the evaluator
    /// decides whether to re-prompt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Transport(_)
                | LlmError::RateLimit(_)
                | LlmError::Status { code: 500..=599, .. }
        )
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            LlmError::Transport(err.to_string())
        } else if let Some(status) = err.status() {
            LlmError::Status {
                code: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            LlmError::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LlmError::Transport("refused".into()).is_retryable());
        assert!(LlmError::RateLimit("slow down".into()).is_retryable());
        assert!(LlmError::Status {
            code: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(!LlmError::Status {
            code: 401,
            message: "unauthorized".into()
        }
        .is_retryable());
        assert!(!LlmError::Structured("bad json".into()).is_retryable());
        assert!(!LlmError::Config("no model".into()).is_retryable());
    }
}
