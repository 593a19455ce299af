//! Error taxonomy for the cognitive core.
//!
//! Recoverable per-thought failures (validation, structured-output) never
//! bring down a round: the pipeline converts them to PONDER results.
//! Integrity failures abort startup or trigger shutdown.

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error kinds for engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Schema or parameter mismatch
    #[error("Validation failed: {0}")]
    Validation(String),

    /// LLM connection, rate-limit, or status failure
    #[error("LLM transport failure: {0}")]
    LlmTransport(String),

    /// Valid transport, invalid structure after retries
    #[error("LLM structured output failure: {0}")]
    LlmStructured(String),

    /// Critical, non-overridable conscience rejection
    #[error("Conscience veto: {0}")]
    ConscienceVeto(String),

    /// Resource budget exhausted
    #[error("Resource budget breached: {0}")]
    ResourceBreach(String),

    /// No capable service, or action execution failed
    #[error("Dispatch failed: {0}")]
    Dispatch(String),

    /// Database read/write failure
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Database or audit-chain integrity violation
    #[error("Integrity failure: {0}")]
    Integrity(String),

    /// Identity could not be established or verified
    #[error("Identity failure: {0}")]
    Identity(String),

    /// Operation refused because shutdown is in progress
    #[error("Shutdown requested: {0}")]
    ShutdownRequested(String),

    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("serialization: {}", err))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(format!("io: {}", err))
    }
}

impl From<llm::LlmError> for EngineError {
    fn from(err: llm::LlmError) -> Self {
        match err {
            llm::LlmError::Structured(msg) => Self::LlmStructured(msg),
            other => Self::LlmTransport(other.to_string()),
        }
    }
}
