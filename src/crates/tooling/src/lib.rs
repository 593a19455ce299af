//! Shared utilities for the aegis workspace
//!
//! This crate provides the ambient plumbing the runtime crates lean on:
//!
//! - `async_utils` - Retry policies with exponential backoff and timeout wrappers
//! - `config` - Environment variable access with `.env` layering
//! - `logging` - tracing subscriber initialization and formatting helpers
//! - `validation` - Small validation helpers used by configuration loading

pub mod async_utils;
pub mod config;
pub mod logging;
pub mod validation;

use thiserror::Error;

/// Errors that can occur in the tooling crate
#[derive(Debug, Error)]
pub enum ToolingError {
    /// General error with message
    #[error("Tooling error: {0}")]
    General(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for tooling operations
pub type Result<T> = std::result::Result<T, ToolingError>;
