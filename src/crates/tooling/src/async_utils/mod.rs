//! Async utilities
//!
//! Retry policies and timeout wrappers for async operations.

pub mod retry;
pub mod timeout;

pub use retry::{with_retry, RetryPolicy};
pub use timeout::{with_timeout, TimeoutError};
