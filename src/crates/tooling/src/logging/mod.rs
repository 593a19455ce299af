//! Logging utilities
//!
//! Subscriber initialization and small formatting helpers for structured
//! logging with tracing.

use std::time::Instant;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber
///
/// `default_directive` is used when `RUST_LOG` is unset (e.g. "info" or
/// "aegis=debug,engine=debug"). Safe to call more than once; subsequent
/// calls are no-ops.
pub fn init_logging(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive.to_string()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Log execution time of a future at debug level
pub async fn timed<F, T>(name: &str, future: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = Instant::now();
    let result = future.await;
    debug!(operation = %name, elapsed = ?start.elapsed(), "Operation completed");
    result
}

/// Format a duration in human-readable form
pub fn format_duration(duration: std::time::Duration) -> String {
    let micros = duration.as_micros();

    if micros < 1000 {
        format!("{}μs", micros)
    } else if micros < 1_000_000 {
        format!("{}ms", micros / 1000)
    } else if micros < 60_000_000 {
        format!("{:.2}s", micros as f64 / 1_000_000.0)
    } else {
        let seconds = micros / 1_000_000;
        format!("{}m{}s", seconds / 60, seconds % 60)
    }
}
