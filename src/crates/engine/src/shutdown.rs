//! Graceful shutdown coordination
//!
//! A single coordinator is constructed by the runtime and shared by
//! reference: the main loop, adapters, and services all observe the same
//! event. Requests are idempotent and the first reason wins.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Shutdown coordinator for graceful termination
#[derive(Clone)]
pub struct ShutdownCoordinator {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
    reason: Arc<Mutex<Option<String>>>,
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("requested", &self.requested.load(Ordering::SeqCst))
            .field("reason", &*self.reason.lock())
            .finish()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
            reason: Arc::new(Mutex::new(None)),
        }
    }

    /// Request shutdown with a reason
    ///
    /// Duplicate requests are ignored; the first reason is kept and
    /// handlers are not re-triggered.
    pub fn request_shutdown(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if !self.requested.swap(true, Ordering::SeqCst) {
            info!(reason = %reason, "Shutdown requested");
            *self.reason.lock() = Some(reason);
            self.notify.notify_waiters();
        }
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// The reason given with the first shutdown request, if any
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// Wait until shutdown is requested
    ///
    /// Returns immediately when a request already happened.
    pub async fn wait_for_shutdown(&self) {
        if self.is_shutdown_requested() {
            return;
        }
        let notified = self.notify.notified();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }

    /// Install signal handlers for SIGINT and SIGTERM
    pub fn install_signal_handlers(&self) -> tokio::task::JoinHandle<()> {
        let coordinator = self.clone();

        tokio::spawn(async move {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};

                let mut sigint =
                    signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");
                let mut sigterm =
                    signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

                tokio::select! {
                    _ = sigint.recv() => {
                        warn!("Received SIGINT, initiating graceful shutdown...");
                        coordinator.request_shutdown("SIGINT");
                    }
                    _ = sigterm.recv() => {
                        warn!("Received SIGTERM, initiating graceful shutdown...");
                        coordinator.request_shutdown("SIGTERM");
                    }
                }
            }

            #[cfg(not(unix))]
            {
                use tokio::signal;

                signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
                warn!("Received Ctrl+C, initiating graceful shutdown...");
                coordinator.request_shutdown("Ctrl+C");
            }
        })
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_requested_initially() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_shutdown_requested());
        assert!(coordinator.reason().is_none());
    }

    #[test]
    fn test_first_reason_wins() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.request_shutdown("first");
        coordinator.request_shutdown("second");

        assert!(coordinator.is_shutdown_requested());
        assert_eq!(coordinator.reason().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_wakes_waiters() {
        let coordinator = ShutdownCoordinator::new();
        let waiter = coordinator.clone();

        let handle = tokio::spawn(async move {
            waiter.wait_for_shutdown().await;
            "released"
        });

        tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
        coordinator.request_shutdown("test");

        let result = tokio::time::timeout(tokio::time::Duration::from_millis(100), handle).await;
        assert_eq!(result.unwrap().unwrap(), "released");
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_after_request() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.request_shutdown("already done");
        coordinator.wait_for_shutdown().await;
    }

    #[test]
    fn test_clones_share_state() {
        let coordinator = ShutdownCoordinator::new();
        let clone = coordinator.clone();
        coordinator.request_shutdown("shared");
        assert!(clone.is_shutdown_requested());
    }
}
