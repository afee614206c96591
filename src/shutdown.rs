//! Graceful shutdown coordination utilities.
//!
//! A [`ShutdownCoordinator`] is created once in `main`, handed to every
//! component that spawns or waits on work, and flipped by the Ctrl+C handler.
//! Components stop picking up new documents and downloads once it is set;
//! work already in flight finishes and lands through atomic renames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

/// Coordinates graceful shutdown across async tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    is_shutdown: AtomicBool,
    notify: Notify,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self {
            is_shutdown: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Create a new shared coordinator wrapped in [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Request shutdown. Notifies all registered waiters exactly once.
    pub fn request_shutdown(&self) {
        if !self.is_shutdown.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is requested. Returns immediately if already set.
    pub async fn wait_for_shutdown(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register interest before checking the flag so a concurrent request is not missed
        notified.as_mut().enable();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }

    /// Sleep for `delay` unless shutdown is requested first.
    ///
    /// Returns `true` when the full delay elapsed and `false` when the sleep
    /// was cut short by a shutdown request.
    pub async fn sleep_or_shutdown(&self, delay: Duration) -> bool {
        if self.is_shutdown_requested() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.wait_for_shutdown() => false,
        }
    }
}

/// Sleep helper for components whose shutdown handle is optional.
pub async fn sleep_unless_shutdown(shutdown: Option<&SharedShutdown>, delay: Duration) -> bool {
    match shutdown {
        Some(shutdown) => shutdown.sleep_or_shutdown(delay).await,
        None => {
            tokio::time::sleep(delay).await;
            true
        }
    }
}

/// Whether an optional shutdown handle has been triggered.
pub fn is_requested(shutdown: Option<&SharedShutdown>) -> bool {
    shutdown.is_some_and(|s| s.is_shutdown_requested())
}
