//! Shared daemon state.
//!
//! Provides the thread-safe handle the protocol server, the sweeper, and
//! the signal handler all share.

use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::coordinator::Coordinator;

/// Shared handle to the running coordinator.
pub type SharedHandle = Arc<CoordinatorHandle>;

/// Handle bundling the coordinator with daemon lifecycle state.
pub struct CoordinatorHandle {
    coordinator: Coordinator,
    /// Shutdown flag (atomic for lock-free checking).
    shutdown: AtomicBool,
    shutdown_notify: Notify,
    /// Time when the daemon started.
    started_at: DateTime<Utc>,
}

impl CoordinatorHandle {
    /// Creates a handle around a wired coordinator.
    #[must_use]
    pub fn new(coordinator: Coordinator) -> Self {
        Self {
            coordinator,
            shutdown: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
            started_at: Utc::now(),
        }
    }

    /// The coordinator itself.
    #[must_use]
    pub const fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Check if shutdown has been requested.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Request shutdown and wake everything waiting on it.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.shutdown_notify.notify_waiters();
    }

    /// Resolves once shutdown has been requested. The waiter is registered
    /// before the flag is re-checked, so a request landing between the two
    /// cannot be missed.
    pub async fn shutdown_notified(&self) {
        loop {
            let mut notified = pin!(self.shutdown_notify.notified());
            notified.as_mut().enable();
            if self.is_shutdown_requested() {
                return;
            }
            notified.await;
        }
    }

    /// Get the daemon start time.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Get daemon uptime in seconds.
    #[must_use]
    #[allow(clippy::cast_sign_loss)] // max(0) ensures non-negative
    pub fn uptime_secs(&self) -> u64 {
        let now = Utc::now();
        (now - self.started_at).num_seconds().max(0) as u64
    }
}
