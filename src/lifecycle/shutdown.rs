//! Shutdown coordination.

use std::time::Duration;

use crate::context::Context;
use crate::net::ConnectionTracker;

/// Owns the root context every listener and session derives from.
#[derive(Debug, Clone)]
pub struct Shutdown {
    root: Context,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            root: Context::background(),
        }
    }

    /// The context to hand to the accept loop.
    pub fn context(&self) -> Context {
        self.root.clone()
    }

    /// Cancels everything derived from the root context.
    pub fn trigger(&self, cause: impl Into<String>) {
        let cause = cause.into();
        tracing::info!(cause = %cause, "Shutting down");
        self.root.cancel(cause);
    }

    pub fn is_triggered(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Waits for sessions to finish; returns false if `timeout` elapsed first.
    pub async fn drain(&self, tracker: &ConnectionTracker, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, tracker.wait_idle()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    remaining = tracker.active_count(),
                    timeout = ?timeout,
                    "Sessions still active after drain timeout"
                );
                false
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
