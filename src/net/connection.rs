//! Connection ids and active-session tracking.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next id.
    pub fn new() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    active: AtomicU64,
    idle: Notify,
}

/// Counts live sessions so shutdown can wait for them.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    state: Arc<TrackerState>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session; it is released when the guard drops.
    pub fn track(&self) -> ConnectionGuard {
        self.state.active.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            state: Arc::clone(&self.state),
        }
    }

    /// Number of live sessions.
    pub fn active_count(&self) -> u64 {
        self.state.active.load(Ordering::SeqCst)
    }

    /// Resolves once no sessions are active.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.state.idle.notified();
            if self.active_count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Held by a session task for its whole lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    state: Arc<TrackerState>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.state.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.state.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_connection_ids_are_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
        assert!(b > a);
        assert!(a.to_string().starts_with("conn-"));
    }

    #[test]
    fn test_tracker_counts() {
        let tracker = ConnectionTracker::new();
        let g1 = tracker.track();
        let g2 = tracker.track();
        assert_eq!(tracker.active_count(), 2);
        drop(g1);
        assert_eq!(tracker.active_count(), 1);
        drop(g2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_wakes_on_last_guard() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.track();

        let waiter = tokio::spawn({
            let tracker = tracker.clone();
            async move { tracker.wait_idle().await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_idle did not return")
            .unwrap();
    }
}
