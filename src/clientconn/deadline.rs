//! Read deadline and the cancellation watcher.
//!
//! The session's read of the next frame races against a [`ReadDeadline`].
//! The watcher task imposes an already-expired deadline when the session
//! context is cancelled, so a read blocked on an idle client returns promptly.
//! Handler calls are never interrupted.

use std::sync::Arc;

use tokio::sync::{oneshot, watch};
use tokio::time::Instant;

use crate::context::Context;

/// A settable deadline for the read side of a connection.
#[derive(Debug, Clone)]
pub struct ReadDeadline {
    tx: Arc<watch::Sender<Option<Instant>>>,
}

impl ReadDeadline {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Sets the deadline; an instant in the past fails pending and future reads.
    pub fn set(&self, at: Instant) {
        self.tx.send_replace(Some(at));
    }

    pub fn clear(&self) {
        self.tx.send_replace(None);
    }

    /// Resolves once the current deadline has passed.
    pub async fn expired(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            let current = *rx.borrow_and_update();
            match current {
                Some(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => return,
                        _ = rx.changed() => {}
                    }
                }
                None => {
                    // The sender lives in `self`, so this only errors if the
                    // deadline is dropped while awaited, which it cannot be.
                    let _ = rx.changed().await;
                }
            }
        }
    }
}

impl Default for ReadDeadline {
    fn default() -> Self {
        Self::new()
    }
}

/// Expires `deadline` when `ctx` is cancelled; exits as soon as `done` fires.
pub(crate) async fn watch_cancellation(ctx: Context, done: oneshot::Receiver<()>, deadline: ReadDeadline) {
    tokio::select! {
        biased;
        _ = done => {}
        _ = ctx.cancelled() => {
            // Any past instant will do.
            deadline.set(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_unset_deadline_never_fires() {
        let d = ReadDeadline::new();
        let res = tokio::time::timeout(Duration::from_millis(30), d.expired()).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn test_past_deadline_fires_immediately() {
        let d = ReadDeadline::new();
        d.set(Instant::now());
        tokio::time::timeout(Duration::from_millis(100), d.expired())
            .await
            .expect("deadline did not fire");
    }

    #[tokio::test]
    async fn test_watcher_expires_on_cancel() {
        let ctx = Context::background();
        let d = ReadDeadline::new();
        let (_done_tx, done_rx) = oneshot::channel();

        let watcher = tokio::spawn(watch_cancellation(ctx.clone(), done_rx, d.clone()));
        let waiter = tokio::spawn({
            let d = d.clone();
            async move { d.expired().await }
        });

        ctx.cancel("shutdown");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("read not unblocked")
            .unwrap();
        watcher.await.unwrap();
    }

    #[tokio::test]
    async fn test_watcher_exits_on_done_without_touching_deadline() {
        let ctx = Context::background();
        let d = ReadDeadline::new();
        let (done_tx, done_rx) = oneshot::channel();

        let watcher = tokio::spawn(watch_cancellation(ctx.clone(), done_rx, d.clone()));
        done_tx.send(()).unwrap();
        watcher.await.unwrap();

        ctx.cancel("later");
        assert!(tokio::time::timeout(Duration::from_millis(30), d.expired()).await.is_err());
    }
}
