//! Cancellable request context.
//!
//! # Responsibilities
//! - Carry cancellation (with a cause) from the server down to every session
//! - Carry request-scoped values (connection info) to handlers
//!
//! # Design Decisions
//! - Contexts form a tree; cancelling a node cancels its whole subtree
//! - The first cause recorded wins, later cancels are no-ops
//! - Backed by `tokio::sync::watch` so waiting is cheap and never misses a cancel

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::watch;

use crate::clientconn::ConnInfo;

/// A node in the cancellation tree.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    parent: Option<Context>,
    cause: watch::Sender<Option<Arc<str>>>,
    conn_info: Option<Arc<ConnInfo>>,
}

impl Context {
    /// Root context; never cancelled unless [`Context::cancel`] is called on it.
    pub fn background() -> Self {
        Self::build(None, None)
    }

    fn build(parent: Option<Context>, conn_info: Option<Arc<ConnInfo>>) -> Self {
        let (cause, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                parent,
                cause,
                conn_info,
            }),
        }
    }

    /// Derives a context that is cancelled with this one, or on its own.
    pub fn child(&self) -> Self {
        Self::build(Some(self.clone()), self.inner.conn_info.clone())
    }

    /// Derives a child carrying connection info.
    pub fn with_conn_info(&self, info: Arc<ConnInfo>) -> Self {
        Self::build(Some(self.clone()), Some(info))
    }

    pub fn conn_info(&self) -> Option<Arc<ConnInfo>> {
        self.inner.conn_info.clone()
    }

    /// Cancels this context and its descendants. Only the first cause is kept.
    pub fn cancel(&self, cause: impl Into<String>) {
        let cause: Arc<str> = Arc::from(cause.into());
        self.inner.cause.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(cause);
            true
        });
    }

    /// Cancellation cause of this context or the nearest cancelled ancestor.
    pub fn cause(&self) -> Option<Arc<str>> {
        if let Some(cause) = self.inner.cause.borrow().clone() {
            return Some(cause);
        }
        self.inner.parent.as_ref().and_then(Context::cause)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cause().is_some()
    }

    /// Resolves once this context (or an ancestor) is cancelled.
    pub fn cancelled(&self) -> BoxFuture<'static, ()> {
        let this = self.clone();
        Box::pin(async move {
            let mut rx = this.inner.cause.subscribe();
            let own = async move {
                // The sender lives in `this`, which outlives the wait.
                let _ = rx.wait_for(Option::is_some).await;
            };

            match this.inner.parent.clone() {
                Some(parent) => {
                    tokio::select! {
                        _ = own => {}
                        _ = parent.cancelled() => {}
                    }
                }
                None => own.await,
            }
        })
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("cause", &self.cause())
            .field("conn_info", &self.inner.conn_info)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_cause_wins() {
        let ctx = Context::background();
        assert!(!ctx.is_cancelled());

        ctx.cancel("first");
        ctx.cancel("second");
        assert_eq!(ctx.cause().as_deref(), Some("first"));
    }

    #[test]
    fn test_child_sees_parent_cancel_but_not_reverse() {
        let parent = Context::background();
        let child = parent.child();

        child.cancel("child done");
        assert!(!parent.is_cancelled());

        let other = parent.child();
        parent.cancel("shutdown");
        assert_eq!(other.cause().as_deref(), Some("shutdown"));
        // Own cause takes precedence.
        assert_eq!(child.cause().as_deref(), Some("child done"));
    }

    #[tokio::test]
    async fn test_cancelled_wakes_on_ancestor() {
        let root = Context::background();
        let grandchild = root.child().child();

        let waiter = tokio::spawn(grandchild.cancelled());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        root.cancel("stop");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancellation not observed")
            .unwrap();
    }
}
