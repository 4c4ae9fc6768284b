//! Accept loop: one session task per client.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use super::connection::ConnectionTracker;
use super::listener::{ConnectionPermit, Listener, ListenerError};
use crate::clientconn::{Conn, ConnOpts, Mode};
use crate::context::Context;
use crate::handler::{Handler, ProxyHandler};
use crate::observability::metrics::ConnMetrics;

/// Builds a fresh proxy handler for each session.
pub type ProxyFactory = Arc<dyn Fn() -> Arc<dyn ProxyHandler> + Send + Sync>;

/// Serves every accepted client with the same mode and handlers.
#[derive(Clone)]
pub struct WireServer {
    mode: Mode,
    handler: Arc<dyn Handler>,
    proxy: Option<ProxyFactory>,
    metrics: Arc<ConnMetrics>,
    capture_dir: Option<PathBuf>,
    tracker: ConnectionTracker,
}

impl WireServer {
    pub fn new(mode: Mode, handler: Arc<dyn Handler>, metrics: Arc<ConnMetrics>) -> Self {
        Self {
            mode,
            handler,
            proxy: None,
            metrics,
            capture_dir: None,
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn with_proxy(mut self, factory: ProxyFactory) -> Self {
        self.proxy = Some(factory);
        self
    }

    pub fn with_capture_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.capture_dir = dir;
        self
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Accepts clients until `ctx` is cancelled.
    ///
    /// Returns once accepting stops; sessions still running see the same
    /// cancellation and can be awaited with [`ConnectionTracker::wait_idle`].
    pub async fn run(&self, listener: Listener, ctx: Context) -> Result<(), ListenerError> {
        loop {
            let accepted = tokio::select! {
                _ = ctx.cancelled() => {
                    tracing::info!(cause = ?ctx.cause(), "Stopped accepting clients");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer, permit)) => {
                    self.spawn_session(stream, peer, permit, ctx.child());
                }
                Err(ListenerError::Accept(e)) => {
                    tracing::warn!(error = %e, "Failed to accept client");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn spawn_session(&self, stream: TcpStream, peer: std::net::SocketAddr, permit: ConnectionPermit, ctx: Context) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let opts = ConnOpts {
            stream,
            peer: Some(peer),
            mode: self.mode,
            handler: Arc::clone(&self.handler),
            proxy: self.proxy.as_ref().map(|factory| factory()),
            metrics: Arc::clone(&self.metrics),
            capture_dir: self.capture_dir.clone(),
        };

        let mut conn = match Conn::new(opts) {
            Ok(conn) => conn,
            Err(e) => {
                tracing::error!(peer = %peer, error = %e, "Failed to start session");
                return;
            }
        };

        let guard = self.tracker.track();
        tokio::spawn(async move {
            let _permit = permit;
            let _guard = guard;

            let err = conn.run(&ctx).await;
            tracing::debug!(id = %conn.id(), reason = %err, "Session finished");

            let mut stream = conn.into_stream();
            if let Err(e) = stream.shutdown().await {
                tracing::trace!(peer = %peer, error = %e, "Failed to shut down client stream");
            }
        });
    }
}
