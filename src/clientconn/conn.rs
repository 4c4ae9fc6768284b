//! Client session.

use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::oneshot;
use tracing::Instrument;

use super::capture::{Capture, CaptureReader};
use super::deadline::{watch_cancellation, ReadDeadline};
use super::router::Router;
use super::{ConnInfo, Mode, SessionError};
use crate::context::Context;
use crate::handler::{Handler, ProxyHandler};
use crate::net::connection::ConnectionId;
use crate::observability::metrics::ConnMetrics;

/// Everything needed to build a [`Conn`].
pub struct ConnOpts<S> {
    pub stream: S,
    /// Peer address; `None` for non-TCP transports.
    pub peer: Option<SocketAddr>,
    pub mode: Mode,
    pub handler: Arc<dyn Handler>,
    /// Required by every mode except [`Mode::Direct`].
    pub proxy: Option<Arc<dyn ProxyHandler>>,
    pub metrics: Arc<ConnMetrics>,
    /// When set, inbound traffic is captured into this directory.
    pub capture_dir: Option<PathBuf>,
}

/// One client session over a bidirectional byte stream.
pub struct Conn<S> {
    id: ConnectionId,
    stream: S,
    peer: Option<SocketAddr>,
    router: Router,
    capture_dir: Option<PathBuf>,
}

impl<S> Conn<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Fails if the mode needs a proxy handler and none was given.
    pub fn new(opts: ConnOpts<S>) -> Result<Self, SessionError> {
        let router = Router::new(opts.mode, opts.handler, opts.proxy, opts.metrics)?;

        Ok(Self {
            id: ConnectionId::new(),
            stream: opts.stream,
            peer: opts.peer,
            router,
            capture_dir: opts.capture_dir,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn mode(&self) -> Mode {
        self.router.mode()
    }

    /// Gives the stream back; closing it is the caller's job.
    pub fn into_stream(self) -> S {
        self.stream
    }

    /// Serves requests until the session ends, and returns why it ended.
    ///
    /// A clean client disconnect is [`SessionError::EndOfStream`].
    pub async fn run(&mut self, ctx: &Context) -> SessionError {
        let ctx = ctx.with_conn_info(Arc::new(ConnInfo::new(self.id, self.peer)));
        let span = tracing::info_span!("conn", id = %self.id, peer = ?self.peer, mode = %self.router.mode());

        let metrics = Arc::clone(self.router.metrics());
        metrics.connection_opened();

        let err = self.serve(&ctx).instrument(span).await;

        metrics.connection_closed();
        ctx.cancel(format!("session ended: {}", err));
        err
    }

    async fn serve(&mut self, ctx: &Context) -> SessionError {
        let mut capture = match &self.capture_dir {
            Some(dir) => match Capture::create(dir) {
                Ok(capture) => Some(capture),
                Err(e) => return SessionError::Capture(e),
            },
            None => None,
        };

        if let Some(proxy) = self.router.proxy() {
            tokio::spawn(Arc::clone(proxy).run(ctx.clone()));
        }

        let deadline = ReadDeadline::new();
        let (done_tx, done_rx) = oneshot::channel();
        let watcher = tokio::spawn(watch_cancellation(ctx.clone(), done_rx, deadline.clone()));

        let Self { stream, router, .. } = self;
        let (read_half, write_half) = tokio::io::split(stream);
        let mut bufr = BufReader::new(CaptureReader::new(read_half, capture.as_mut()));
        let mut bufw = BufWriter::new(write_half);

        let outcome = AssertUnwindSafe(async {
            loop {
                if let Err(e) = router.process_message(ctx, &mut bufr, &mut bufw, &deadline).await {
                    return e;
                }
            }
        })
        .catch_unwind()
        .await;

        let err = match outcome {
            Ok(err) => err,
            Err(payload) => {
                tracing::error!(panic = %panic_message(&*payload), "Panic while handling request");
                SessionError::Panic
            }
        };

        let _ = done_tx.send(());
        if let Err(e) = watcher.await {
            tracing::warn!(error = %e, "Cancellation watcher failed");
        }

        if let Err(e) = bufw.flush().await {
            tracing::debug!(error = %e, "Failed to flush buffered response");
        }
        drop(bufr);

        if let Some(capture) = capture {
            capture.finish(&err);
        }

        match &err {
            SessionError::EndOfStream => tracing::debug!("Client disconnected"),
            SessionError::Closed | SessionError::Canceled(_) => tracing::info!(reason = %err, "Session ended"),
            _ => tracing::warn!(error = %err, "Session ended with error"),
        }

        err
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
