//! Upstream proxy handler.
//!
//! # Responsibilities
//! - Hold one upstream connection per client session
//! - Forward the original request frame and read back exactly one response
//! - Reconnect with backoff; tear the upstream down when the session ends

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::{ProxyError, ProxyHandler, Request, Response};
use crate::config::UpstreamConfig;
use crate::context::Context;
use crate::resilience::Backoff;
use crate::wire::{self, MsgHeader, MSG_HEADER_LEN};

struct Upstream {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

/// Forwards requests to an upstream server over plain TCP.
pub struct TcpProxy {
    config: UpstreamConfig,
    upstream: Mutex<Option<Upstream>>,
}

impl TcpProxy {
    pub fn new(config: UpstreamConfig) -> Self {
        Self {
            config,
            upstream: Mutex::new(None),
        }
    }

    async fn connect_once(&self) -> Result<Upstream, ProxyError> {
        let addr = self.config.address.clone();
        let timeout = Duration::from_secs(self.config.connect_timeout_secs);

        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ProxyError::Timeout(addr.clone(), timeout))?
            .map_err(|source| ProxyError::Connect {
                addr: addr.clone(),
                source,
            })?;

        // Frames are flushed explicitly.
        let _ = stream.set_nodelay(true);

        let (r, w) = stream.into_split();
        tracing::debug!(upstream = %addr, "Upstream connected");

        Ok(Upstream {
            reader: BufReader::new(r),
            writer: BufWriter::new(w),
        })
    }

    /// Connects, retrying with exponential backoff up to `max_attempts`.
    async fn connect(&self, ctx: &Context) -> Result<Upstream, ProxyError> {
        let backoff = Backoff::from_config(&self.config);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.connect_once().await {
                Ok(upstream) => return Ok(upstream),
                Err(e) if backoff.should_retry(attempt) && !ctx.is_cancelled() => {
                    let delay = backoff.delay(attempt);
                    tracing::warn!(attempt, delay = ?delay, error = %e, "Upstream connect failed, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = ctx.cancelled() => return Err(e),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn forward(upstream: &mut Upstream, req: &Request) -> Result<Response, ProxyError> {
        let body = req.body();
        let bytes_len = body.to_bytes()?.len();

        let mut header: MsgHeader = *req.header();
        header.message_length = (MSG_HEADER_LEN + bytes_len) as i32;

        wire::write_message(&mut upstream.writer, &header, body).await?;
        upstream
            .writer
            .flush()
            .await
            .map_err(wire::WireError::from)?;

        match wire::read_message(&mut upstream.reader).await {
            Ok((header, body)) => Ok(Response::new(header, body)),
            Err(wire::WireError::ZeroRead) => Err(ProxyError::Closed),
            Err(e) => Err(e.into()),
        }
    }
}

impl ProxyHandler for TcpProxy {
    fn handle<'a>(&'a self, ctx: &'a Context, req: &'a Request) -> BoxFuture<'a, Result<Response, ProxyError>> {
        Box::pin(async move {
            let mut guard = self.upstream.lock().await;

            if guard.is_none() {
                *guard = Some(self.connect(ctx).await?);
            }

            let Some(upstream) = guard.as_mut() else {
                return Err(ProxyError::Closed);
            };

            let res = Self::forward(upstream, req).await;
            if res.is_err() {
                // The stream may be mid-frame; never reuse it.
                *guard = None;
            }
            res
        })
    }

    fn run(self: Arc<Self>, ctx: Context) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            {
                let mut guard = self.upstream.lock().await;
                if guard.is_none() {
                    match self.connect(&ctx).await {
                        Ok(upstream) => *guard = Some(upstream),
                        Err(e) => tracing::warn!(error = %e, "Upstream not reachable, will retry on first request"),
                    }
                }
            }

            ctx.cancelled().await;

            if let Some(mut upstream) = self.upstream.lock().await.take() {
                let _ = upstream.writer.shutdown().await;
            }
            tracing::debug!(upstream = %self.config.address, "Upstream connection closed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use crate::wire::{MsgBody, OpCode, OpMsg};
    use tokio::net::TcpListener;

    fn config(address: String) -> UpstreamConfig {
        UpstreamConfig {
            address,
            connect_timeout_secs: 1,
            base_delay_ms: 10,
            max_delay_ms: 20,
            max_attempts: 2,
        }
    }

    #[tokio::test]
    async fn test_forwards_one_frame_each_way() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let (header, _) = wire::read_message(&mut socket).await.unwrap();

            let body = MsgBody::Msg(OpMsg::from_document(doc! { "ok": 1.0, "upstream": true }));
            let len = body.to_bytes().unwrap().len();
            let reply = MsgHeader {
                message_length: (MSG_HEADER_LEN + len) as i32,
                request_id: 1000,
                response_to: header.request_id,
                op_code: OpCode::Msg,
            };
            wire::write_message(&mut socket, &reply, &body).await.unwrap();
        });

        let proxy = TcpProxy::new(config(addr.to_string()));
        let ctx = Context::background();

        let mut header = MsgHeader::new(OpCode::Msg);
        header.request_id = 77;
        let req = Request::new(
            header,
            MsgBody::Msg(OpMsg::from_document(doc! { "ping": 1, "$db": "admin" })),
        );

        let resp = proxy.handle(&ctx, &req).await.unwrap();
        assert_eq!(resp.header().response_to, 77);
        assert_eq!(resp.header().request_id, 1000);
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        // Bind and drop to get a port nobody listens on.
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();

        let proxy = TcpProxy::new(config(addr.to_string()));
        let ctx = Context::background();
        let req = Request::new(
            MsgHeader::new(OpCode::Msg),
            MsgBody::Msg(OpMsg::from_document(doc! { "ping": 1 })),
        );

        assert!(proxy.handle(&ctx, &req).await.is_err());
    }
}
