//! Per-request routing between the local handler and the upstream proxy.
//!
//! # Data Flow
//! ```text
//! read frame (races the read deadline)
//!     → proxy stage   (proxy, diff-direct, diff-proxy)
//!     → local route   (direct, diff-direct, diff-proxy)
//!     → log both responses, diff them in diff modes
//!     → write the response the mode selects
//! ```
//!
//! The local stage takes a [`Proxied`] token that only the proxy stage can
//! produce, so the upstream always sees the request before the local handler
//! gets ownership of it.

use std::io;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use bson::Bson;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::field::{display, Empty};
use tracing::{Instrument, Level, Span};

use super::deadline::ReadDeadline;
use super::diff::ResponseDiff;
use super::mode::{Mode, Source};
use super::SessionError;
use crate::context::Context;
use crate::handler::protoerr::{is_one, ProtoError};
use crate::handler::{Handler, HandlerError, ProxyHandler, Request, Response};
use crate::observability::logging::{level_enabled, log_at, most_severe};
use crate::observability::metrics::ConnMetrics;
use crate::observability::tracing::span_context_from_comment;
use crate::wire::{self, command_name, MsgBody, MsgHeader, OpCode, MSG_HEADER_LEN};

/// Result of the proxy stage.
#[derive(Debug)]
pub struct Proxied(Option<Response>);

impl Proxied {
    pub fn response(&self) -> Option<&Response> {
        self.0.as_ref()
    }

    fn into_response(self) -> Option<Response> {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn skipped() -> Self {
        Proxied(None)
    }
}

/// Outcome of the local route.
#[derive(Debug)]
pub struct Routed {
    pub header: MsgHeader,
    /// `None` only when the connection must close without a reply.
    pub body: Option<MsgBody>,
    pub close_conn: bool,
}

/// Routes requests of one session.
pub struct Router {
    mode: Mode,
    handler: Arc<dyn Handler>,
    proxy: Option<Arc<dyn ProxyHandler>>,
    metrics: Arc<ConnMetrics>,
    last_request_id: AtomicI32,
}

impl Router {
    /// Creates a router; proxy modes require a proxy handler.
    pub fn new(
        mode: Mode,
        handler: Arc<dyn Handler>,
        proxy: Option<Arc<dyn ProxyHandler>>,
        metrics: Arc<ConnMetrics>,
    ) -> Result<Self, SessionError> {
        if mode.uses_proxy() && proxy.is_none() {
            return Err(SessionError::MissingProxy(mode));
        }

        Ok(Self {
            mode,
            handler,
            proxy,
            metrics,
            last_request_id: AtomicI32::new(0),
        })
    }

    /// Mode this router serves.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Upstream handler, if configured.
    pub fn proxy(&self) -> Option<&Arc<dyn ProxyHandler>> {
        self.proxy.as_ref()
    }

    /// Shared connection metrics.
    pub fn metrics(&self) -> &Arc<ConnMetrics> {
        &self.metrics
    }

    fn next_request_id(&self) -> i32 {
        self.last_request_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Handles exactly one request/response exchange.
    ///
    /// `Ok(())` means the session may read the next frame.
    pub(crate) async fn process_message<R, W>(
        &self,
        ctx: &Context,
        bufr: &mut R,
        bufw: &mut W,
        deadline: &ReadDeadline,
    ) -> Result<(), SessionError>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let (req_header, req_body) = read_request(ctx, bufr, deadline).await?;

        if tracing::enabled!(Level::DEBUG) {
            tracing::debug!("Request header: {}", req_header);
            tracing::debug!("Request message:\n{}\n\n", req_body.string_indent());
        }

        let plan = self.mode.plan();
        let req = Request::new(req_header, req_body);

        let proxied = self.proxy_stage(ctx, &req).await?;

        let mut diff_level = Level::DEBUG;

        let local = if plan.local {
            let routed = self.route(ctx, &proxied, req).await;
            let level = log_response("Response", &routed.header, routed.body.as_ref(), routed.close_conn);
            diff_level = most_severe(diff_level, level);
            Some(routed)
        } else {
            None
        };

        if let Some(resp) = proxied.response() {
            let level = log_response("Proxy response", resp.header(), Some(resp.body()), false);
            diff_level = most_severe(diff_level, level);
        }

        if plan.diff && level_enabled(diff_level) {
            if let (Some(routed), Some(resp)) = (&local, proxied.response()) {
                let diff = ResponseDiff::compute(&routed.header, routed.body.as_ref(), resp.header(), Some(resp.body()));
                log_at(diff_level, &diff.to_string());
            }
        }

        let (header, body, close_conn) = match (plan.send, local, proxied.into_response()) {
            (Source::Local, Some(routed), _) => (routed.header, routed.body, routed.close_conn),
            (Source::Proxy, local, Some(resp)) => {
                let (header, body) = resp.into_parts();
                (header, Some(body), local.map_or(false, |r| r.close_conn))
            }
            _ => return Err(SessionError::NoResponse),
        };

        let Some(body) = body else {
            bufw.flush().await?;
            tracing::debug!("Connection closed without a response");
            return Err(SessionError::Closed);
        };

        wire::write_message(bufw, &header, &body)
            .await
            .map_err(SessionError::from_write)?;
        bufw.flush().await?;

        if close_conn {
            tracing::debug!("Connection closed unexpectedly");
            return Err(SessionError::Closed);
        }

        Ok(())
    }

    async fn proxy_stage(&self, ctx: &Context, req: &Request) -> Result<Proxied, SessionError> {
        if !self.mode.plan().proxy {
            return Ok(Proxied(None));
        }

        let proxy = self.proxy.as_ref().ok_or(SessionError::MissingProxy(self.mode))?;
        let resp = proxy.handle(ctx, req).await?;
        Ok(Proxied(Some(resp)))
    }

    /// Runs the local handler and shapes its outcome into a response frame.
    ///
    /// Never fails: handler errors become protocol error documents, and
    /// unsupported opcodes ask the session to close.
    pub(crate) async fn route(&self, ctx: &Context, _proxied: &Proxied, req: Request) -> Routed {
        let req_header = *req.header();

        let span = tracing::info_span!(
            "command",
            otel.name = Empty,
            db.opcode = Empty,
            db.request_id = i64::from(req_header.request_id),
            db.argument = Empty,
            otel.status_code = Empty,
            otel.status_message = Empty,
            trace.parent_trace_id = Empty,
            trace.parent_span_id = Empty,
        );

        let res_op = match req_header.op_code {
            OpCode::Msg => OpCode::Msg,
            OpCode::Query => OpCode::Reply,
            other => other,
        };

        let mut record = RouteRecord {
            metrics: &self.metrics,
            span: span.clone(),
            request_op: req_header.op_code,
            response_op: res_op,
            command: String::new(),
            argument: String::new(),
            result: String::new(),
        };

        let executed = matches!(req_header.op_code, OpCode::Msg | OpCode::Query);
        let outcome = match req_header.op_code {
            OpCode::Msg | OpCode::Query => self.execute(ctx, &span, &mut record, req).await,
            OpCode::Unknown(code) => Err(HandlerError::Internal(format!("unexpected OpCode {}", code))),
            other => Err(HandlerError::Internal(format!("unhandled OpCode {}", other))),
        };

        let mut res_header = MsgHeader::new(res_op);

        let body = match outcome {
            Ok(body) => body,
            // Only command responses carry error documents; every legacy
            // request closes, OP_REPLY included.
            Err(err) if executed && res_op.supports_protocol_error() => {
                let proto = ProtoError::from_handler_error(&err);
                record.result = proto.name.clone();
                record.argument = proto.argument.clone();
                if res_op == OpCode::Msg {
                    proto.msg_body()
                } else {
                    proto.reply_body()
                }
            }
            Err(err) => {
                record.result = match res_op {
                    OpCode::Unknown(_) => "unexpected",
                    _ => "unhandled",
                }
                .to_string();
                tracing::error!(parent: &span, error = %err, opcode = %res_op, "Unsupported request, closing connection");
                return Routed {
                    header: res_header,
                    body: None,
                    close_conn: true,
                };
            }
        };

        let bytes = match body.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                record.result.clear();
                // A body that cannot be encoded is a bug in the handler.
                panic!("failed to encode response body: {}", e);
            }
        };

        res_header.message_length = (MSG_HEADER_LEN + bytes.len()) as i32;
        res_header.request_id = self.next_request_id();
        res_header.response_to = req_header.request_id;

        if record.result.is_empty() {
            record.result = "ok".to_string();
        }

        Routed {
            header: res_header,
            body: Some(body),
            close_conn: false,
        }
    }

    async fn execute(
        &self,
        ctx: &Context,
        span: &Span,
        record: &mut RouteRecord<'_>,
        req: Request,
    ) -> Result<MsgBody, HandlerError> {
        let doc = req.document()?;
        record.command = command_name(doc).unwrap_or_default().to_string();

        if matches!(req.body(), MsgBody::Msg(_)) {
            if let Some(Bson::String(comment)) = doc.get("comment") {
                match span_context_from_comment(comment) {
                    Ok(remote) => {
                        span.record("trace.parent_trace_id", remote.trace_id_hex().as_str());
                        span.record("trace.parent_span_id", remote.span_id_hex().as_str());
                    }
                    Err(e) => tracing::debug!(error = %e, "Ignoring comment without trace context"),
                }
            }
        }

        let resp = self.handler.handle(ctx, req).instrument(span.clone()).await?;
        let (_, body) = resp.into_parts();
        Ok(body)
    }
}

/// Records metrics and span attributes for one routed request when dropped,
/// including when the handler panics.
struct RouteRecord<'a> {
    metrics: &'a ConnMetrics,
    span: Span,
    request_op: OpCode,
    response_op: OpCode,
    command: String,
    argument: String,
    result: String,
}

impl Drop for RouteRecord<'_> {
    fn drop(&mut self) {
        let command = non_empty(&self.command, "unknown");
        let argument = non_empty(&self.argument, "unknown");
        let result = non_empty(&self.result, "panic");

        self.metrics.record_request(self.request_op, command);
        self.metrics.record_response(self.response_op, command, argument, result);

        self.span.record("otel.name", command);
        self.span.record("db.opcode", display(self.response_op));
        self.span.record("db.argument", argument);
        if result != "ok" {
            self.span.record("otel.status_code", "ERROR");
            self.span.record("otel.status_message", result);
        }
    }
}

fn non_empty<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.is_empty() {
        default
    } else {
        value
    }
}

/// Reads the next frame unless the read deadline passes first.
async fn read_request<R>(ctx: &Context, bufr: &mut R, deadline: &ReadDeadline) -> Result<(MsgHeader, MsgBody), SessionError>
where
    R: AsyncRead + Unpin + Send,
{
    tokio::select! {
        biased;
        _ = deadline.expired() => Err(match ctx.cause() {
            Some(cause) => SessionError::Canceled(cause.to_string()),
            None => SessionError::Io(io::Error::new(io::ErrorKind::TimedOut, "read deadline exceeded")),
        }),
        res = wire::read_message(bufr) => res.map_err(SessionError::from),
    }
}

/// Logs a response and returns the level it was logged at.
fn log_response(who: &str, header: &MsgHeader, body: Option<&MsgBody>, close_conn: bool) -> Level {
    let mut level = Level::DEBUG;

    if let Some(MsgBody::Msg(msg)) = body {
        let ok = msg.section0().map(|doc| is_one(doc.get("ok"))).unwrap_or(false);
        if !ok {
            level = Level::WARN;
        }
    }

    if close_conn {
        level = Level::ERROR;
    }

    if level_enabled(level) {
        log_at(level, &format!("{} header: {}", who, header));
        match body {
            Some(body) => log_at(level, &format!("{} message:\n{}\n\n", who, body.string_indent())),
            None => log_at(level, &format!("{} message: <none>", who)),
        }
    }

    level
}
