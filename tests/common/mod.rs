//! Shared fixtures for session and server tests.
#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context as TaskContext, Poll};

use bson::{doc, Document};
use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use docwire::context::Context;
use docwire::handler::{Handler, HandlerError, ProxyError, ProxyHandler, Request, Response};
use docwire::wire::{self, MsgBody, MsgHeader, OpCode, OpMsg, WireError, MSG_HEADER_LEN};

/// Encodes a full frame with a correct length.
pub fn frame(request_id: i32, body: &MsgBody) -> Vec<u8> {
    let bytes = body.to_bytes().unwrap();
    let header = MsgHeader {
        message_length: (MSG_HEADER_LEN + bytes.len()) as i32,
        request_id,
        response_to: 0,
        op_code: body.op_code(),
    };
    let mut out = header.to_bytes().to_vec();
    out.extend_from_slice(&bytes);
    out
}

pub fn msg(doc: Document) -> MsgBody {
    MsgBody::Msg(OpMsg::from_document(doc))
}

pub fn ping() -> MsgBody {
    msg(doc! { "ping": 1, "$db": "admin" })
}

/// Decodes every frame in `bytes`.
pub async fn read_frames(bytes: &[u8]) -> Vec<(MsgHeader, MsgBody)> {
    let mut rest = bytes;
    let mut out = Vec::new();
    loop {
        match wire::read_message(&mut rest).await {
            Ok(frame) => out.push(frame),
            Err(WireError::ZeroRead) => return out,
            Err(e) => panic!("bad frame in output: {}", e),
        }
    }
}

/// First document of an OP_MSG body.
pub fn section0(body: &MsgBody) -> Document {
    match body {
        MsgBody::Msg(m) => m.section0().unwrap().clone(),
        other => panic!("expected OP_MSG, got {:?}", other),
    }
}

/// How a [`ScriptedStream`] behaves once its script is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ending {
    Eof,
    Reset,
}

/// In-memory client: replays scripted bytes, then ends; collects writes.
pub struct ScriptedStream {
    input: Vec<u8>,
    pos: usize,
    ending: Ending,
    written: Arc<Mutex<Vec<u8>>>,
}

impl ScriptedStream {
    pub fn new(input: Vec<u8>, ending: Ending) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let stream = Self {
            input,
            pos: 0,
            ending,
            written: Arc::clone(&written),
        };
        (stream, written)
    }
}

impl AsyncRead for ScriptedStream {
    fn poll_read(mut self: Pin<&mut Self>, _cx: &mut TaskContext<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let remaining = &self.input[self.pos..];
        if remaining.is_empty() {
            return match self.ending {
                Ending::Eof => Poll::Ready(Ok(())),
                Ending::Reset => Poll::Ready(Err(io::Error::from(io::ErrorKind::ConnectionReset))),
            };
        }

        let n = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..n]);
        self.pos += n;
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for ScriptedStream {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.written.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

pub type CallLog = Arc<Mutex<Vec<&'static str>>>;

/// Local handler answering every command with a fixed document.
pub struct RecordingHandler {
    pub log: CallLog,
    pub calls: AtomicUsize,
    pub reply: Document,
}

impl RecordingHandler {
    pub fn new(log: CallLog, reply: Document) -> Self {
        Self {
            log,
            calls: AtomicUsize::new(0),
            reply,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Handler for RecordingHandler {
    fn handle<'a>(&'a self, _ctx: &'a Context, req: Request) -> BoxFuture<'a, Result<Response, HandlerError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push("local");
            Response::from_document(&req, self.reply.clone())
        })
    }
}

/// Upstream stand-in answering every request with a fixed document.
pub struct RecordingProxy {
    pub log: CallLog,
    pub calls: AtomicUsize,
    pub runs: AtomicUsize,
    pub reply: Document,
}

impl RecordingProxy {
    pub fn new(log: CallLog, reply: Document) -> Self {
        Self {
            log,
            calls: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
            reply,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProxyHandler for RecordingProxy {
    fn handle<'a>(&'a self, _ctx: &'a Context, req: &'a Request) -> BoxFuture<'a, Result<Response, ProxyError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push("proxy");

            let body = msg(self.reply.clone());
            let header = MsgHeader {
                message_length: (MSG_HEADER_LEN + body.to_bytes()?.len()) as i32,
                request_id: 9000 + req.header().request_id,
                response_to: req.header().request_id,
                op_code: OpCode::Msg,
            };
            Ok(Response::new(header, body))
        })
    }

    fn run(self: Arc<Self>, ctx: Context) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            self.runs.fetch_add(1, Ordering::SeqCst);
            ctx.cancelled().await;
        })
    }
}

async fn explode() -> Result<Response, HandlerError> {
    panic!("handler exploded");
}

/// Local handler that panics on every request.
pub struct PanickingHandler;

impl Handler for PanickingHandler {
    fn handle<'a>(&'a self, _ctx: &'a Context, _req: Request) -> BoxFuture<'a, Result<Response, HandlerError>> {
        Box::pin(explode())
    }
}

/// Local handler that reports the connection info it sees.
#[derive(Default)]
pub struct ConnInfoHandler {
    pub seen: Mutex<Vec<Option<std::net::SocketAddr>>>,
}

impl Handler for ConnInfoHandler {
    fn handle<'a>(&'a self, ctx: &'a Context, req: Request) -> BoxFuture<'a, Result<Response, HandlerError>> {
        Box::pin(async move {
            let info = ctx
                .conn_info()
                .ok_or_else(|| HandlerError::Internal("no connection info".to_string()))?;
            self.seen.lock().unwrap().push(info.peer);
            Response::from_document(&req, doc! { "ok": 1.0 })
        })
    }
}
