//! Request handlers.
//!
//! # Data Flow
//! ```text
//! Router (clientconn)
//!     → ProxyHandler::handle(&Request)   (upstream, borrowed request)
//!     → Handler::handle(Request)         (local, owns and may mutate the request)
//!     → Ok(Response) | Err(HandlerError)
//!     → protoerr.rs turns errors into protocol error documents
//! ```
//!
//! # Design Decisions
//! - Handlers return explicit errors and never catch panics
//! - The proxy borrows the request, the local handler consumes it
//! - Both traits are object safe so sessions hold `Arc<dyn ...>`

pub mod basic;
pub mod protoerr;
pub mod proxy;

use std::sync::Arc;
use std::time::Duration;

use bson::Document;
use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::context::Context;
use crate::wire::{MsgBody, MsgHeader, OpCode, OpMsg, OpReply, WireError};

pub use protoerr::{ErrorCode, ProtoError};

/// A decoded client request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    header: MsgHeader,
    body: MsgBody,
}

impl Request {
    pub fn new(header: MsgHeader, body: MsgBody) -> Self {
        Self { header, body }
    }

    pub fn header(&self) -> &MsgHeader {
        &self.header
    }

    pub fn body(&self) -> &MsgBody {
        &self.body
    }

    /// The command document of an OP_MSG or OP_QUERY request.
    pub fn document(&self) -> Result<&Document, HandlerError> {
        match &self.body {
            MsgBody::Msg(msg) => Ok(msg.section0()?),
            MsgBody::Query(query) => Ok(query.query()),
            other => Err(HandlerError::Internal(format!(
                "{} request has no command document",
                other.op_code()
            ))),
        }
    }

    pub fn document_mut(&mut self) -> Option<&mut Document> {
        match &mut self.body {
            MsgBody::Msg(msg) => msg.section0_mut(),
            MsgBody::Query(query) => Some(&mut query.query),
            _ => None,
        }
    }

    /// Database the command targets.
    pub fn database(&self) -> Result<String, HandlerError> {
        match &self.body {
            MsgBody::Query(query) => Ok(query.database().to_string()),
            _ => protoerr::required_str(self.document()?, "$db").map(str::to_string),
        }
    }

    pub fn into_parts(self) -> (MsgHeader, MsgBody) {
        (self.header, self.body)
    }
}

/// A response produced by a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    header: MsgHeader,
    body: MsgBody,
}

impl Response {
    pub fn new(header: MsgHeader, body: MsgBody) -> Self {
        Self { header, body }
    }

    /// Wraps a reply document in the response shape matching the request opcode.
    pub fn from_document(req: &Request, doc: Document) -> Result<Self, HandlerError> {
        let body = match req.header.op_code {
            OpCode::Msg => MsgBody::Msg(OpMsg::from_document(doc)),
            OpCode::Query => MsgBody::Reply(OpReply::from_document(doc)),
            other => {
                return Err(HandlerError::Internal(format!(
                    "cannot build a response for {}",
                    other
                )))
            }
        };
        Ok(Self {
            header: MsgHeader::new(body.op_code()),
            body,
        })
    }

    pub fn header(&self) -> &MsgHeader {
        &self.header
    }

    pub fn body(&self) -> &MsgBody {
        &self.body
    }

    pub fn into_parts(self) -> (MsgHeader, MsgBody) {
        (self.header, self.body)
    }
}

/// Errors returned by the local handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A command failure with a protocol error code.
    #[error("{message}")]
    Command {
        code: ErrorCode,
        message: String,
        /// Offending argument, used as a metrics label.
        argument: String,
    },

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Wire(#[from] WireError),
}

impl HandlerError {
    pub fn command(code: ErrorCode, message: impl Into<String>, argument: impl Into<String>) -> Self {
        HandlerError::Command {
            code,
            message: message.into(),
            argument: argument.into(),
        }
    }
}

/// Errors returned by the proxy handler. Always fatal to the client session.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to connect to upstream {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("upstream connect to {0} timed out after {1:?}")]
    Timeout(String, Duration),

    #[error("upstream wire error: {0}")]
    Wire(#[from] WireError),

    #[error("upstream closed the connection")]
    Closed,
}

/// Local command execution.
pub trait Handler: Send + Sync + 'static {
    fn handle<'a>(&'a self, ctx: &'a Context, req: Request) -> BoxFuture<'a, Result<Response, HandlerError>>;
}

/// Forwarding to an upstream reference server.
pub trait ProxyHandler: Send + Sync + 'static {
    fn handle<'a>(&'a self, ctx: &'a Context, req: &'a Request) -> BoxFuture<'a, Result<Response, ProxyError>>;

    /// Independent lifecycle task, spawned once per session.
    fn run(self: Arc<Self>, ctx: Context) -> BoxFuture<'static, ()>;
}
