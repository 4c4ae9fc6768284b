//! Wire protocol codec boundary.
//!
//! # Data Flow
//! ```text
//! Inbound bytes
//!     → header.rs (16-byte little-endian header, length checks)
//!     → body.rs (dispatch on opcode)
//!         → msg.rs (OP_MSG sections)
//!         → query.rs (OP_QUERY / OP_REPLY)
//!         → raw bytes for every other opcode
//!     → (MsgHeader, MsgBody)
//!
//! Outbound:
//!     (MsgHeader, MsgBody) → body.to_bytes() → header + body → writer
//! ```
//!
//! # Design Decisions
//! - The session never looks past opcode, length, request id and response-to
//! - Zero bytes before a header is a clean end-of-stream, not a fault
//! - Documents are BSON; text rendering is indented extended JSON

mod body;
mod error;
mod header;
mod msg;
mod opcode;
mod query;

pub use body::{read_message, write_message, MsgBody};
pub use error::WireError;
pub use header::{MsgHeader, MAX_MSG_LEN, MSG_HEADER_LEN};
pub use msg::{OpMsg, Section};
pub use opcode::OpCode;
pub use query::{OpQuery, OpReply};

use bson::{Bson, Document};

/// Returns the command name of a command document (its first key).
pub fn command_name(doc: &Document) -> Option<&str> {
    doc.keys().next().map(String::as_str)
}

/// Renders a document as indented relaxed extended JSON.
pub fn document_string(doc: &Document) -> String {
    let value = Bson::Document(doc.clone()).into_relaxed_extjson();
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| doc.to_string())
}

/// Splits a buffer holding back-to-back BSON documents.
pub(crate) fn read_documents(mut buf: &[u8]) -> Result<Vec<Document>, WireError> {
    let mut docs = Vec::new();
    while !buf.is_empty() {
        let (doc, rest) = read_document(buf)?;
        docs.push(doc);
        buf = rest;
    }
    Ok(docs)
}

/// Reads one length-prefixed BSON document from the front of `buf`.
pub(crate) fn read_document(buf: &[u8]) -> Result<(Document, &[u8]), WireError> {
    if buf.len() < 5 {
        return Err(WireError::Malformed(format!(
            "document needs at least 5 bytes, got {}",
            buf.len()
        )));
    }

    let len = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if len < 5 || len as usize > buf.len() {
        return Err(WireError::Malformed(format!(
            "invalid document length {} ({} bytes available)",
            len,
            buf.len()
        )));
    }

    let (raw, rest) = buf.split_at(len as usize);
    let doc = bson::from_slice::<Document>(raw)?;
    Ok((doc, rest))
}

pub(crate) fn write_document(doc: &Document, out: &mut Vec<u8>) -> Result<(), WireError> {
    let raw = bson::to_vec(doc)?;
    out.extend_from_slice(&raw);
    Ok(())
}

/// Reads a NUL-terminated string from the front of `buf`.
pub(crate) fn read_cstring(buf: &[u8]) -> Result<(String, &[u8]), WireError> {
    let nul = buf
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| WireError::Malformed("unterminated cstring".to_string()))?;

    let s = std::str::from_utf8(&buf[..nul])
        .map_err(|e| WireError::Malformed(format!("cstring is not UTF-8: {}", e)))?;

    Ok((s.to_string(), &buf[nul + 1..]))
}

pub(crate) fn take<const N: usize>(buf: &[u8]) -> Result<([u8; N], &[u8]), WireError> {
    if buf.len() < N {
        return Err(WireError::Malformed(format!(
            "expected {} more bytes, got {}",
            N,
            buf.len()
        )));
    }
    let mut head = [0u8; N];
    head.copy_from_slice(&buf[..N]);
    Ok((head, &buf[N..]))
}
