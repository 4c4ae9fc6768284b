//! Distributed tracing support.
//!
//! # Responsibilities
//! - Extract a remote span context from a command's `comment` field
//!
//! Drivers cannot send trace headers, so callers put
//! `{"traceID": "<32 hex>", "spanID": "<16 hex>"}` into `comment` instead.

use serde::Deserialize;
use thiserror::Error;

/// Trace and span ids recovered from a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteSpanContext {
    pub trace_id: u128,
    pub span_id: u64,
}

impl RemoteSpanContext {
    pub fn trace_id_hex(&self) -> String {
        format!("{:032x}", self.trace_id)
    }

    pub fn span_id_hex(&self) -> String {
        format!("{:016x}", self.span_id)
    }
}

#[derive(Debug, Error)]
pub enum SpanContextError {
    #[error("comment is empty")]
    Empty,

    #[error("comment is not a trace context: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid trace id {0:?}")]
    TraceId(String),

    #[error("invalid span id {0:?}")]
    SpanId(String),
}

#[derive(Deserialize)]
struct Carrier {
    #[serde(rename = "traceID")]
    trace_id: String,
    #[serde(rename = "spanID")]
    span_id: String,
}

fn parse_hex<const DIGITS: usize>(s: &str) -> Option<u128> {
    if s.len() != DIGITS || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u128::from_str_radix(s, 16).ok().filter(|v| *v != 0)
}

pub fn span_context_from_comment(comment: &str) -> Result<RemoteSpanContext, SpanContextError> {
    if comment.is_empty() {
        return Err(SpanContextError::Empty);
    }

    let carrier: Carrier = serde_json::from_str(comment)?;

    let trace_id = parse_hex::<32>(&carrier.trace_id)
        .ok_or_else(|| SpanContextError::TraceId(carrier.trace_id.clone()))?;
    let span_id = parse_hex::<16>(&carrier.span_id)
        .ok_or_else(|| SpanContextError::SpanId(carrier.span_id.clone()))?;

    Ok(RemoteSpanContext {
        trace_id,
        span_id: span_id as u64,
    })
}
