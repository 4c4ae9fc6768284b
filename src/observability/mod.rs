//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Sessions and handlers produce:
//!     → logging.rs (structured log events, dynamic-level helpers)
//!     → metrics.rs (request/response counters, connection gauge)
//!     → tracing.rs (remote span context carried in the `comment` field)
//!
//! Consumers:
//!     → stdout via tracing-subscriber
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Counters are labelled exactly like the wire: opcode, command, argument, result
//! - In-process tallies mirror the exported counters so tests can read them
//! - A malformed trace context is logged and ignored, never fatal

pub mod logging;
pub mod metrics;
pub mod tracing;
