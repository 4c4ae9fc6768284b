//! Client connection sessions.
//!
//! # Data Flow
//! ```text
//! accepted stream
//!     → conn.rs (session loop, panic boundary, capture, cancellation watcher)
//!     → router.rs (one exchange: read, proxy, route, log, diff, write)
//!         → handler (local) / proxy handler (upstream)
//! ```
//!
//! # Design Decisions
//! - A session always ends with a [`SessionError`]; a clean disconnect is
//!   [`SessionError::EndOfStream`]
//! - A panic in any request ends only that session
//! - Cancellation fails the next blocking read; it never interrupts a handler
//! - The mode is fixed per session

mod capture;
mod conn;
mod conninfo;
mod deadline;
mod diff;
mod error;
mod mode;
mod router;

pub use capture::{Capture, CaptureReader};
pub use conn::{Conn, ConnOpts};
pub use conninfo::ConnInfo;
pub use deadline::ReadDeadline;
pub use diff::ResponseDiff;
pub use error::SessionError;
pub use mode::{Mode, Plan, Source};
pub use router::{Proxied, Routed, Router};
