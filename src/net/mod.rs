//! Network layer.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limit)
//!     → connection.rs (id, active-session tracking)
//!     → server.rs (one task per session)
//!     → clientconn::Conn
//! ```
//!
//! # Design Decisions
//! - The connection limit is enforced before accepting, so excess clients wait in the backlog
//! - Shutdown cancels the root context, then waits for sessions to drain

pub mod connection;
pub mod listener;
pub mod server;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use listener::{ConnectionPermit, Listener, ListenerError};
pub use server::{ProxyFactory, WireServer};
