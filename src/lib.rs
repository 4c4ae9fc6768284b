//! Connection-handling core of a document-database wire protocol server.
//!
//! Accepts client connections, decodes framed requests, and routes each one
//! to a local handler, an upstream reference server, or both, depending on
//! the configured [`clientconn::Mode`].

pub mod clientconn;
pub mod config;
pub mod context;
pub mod handler;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod wire;

pub use clientconn::{Conn, ConnOpts, Mode, SessionError};
pub use config::ServerConfig;
pub use context::Context;
pub use lifecycle::Shutdown;
pub use net::WireServer;
