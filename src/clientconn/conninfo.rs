//! Request-scoped connection information.

use std::net::SocketAddr;

use crate::net::connection::ConnectionId;

/// Connection facts visible to handlers through the request context.
///
/// Lives exactly as long as the session's context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnInfo {
    pub id: ConnectionId,
    /// Peer address; `None` for non-TCP transports.
    pub peer: Option<SocketAddr>,
}

impl ConnInfo {
    pub fn new(id: ConnectionId, peer: Option<SocketAddr>) -> Self {
        Self { id, peer }
    }
}
