//! Bounded TCP listener.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("invalid listen address {0:?}")]
    Address(String),

    #[error("failed to bind: {0}")]
    Bind(#[source] std::io::Error),

    #[error("failed to accept: {0}")]
    Accept(#[source] std::io::Error),

    #[error("listener closed")]
    Closed,
}

/// A TCP listener that holds at most `max_connections` sessions open.
///
/// When the limit is reached, `accept` waits for a slot before accepting,
/// leaving new clients in the kernel backlog.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    slots: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    /// Bind to the configured address with connection limits.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|_| ListenerError::Address(config.bind_address.clone()))?;

        let inner = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        let local = inner.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %local,
            max_connections = config.max_connections,
            "Listening for clients"
        );

        Ok(Self {
            inner,
            slots: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
        })
    }

    /// Waits for a free slot, then accepts one client.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, peer) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer = %peer,
            free_slots = self.slots.available_permits(),
            "Accepted client"
        );

        Ok((stream, peer, ConnectionPermit { _permit: permit }))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Number of sessions that can still be accepted.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Configured session limit.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// A session slot. Released on drop, even if the session task panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_connections: usize) -> ListenerConfig {
        ListenerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            max_connections,
        }
    }

    #[tokio::test]
    async fn test_permits_bound_sessions() {
        let listener = Listener::bind(&config(1)).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _c1 = TcpStream::connect(addr).await.unwrap();
        let (_s1, _, permit) = listener.accept().await.unwrap();
        assert_eq!(listener.available_slots(), 0);

        drop(permit);
        assert_eq!(listener.available_slots(), 1);
    }

    #[tokio::test]
    async fn test_bad_address() {
        let cfg = ListenerConfig {
            bind_address: "not an address".to_string(),
            max_connections: 1,
        };
        assert!(matches!(Listener::bind(&cfg).await, Err(ListenerError::Address(_))));
    }
}
