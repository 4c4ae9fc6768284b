use thiserror::Error;

use super::Mode;
use crate::handler::ProxyError;
use crate::wire::WireError;

/// Why a session ended. A session always ends with one of these.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The client closed the connection between frames.
    #[error("client disconnected")]
    EndOfStream,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode request: {0}")]
    Decode(WireError),

    #[error("failed to encode response: {0}")]
    Encode(WireError),

    #[error("proxy error: {0}")]
    Proxy(#[from] ProxyError),

    #[error("context canceled: {0}")]
    Canceled(String),

    /// A response required closing the connection.
    #[error("fatal error")]
    Closed,

    /// The mode table selected a response that was never produced.
    #[error("no response to send to client")]
    NoResponse,

    #[error("{0} mode requires a proxy handler")]
    MissingProxy(Mode),

    #[error("failed to set up traffic capture: {0}")]
    Capture(std::io::Error),

    /// A panic was caught at the session boundary.
    #[error("panic")]
    Panic,
}

impl SessionError {
    /// True only for a clean client disconnect.
    pub fn is_clean_disconnect(&self) -> bool {
        matches!(self, SessionError::EndOfStream)
    }

    pub(crate) fn from_write(err: WireError) -> Self {
        match err {
            WireError::Io(e) => SessionError::Io(e),
            other => SessionError::Encode(other),
        }
    }
}

impl From<WireError> for SessionError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::ZeroRead => SessionError::EndOfStream,
            WireError::Io(e) => SessionError::Io(e),
            other => SessionError::Decode(other),
        }
    }
}
