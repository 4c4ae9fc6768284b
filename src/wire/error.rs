use thiserror::Error;

/// Errors produced while reading or writing frames.
#[derive(Debug, Error)]
pub enum WireError {
    /// The peer closed the stream before sending any byte of a new frame.
    #[error("zero bytes read")]
    ZeroRead,

    /// Transport failure, including a frame truncated mid-way.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The frame or body structure is invalid.
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("BSON decode error: {0}")]
    Decode(#[from] bson::de::Error),

    #[error("BSON encode error: {0}")]
    Encode(#[from] bson::ser::Error),
}
