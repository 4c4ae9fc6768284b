//! Message header.

use std::fmt;

use super::{OpCode, WireError};

/// Size of the fixed header in bytes.
pub const MSG_HEADER_LEN: usize = 16;

/// Largest frame accepted from a client.
pub const MAX_MSG_LEN: usize = 48_000_000;

/// The fixed 16-byte header preceding every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    /// Total frame length, header included.
    pub message_length: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: OpCode,
}

impl MsgHeader {
    /// Header with only the opcode set; lengths and ids are filled in on finalization.
    pub fn new(op_code: OpCode) -> Self {
        Self {
            message_length: 0,
            request_id: 0,
            response_to: 0,
            op_code,
        }
    }

    pub fn to_bytes(&self) -> [u8; MSG_HEADER_LEN] {
        let mut b = [0u8; MSG_HEADER_LEN];
        b[0..4].copy_from_slice(&self.message_length.to_le_bytes());
        b[4..8].copy_from_slice(&self.request_id.to_le_bytes());
        b[8..12].copy_from_slice(&self.response_to.to_le_bytes());
        b[12..16].copy_from_slice(&self.op_code.as_i32().to_le_bytes());
        b
    }

    /// Parses and validates a header.
    pub fn from_bytes(b: &[u8; MSG_HEADER_LEN]) -> Result<Self, WireError> {
        let field = |i: usize| i32::from_le_bytes([b[i], b[i + 1], b[i + 2], b[i + 3]]);

        let header = Self {
            message_length: field(0),
            request_id: field(4),
            response_to: field(8),
            op_code: OpCode::from(field(12)),
        };

        let len = header.message_length;
        if len < MSG_HEADER_LEN as i32 || len as usize > MAX_MSG_LEN {
            return Err(WireError::Malformed(format!(
                "invalid message length {}",
                len
            )));
        }

        Ok(header)
    }

    /// Length of the body following this header.
    pub fn body_len(&self) -> usize {
        self.message_length as usize - MSG_HEADER_LEN
    }
}

impl fmt::Display for MsgHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "length: {}", self.message_length)?;
        writeln!(f, "id: {}", self.request_id)?;
        writeln!(f, "response_to: {}", self.response_to)?;
        writeln!(f, "opcode: {}", self.op_code)
    }
}
