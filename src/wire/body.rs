//! Frame bodies and the read/write entry points.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{MsgHeader, OpCode, OpMsg, OpQuery, OpReply, WireError, MSG_HEADER_LEN};

/// Decoded frame body, tagged by opcode.
#[derive(Debug, Clone, PartialEq)]
pub enum MsgBody {
    Msg(OpMsg),
    Query(OpQuery),
    Reply(OpReply),
    /// Any other opcode; the body is kept as opaque bytes.
    Raw { op_code: OpCode, bytes: Vec<u8> },
}

impl MsgBody {
    pub fn decode(op_code: OpCode, buf: &[u8]) -> Result<Self, WireError> {
        Ok(match op_code {
            OpCode::Msg => MsgBody::Msg(OpMsg::decode(buf)?),
            OpCode::Query => MsgBody::Query(OpQuery::decode(buf)?),
            OpCode::Reply => MsgBody::Reply(OpReply::decode(buf)?),
            other => MsgBody::Raw {
                op_code: other,
                bytes: buf.to_vec(),
            },
        })
    }

    pub fn op_code(&self) -> OpCode {
        match self {
            MsgBody::Msg(_) => OpCode::Msg,
            MsgBody::Query(_) => OpCode::Query,
            MsgBody::Reply(_) => OpCode::Reply,
            MsgBody::Raw { op_code, .. } => *op_code,
        }
    }

    /// Encodes the body without the header.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::new();
        match self {
            MsgBody::Msg(msg) => msg.encode(&mut out)?,
            MsgBody::Query(query) => query.encode(&mut out)?,
            MsgBody::Reply(reply) => reply.encode(&mut out)?,
            MsgBody::Raw { bytes, .. } => out.extend_from_slice(bytes),
        }
        Ok(out)
    }

    /// Multi-line rendering used for debug logs and diffs.
    pub fn string_indent(&self) -> String {
        match self {
            MsgBody::Msg(msg) => msg.string_indent(),
            MsgBody::Query(query) => query.string_indent(),
            MsgBody::Reply(reply) => reply.string_indent(),
            MsgBody::Raw { op_code, bytes } => {
                format!("{} ({} raw bytes)\n", op_code, bytes.len())
            }
        }
    }
}

/// Reads one frame.
///
/// Returns [`WireError::ZeroRead`] when the stream ends cleanly before a new header.
pub async fn read_message<R>(r: &mut R) -> Result<(MsgHeader, MsgBody), WireError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut head = [0u8; MSG_HEADER_LEN];

    let n = r.read(&mut head).await?;
    if n == 0 {
        return Err(WireError::ZeroRead);
    }
    r.read_exact(&mut head[n..]).await?;

    let header = MsgHeader::from_bytes(&head)?;

    let mut body = vec![0u8; header.body_len()];
    r.read_exact(&mut body).await?;

    let body = MsgBody::decode(header.op_code, &body)?;
    Ok((header, body))
}

/// Writes one frame. The header is written as given; callers set the length.
pub async fn write_message<W>(w: &mut W, header: &MsgHeader, body: &MsgBody) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let bytes = body.to_bytes()?;

    if header.message_length as usize != MSG_HEADER_LEN + bytes.len() {
        return Err(WireError::Malformed(format!(
            "header declares length {}, frame is {}",
            header.message_length,
            MSG_HEADER_LEN + bytes.len()
        )));
    }

    w.write_all(&header.to_bytes()).await?;
    w.write_all(&bytes).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn frame(request_id: i32, body: &MsgBody) -> Vec<u8> {
        let bytes = body.to_bytes().unwrap();
        let header = MsgHeader {
            message_length: (MSG_HEADER_LEN + bytes.len()) as i32,
            request_id,
            response_to: 0,
            op_code: body.op_code(),
        };
        let mut out = header.to_bytes().to_vec();
        out.extend_from_slice(&bytes);
        out
    }

    #[tokio::test]
    async fn test_read_message_zero_read() {
        let mut empty: &[u8] = &[];
        assert!(matches!(read_message(&mut empty).await, Err(WireError::ZeroRead)));
    }

    #[tokio::test]
    async fn test_read_message_truncated_is_io() {
        let body = MsgBody::Msg(OpMsg::from_document(doc! { "ping": 1, "$db": "admin" }));
        let buf = frame(1, &body);
        let mut short = &buf[..buf.len() - 3];
        match read_message(&mut short).await {
            Err(WireError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_message_legacy_is_raw() {
        let body = MsgBody::Raw {
            op_code: OpCode::Insert,
            bytes: vec![1, 2, 3, 4],
        };
        let buf = frame(9, &body);
        let (header, decoded) = read_message(&mut &buf[..]).await.unwrap();
        assert_eq!(header.request_id, 9);
        assert_eq!(header.op_code, OpCode::Insert);
        assert_eq!(decoded, body);
    }

    #[tokio::test]
    async fn test_write_message_checks_length() {
        let body = MsgBody::Msg(OpMsg::from_document(doc! { "ok": 1.0 }));
        let header = MsgHeader::new(OpCode::Msg);
        let mut out = Vec::new();
        assert!(write_message(&mut out, &header, &body).await.is_err());
        assert!(out.is_empty());
    }
}
