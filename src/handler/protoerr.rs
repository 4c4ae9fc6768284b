//! Protocol error documents.

use bson::{doc, Bson, Document};

use super::HandlerError;
use crate::wire::{MsgBody, OpMsg, OpReply, WireError};

/// Error codes understood by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InternalError,
    BadValue,
    TypeMismatch,
    CommandNotFound,
    /// User already exists.
    Location51003,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::InternalError => 1,
            ErrorCode::BadValue => 2,
            ErrorCode::TypeMismatch => 14,
            ErrorCode::CommandNotFound => 59,
            ErrorCode::Location51003 => 51003,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::InternalError => "InternalError",
            ErrorCode::BadValue => "BadValue",
            ErrorCode::TypeMismatch => "TypeMismatch",
            ErrorCode::CommandNotFound => "CommandNotFound",
            ErrorCode::Location51003 => "Location51003",
        }
    }
}

/// A structured error ready to be sent to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtoError {
    pub code: ErrorCode,
    /// Canonical error name; used as the response outcome label.
    pub name: String,
    pub message: String,
    /// Offending argument, if known.
    pub argument: String,
}

impl ProtoError {
    pub fn from_handler_error(err: &HandlerError) -> Self {
        let (code, message, argument) = match err {
            HandlerError::Command {
                code,
                message,
                argument,
            } => (*code, message.clone(), argument.clone()),
            HandlerError::Wire(WireError::Malformed(msg)) => (ErrorCode::BadValue, msg.clone(), String::new()),
            other => {
                tracing::warn!(error = %other, "Internal error while handling request");
                (ErrorCode::InternalError, other.to_string(), String::new())
            }
        };

        Self {
            code,
            name: code.name().to_string(),
            message,
            argument,
        }
    }

    pub fn document(&self) -> Document {
        doc! {
            "ok": 0.0,
            "errmsg": self.message.as_str(),
            "code": self.code.code(),
            "codeName": self.name.as_str(),
        }
    }

    /// Error body for OP_MSG responses.
    pub fn msg_body(&self) -> MsgBody {
        MsgBody::Msg(OpMsg::from_document(self.document()))
    }

    /// Error body for OP_REPLY responses.
    pub fn reply_body(&self) -> MsgBody {
        MsgBody::Reply(OpReply::from_document(self.document()))
    }
}

/// Returns a required string parameter.
pub fn required_str<'a>(doc: &'a Document, key: &str) -> Result<&'a str, HandlerError> {
    match doc.get(key) {
        None => Err(HandlerError::command(
            ErrorCode::BadValue,
            format!("required parameter \"{}\" is missing", key),
            key,
        )),
        Some(Bson::String(s)) => Ok(s.as_str()),
        Some(other) => Err(HandlerError::command(
            ErrorCode::TypeMismatch,
            format!(
                "required parameter \"{}\" has type {:?} (expected string)",
                key,
                other.element_type()
            ),
            key,
        )),
    }
}

/// Returns true if `v` is a number equal to 1.
pub fn is_one(v: Option<&Bson>) -> bool {
    match v {
        Some(Bson::Double(f)) => *f == 1.0,
        Some(Bson::Int32(i)) => *i == 1,
        Some(Bson::Int64(i)) => *i == 1,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_document() {
        let err = HandlerError::command(ErrorCode::CommandNotFound, "no such command: 'frob'", "frob");
        let proto = ProtoError::from_handler_error(&err);

        assert_eq!(proto.name, "CommandNotFound");
        assert_eq!(proto.argument, "frob");

        let d = proto.document();
        assert_eq!(d.get_f64("ok").unwrap(), 0.0);
        assert_eq!(d.get_i32("code").unwrap(), 59);
        assert_eq!(d.get_str("errmsg").unwrap(), "no such command: 'frob'");
    }

    #[test]
    fn test_internal_error_has_no_argument() {
        let proto = ProtoError::from_handler_error(&HandlerError::Internal("boom".into()));
        assert_eq!(proto.code, ErrorCode::InternalError);
        assert!(proto.argument.is_empty());
    }

    #[test]
    fn test_required_str() {
        let d = doc! { "$db": "test", "n": 1 };
        assert_eq!(required_str(&d, "$db").unwrap(), "test");
        assert!(matches!(
            required_str(&d, "n"),
            Err(HandlerError::Command { code: ErrorCode::TypeMismatch, .. })
        ));
        assert!(matches!(
            required_str(&d, "missing"),
            Err(HandlerError::Command { code: ErrorCode::BadValue, .. })
        ));
    }

    #[test]
    fn test_is_one() {
        assert!(is_one(Some(&Bson::Double(1.0))));
        assert!(is_one(Some(&Bson::Int64(1))));
        assert!(!is_one(Some(&Bson::Int32(0))));
        assert!(!is_one(None));
    }
}
