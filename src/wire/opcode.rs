use std::fmt;

/// Wire message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Reply,
    Update,
    Insert,
    GetByOid,
    Query,
    GetMore,
    Delete,
    KillCursors,
    Compressed,
    Msg,
    /// Any value outside the known set.
    Unknown(i32),
}

impl OpCode {
    pub fn as_i32(self) -> i32 {
        match self {
            OpCode::Reply => 1,
            OpCode::Update => 2001,
            OpCode::Insert => 2002,
            OpCode::GetByOid => 2003,
            OpCode::Query => 2004,
            OpCode::GetMore => 2005,
            OpCode::Delete => 2006,
            OpCode::KillCursors => 2007,
            OpCode::Compressed => 2012,
            OpCode::Msg => 2013,
            OpCode::Unknown(v) => v,
        }
    }

    /// True for the opcodes whose responses can carry a structured error document.
    pub fn supports_protocol_error(self) -> bool {
        matches!(self, OpCode::Msg | OpCode::Reply)
    }
}

impl From<i32> for OpCode {
    fn from(v: i32) -> Self {
        match v {
            1 => OpCode::Reply,
            2001 => OpCode::Update,
            2002 => OpCode::Insert,
            2003 => OpCode::GetByOid,
            2004 => OpCode::Query,
            2005 => OpCode::GetMore,
            2006 => OpCode::Delete,
            2007 => OpCode::KillCursors,
            2012 => OpCode::Compressed,
            2013 => OpCode::Msg,
            other => OpCode::Unknown(other),
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpCode::Reply => f.write_str("OP_REPLY"),
            OpCode::Update => f.write_str("OP_UPDATE"),
            OpCode::Insert => f.write_str("OP_INSERT"),
            OpCode::GetByOid => f.write_str("OP_GET_BY_OID"),
            OpCode::Query => f.write_str("OP_QUERY"),
            OpCode::GetMore => f.write_str("OP_GET_MORE"),
            OpCode::Delete => f.write_str("OP_DELETE"),
            OpCode::KillCursors => f.write_str("OP_KILL_CURSORS"),
            OpCode::Compressed => f.write_str("OP_COMPRESSED"),
            OpCode::Msg => f.write_str("OP_MSG"),
            OpCode::Unknown(v) => write!(f, "OpCode({})", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_values_are_stable() {
        for v in [1, 2001, 2002, 2003, 2004, 2005, 2006, 2007, 2012, 2013, 42] {
            assert_eq!(OpCode::from(v).as_i32(), v);
        }
        assert_eq!(OpCode::from(42), OpCode::Unknown(42));
        assert_eq!(OpCode::Msg.to_string(), "OP_MSG");
    }
}
