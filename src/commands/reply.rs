//! Typed command results.
//!
//! A [`Reply`] is what the executor produces; the transport decides how to
//! put it on the wire (see [`crate::protocol::RespValue`]).

use bytes::Bytes;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Status string such as `OK` or `PONG`.
    Status(&'static str),
    /// 64-bit integer result.
    Integer(i64),
    /// Binary-safe string result.
    Bulk(Bytes),
    /// Absent value.
    Nil,
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Status("OK")
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(data.into())
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Status(s) => write!(f, "{}", s),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::Bulk(data) => write!(f, "\"{}\"", String::from_utf8_lossy(data)),
            Reply::Nil => write!(f, "(nil)"),
        }
    }
}
