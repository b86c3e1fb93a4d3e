//! RESP2 wire values.
//!
//! | Prefix | Type          | Example                  |
//! |--------|---------------|--------------------------|
//! | `+`    | Simple string | `+OK\r\n`                |
//! | `-`    | Error         | `-ERR syntax error\r\n`  |
//! | `:`    | Integer       | `:42\r\n`                |
//! | `$`    | Bulk string   | `$5\r\nhello\r\n`        |
//! | `*`    | Array         | `*1\r\n$4\r\nPING\r\n`   |
//!
//! A null reply is the null bulk string `$-1\r\n`.
//!
//! Pushes for watched queries are plain arrays:
//! `["watch", <query>, <subscription id>, <result>]`.

use crate::commands::{CommandError, Reply};
use crate::subscription::Push;
use bytes::{BufMut, Bytes, BytesMut};

pub const CRLF: &[u8] = b"\r\n";

/// First element of every push frame.
pub const PUSH_KIND: &str = "watch";

pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+<text>`; must not contain CR or LF.
    SimpleString(String),
    /// `-<message>`
    Error(String),
    Integer(i64),
    /// Binary-safe payload.
    BulkString(Bytes),
    /// Null bulk string.
    Null,
    Array(Vec<RespValue>),
}

impl RespValue {
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    /// Frame for a pushed subscription result.
    pub fn push(push: &Push) -> Self {
        let result = match &push.result {
            Ok(reply) => RespValue::from(reply.clone()),
            Err(err) => RespValue::from(err),
        };

        RespValue::Array(vec![
            RespValue::bulk_string(PUSH_KIND),
            RespValue::bulk_string(push.query.clone()),
            RespValue::Integer(push.subscription as i64),
            result,
        ])
    }

    /// Encoded wire form.
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf);
        buf.freeze()
    }

    /// Appends the wire form to `buf`.
    pub fn write_to(&self, buf: &mut BytesMut) {
        match self {
            RespValue::SimpleString(s) => write_text_line(buf, prefix::SIMPLE_STRING, s),
            RespValue::Error(s) => write_text_line(buf, prefix::ERROR, s),
            RespValue::Integer(n) => write_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(data) => {
                write_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            RespValue::Null => write_line(buf, prefix::BULK_STRING, b"-1"),
            RespValue::Array(values) => {
                write_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.write_to(buf);
                }
            }
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Splits a request array into its command name and arguments.
    ///
    /// Every element must be a string; the name must be UTF-8.
    pub fn into_command(self) -> Option<(String, Vec<Bytes>)> {
        let RespValue::Array(items) = self else {
            return None;
        };

        let mut parts = items.into_iter().map(|item| match item {
            RespValue::BulkString(data) => Some(data),
            RespValue::SimpleString(s) => Some(Bytes::from(s)),
            _ => None,
        });

        let name = parts.next()??;
        let name = String::from_utf8(name.to_vec()).ok()?;
        let args = parts.collect::<Option<Vec<_>>>()?;
        Some((name, args))
    }
}

/// Line-based bodies may echo client input, so CR and LF become spaces.
fn write_text_line(buf: &mut BytesMut, prefix: u8, body: &str) {
    buf.reserve(body.len() + 3);
    buf.put_u8(prefix);
    buf.extend(body.bytes().map(|b| if b == b'\r' || b == b'\n' { b' ' } else { b }));
    buf.put_slice(CRLF);
}

fn write_line(buf: &mut BytesMut, prefix: u8, body: &[u8]) {
    buf.reserve(body.len() + 3);
    buf.put_u8(prefix);
    buf.put_slice(body);
    buf.put_slice(CRLF);
}

impl From<Reply> for RespValue {
    fn from(reply: Reply) -> Self {
        match reply {
            Reply::Status(s) => RespValue::SimpleString(s.to_string()),
            Reply::Integer(n) => RespValue::Integer(n),
            Reply::Bulk(data) => RespValue::BulkString(data),
            Reply::Nil => RespValue::Null,
        }
    }
}

impl From<&CommandError> for RespValue {
    fn from(err: &CommandError) -> Self {
        RespValue::Error(err.to_string())
    }
}

impl From<Result<Reply, CommandError>> for RespValue {
    fn from(result: Result<Reply, CommandError>) -> Self {
        match result {
            Ok(reply) => reply.into(),
            Err(err) => (&err).into(),
        }
    }
}
