//! Typed Values
//!
//! Every stored value is text on the wire, but numeric commands (`INCR`,
//! `DECRBY`, ...) need to know whether that text is an integer. Instead of
//! re-parsing on every access, the value is classified once when it is
//! written and kept as a closed tagged type:
//!
//! - [`Value::Int`] for text that is the canonical decimal form of an `i64`
//! - [`Value::Str`] for everything else
//!
//! "Canonical" means the text round-trips exactly: `"42"` and `"-7"` are
//! integers, `"042"`, `"+1"`, `" 1"` and `"1.0"` are plain strings. This keeps
//! `GET` byte-for-byte faithful to what was `SET`.

use bytes::Bytes;
use std::fmt;

/// The kind tag of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Arbitrary bytes.
    String,
    /// Text that is a valid 64-bit signed integer.
    Integer,
}

impl ValueKind {
    /// The name reported by the `TYPE` command.
    ///
    /// Both kinds are strings from the client's point of view.
    pub fn type_name(self) -> &'static str {
        "string"
    }
}

/// A value stored in the keyspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Opaque, binary-safe string.
    Str(Bytes),
    /// Integer-backed string.
    Int(i64),
}

impl Value {
    /// Classifies raw bytes into a [`Value`].
    pub fn from_bytes(raw: Bytes) -> Self {
        match parse_canonical_i64(&raw) {
            Some(n) => Value::Int(n),
            None => Value::Str(raw),
        }
    }

    /// Returns the kind tag of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Str(_) => ValueKind::String,
            Value::Int(_) => ValueKind::Integer,
        }
    }

    /// Returns the integer if this value is integer-backed.
    #[inline]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Str(_) => None,
        }
    }

    /// Returns the text form of the value.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Value::Str(b) => b.clone(),
            Value::Int(n) => Bytes::from(n.to_string()),
        }
    }

    /// Length of the text form in bytes.
    pub fn len(&self) -> usize {
        match self {
            Value::Str(b) => b.len(),
            Value::Int(n) => decimal_len(*n),
        }
    }

    /// Returns true if the text form is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<Bytes> for Value {
    fn from(raw: Bytes) -> Self {
        Value::from_bytes(raw)
    }
}

impl From<&'static str> for Value {
    fn from(s: &'static str) -> Self {
        Value::from_bytes(Bytes::from_static(s.as_bytes()))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            Value::Int(n) => write!(f, "{}", n),
        }
    }
}

/// Parses `raw` as an `i64` only if it is the canonical decimal spelling.
///
/// Also used to validate integer arguments (`DECRBY key amount`, `EX secs`).
pub fn parse_canonical_i64(raw: &[u8]) -> Option<i64> {
    // i64::MIN is 20 bytes including the sign
    if raw.is_empty() || raw.len() > 20 {
        return None;
    }
    let s = std::str::from_utf8(raw).ok()?;
    let n: i64 = s.parse().ok()?;
    if decimal_len(n) == raw.len() && !s.starts_with('+') {
        Some(n)
    } else {
        None
    }
}

fn decimal_len(n: i64) -> usize {
    let sign = usize::from(n < 0);
    let mut magnitude = n.unsigned_abs();
    let mut digits = 1;
    while magnitude >= 10 {
        magnitude /= 10;
        digits += 1;
    }
    sign + digits
}
