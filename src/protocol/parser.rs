//! Incremental RESP2 parser.
//!
//! [`parse_frame`] looks at the front of a read buffer and returns:
//!
//! - `Ok(Some((value, consumed)))` when a whole frame is available
//! - `Ok(None)` when more bytes are needed
//! - `Err(ParseError)` when the bytes can never form a valid frame
//!
//! The caller owns the buffer and advances it by `consumed`. Nothing is
//! buffered inside the parser, so a frame split across any number of reads
//! parses the same as one delivered at once.
//!
//! Lines that do not start with a RESP type byte are inline commands, as
//! typed into telnet: whitespace separated words, with `"double"` quotes
//! (supporting `\"`, `\\`, `\n`, `\r`, `\t` and `\xHH` escapes) and
//! `'single'` quotes for arguments containing spaces.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid integer '{0}'")]
    InvalidInteger(String),

    #[error("invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("invalid length {0}")]
    InvalidLength(i64),

    #[error("frame too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    #[error("nesting deeper than {0} levels")]
    TooDeep(usize),

    #[error("expected CRLF after bulk string")]
    MissingCrlf,

    #[error("unbalanced quotes in inline command")]
    UnbalancedQuotes,
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Largest accepted bulk string.
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Largest accepted inline command line.
pub const MAX_INLINE_SIZE: usize = 64 * 1024;

/// Deepest accepted array nesting.
pub const MAX_DEPTH: usize = 32;

/// Parses one frame from the front of `buf`.
pub fn parse_frame(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    parse_value(buf, 0)
}

fn parse_value(buf: &[u8], depth: usize) -> ParseResult<Option<(RespValue, usize)>> {
    let Some(&kind) = buf.first() else {
        return Ok(None);
    };
    if depth > MAX_DEPTH {
        return Err(ParseError::TooDeep(MAX_DEPTH));
    }

    match kind {
        prefix::SIMPLE_STRING | prefix::ERROR | prefix::INTEGER => {
            let Some((line, consumed)) = read_line(&buf[1..]) else {
                return Ok(None);
            };
            let value = match kind {
                prefix::INTEGER => RespValue::Integer(parse_number(line)?),
                _ => {
                    let text = std::str::from_utf8(line)
                        .map_err(|_| ParseError::InvalidUtf8("simple string"))?
                        .to_string();
                    if kind == prefix::ERROR {
                        RespValue::Error(text)
                    } else {
                        RespValue::SimpleString(text)
                    }
                }
            };
            Ok(Some((value, 1 + consumed)))
        }
        prefix::BULK_STRING => parse_bulk(buf),
        prefix::ARRAY => parse_array(buf, depth),
        _ => parse_inline(buf),
    }
}

fn parse_bulk(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    let Some((line, header)) = read_line(&buf[1..]) else {
        return Ok(None);
    };
    let header = 1 + header;

    let len = match parse_number(line)? {
        -1 => return Ok(Some((RespValue::Null, header))),
        n if n < 0 => return Err(ParseError::InvalidLength(n)),
        n => n as usize,
    };
    if len > MAX_BULK_SIZE {
        return Err(ParseError::TooLarge {
            size: len,
            max: MAX_BULK_SIZE,
        });
    }

    let end = header + len;
    if buf.len() < end + CRLF.len() {
        return Ok(None);
    }
    if &buf[end..end + CRLF.len()] != CRLF {
        return Err(ParseError::MissingCrlf);
    }

    let data = Bytes::copy_from_slice(&buf[header..end]);
    Ok(Some((RespValue::BulkString(data), end + CRLF.len())))
}

fn parse_array(buf: &[u8], depth: usize) -> ParseResult<Option<(RespValue, usize)>> {
    let Some((line, header)) = read_line(&buf[1..]) else {
        return Ok(None);
    };

    let count = match parse_number(line)? {
        -1 => return Ok(Some((RespValue::Null, 1 + header))),
        n if n < 0 => return Err(ParseError::InvalidLength(n)),
        n => n as usize,
    };

    // Cap the preallocation; the count is attacker controlled
    let mut items = Vec::with_capacity(count.min(1024));
    let mut offset = 1 + header;

    for _ in 0..count {
        match parse_value(&buf[offset..], depth + 1)? {
            Some((item, used)) => {
                items.push(item);
                offset += used;
            }
            None => return Ok(None),
        }
    }

    Ok(Some((RespValue::Array(items), offset)))
}

/// Parses a telnet-style line into an array of bulk strings.
///
/// A blank line yields an empty array.
fn parse_inline(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    let Some(newline) = buf.iter().position(|&b| b == b'\n') else {
        if buf.len() > MAX_INLINE_SIZE {
            return Err(ParseError::TooLarge {
                size: buf.len(),
                max: MAX_INLINE_SIZE,
            });
        }
        return Ok(None);
    };

    let line = buf[..newline].strip_suffix(b"\r").unwrap_or(&buf[..newline]);
    let words = split_inline(line)?;
    let items = words.into_iter().map(RespValue::BulkString).collect();

    Ok(Some((RespValue::Array(items), newline + 1)))
}

fn split_inline(line: &[u8]) -> ParseResult<Vec<Bytes>> {
    let mut words = Vec::new();
    let mut i = 0;

    loop {
        while i < line.len() && line[i].is_ascii_whitespace() {
            i += 1;
        }
        if i == line.len() {
            return Ok(words);
        }

        let mut word = Vec::new();
        match line[i] {
            b'"' => {
                i += 1;
                loop {
                    match line.get(i) {
                        None => return Err(ParseError::UnbalancedQuotes),
                        Some(b'"') => break,
                        Some(b'\\') if i + 1 < line.len() => {
                            if let Some(byte) = hex_escape(&line[i + 1..]) {
                                word.push(byte);
                                i += 4;
                                continue;
                            }
                            word.push(match line[i + 1] {
                                b'n' => b'\n',
                                b'r' => b'\r',
                                b't' => b'\t',
                                other => other,
                            });
                            i += 2;
                        }
                        Some(&b) => {
                            word.push(b);
                            i += 1;
                        }
                    }
                }
                i += 1;
                closing_quote_ends_word(line, i)?;
            }
            b'\'' => {
                i += 1;
                let len = line[i..]
                    .iter()
                    .position(|&b| b == b'\'')
                    .ok_or(ParseError::UnbalancedQuotes)?;
                word.extend_from_slice(&line[i..i + len]);
                i += len + 1;
                closing_quote_ends_word(line, i)?;
            }
            _ => {
                while i < line.len() && !line[i].is_ascii_whitespace() {
                    word.push(line[i]);
                    i += 1;
                }
            }
        }
        words.push(Bytes::from(word));
    }
}

/// `\xHH` inside double quotes.
fn hex_escape(rest: &[u8]) -> Option<u8> {
    match rest {
        [b'x', hi, lo, ..] if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
            let digits = [*hi, *lo];
            let digits = std::str::from_utf8(&digits).ok()?;
            u8::from_str_radix(digits, 16).ok()
        }
        _ => None,
    }
}

/// `"foo"bar` is malformed: a closing quote must end the word.
fn closing_quote_ends_word(line: &[u8], i: usize) -> ParseResult<()> {
    match line.get(i) {
        Some(b) if !b.is_ascii_whitespace() => Err(ParseError::UnbalancedQuotes),
        _ => Ok(()),
    }
}

/// Returns the line before the first CRLF and the bytes consumed including it.
fn read_line(buf: &[u8]) -> Option<(&[u8], usize)> {
    buf.windows(CRLF.len())
        .position(|w| w == CRLF)
        .map(|pos| (&buf[..pos], pos + CRLF.len()))
}

fn parse_number(line: &[u8]) -> ParseResult<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ParseError::InvalidInteger(String::from_utf8_lossy(line).into_owned()))
}
