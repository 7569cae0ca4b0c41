//! Incremental Request Decoder
//!
//! Decodes client commands from a byte buffer. Two forms are accepted:
//!
//! - **Multibulk**: `*<n>\r\n` followed by `n` bulk strings, which is what
//!   every client library sends.
//! - **Inline**: a single line of whitespace-separated words, which is what
//!   a person typing into `telnet` sends.
//!
//! ## How the Parser Works
//!
//! The parser reads from a buffer and returns either:
//! - `Ok(Some((request, consumed)))` - A full request, `consumed` bytes were used
//! - `Ok(None)` - Need more data, the request is incomplete
//! - `Err(ParseError)` - Invalid protocol data
//!
//! The caller appends network data to its buffer, calls [`RequestParser::parse`],
//! and advances the buffer by `consumed` on success. Nothing is consumed
//! until a whole request is available, so a partial request simply waits.

use crate::protocol::types::{prefix, Request, CRLF};
use bytes::Bytes;
use std::num::ParseIntError;
use thiserror::Error;

/// Errors that can occur while decoding a request.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// Invalid integer format
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a length line or an inline command
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Bulk string length is negative
    #[error("invalid bulk length: {0}")]
    InvalidBulkLength(i64),

    /// Multibulk length is negative or too large
    #[error("invalid multibulk length: {0}")]
    InvalidArrayLength(i64),

    /// Protocol violation (missing CRLF, etc.)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The request exceeds maximum allowed size
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of parts in one multibulk request.
pub const MAX_MULTIBULK_LEN: i64 = 1024 * 1024;

/// Maximum length of an inline command line.
pub const MAX_INLINE_SIZE: usize = 64 * 1024;

/// Decoder for client requests.
///
/// # Example
///
/// ```ignore
/// use rehashkv::protocol::RequestParser;
/// use bytes::{Buf, BytesMut};
///
/// let mut parser = RequestParser::new();
/// let mut buffer = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n"[..]);
///
/// if let Some((request, consumed)) = parser.parse(&buffer)? {
///     buffer.advance(consumed);
///     println!("Parsed: {}", request);
/// }
/// ```
#[derive(Debug, Default)]
pub struct RequestParser;

impl RequestParser {
    /// Creates a new parser instance.
    pub fn new() -> Self {
        Self
    }

    /// Attempts to decode one request from the front of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }
        if buf[0] == prefix::ARRAY {
            self.parse_multibulk(buf)
        } else {
            self.parse_inline(buf)
        }
    }

    /// Parses `*<count>\r\n` followed by `count` bulk strings.
    fn parse_multibulk(&mut self, buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
        let Some((count, mut consumed)) = parse_length_line(buf)? else {
            return Ok(None);
        };

        // a null or empty array carries no command
        if count <= 0 {
            if count < -1 {
                return Err(ParseError::InvalidArrayLength(count));
            }
            return Ok(Some((Request::default(), consumed)));
        }
        if count > MAX_MULTIBULK_LEN {
            return Err(ParseError::InvalidArrayLength(count));
        }

        let mut argv = Vec::with_capacity(count as usize);
        for _ in 0..count {
            match parse_bulk(&buf[consumed..])? {
                Some((arg, used)) => {
                    argv.push(arg);
                    consumed += used;
                }
                None => return Ok(None), // Incomplete
            }
        }

        Ok(Some((Request::new(argv), consumed)))
    }

    /// Parses a whitespace-separated command line.
    fn parse_inline(&mut self, buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
        let crlf_pos = match find_crlf(buf) {
            Some(pos) => pos,
            None if buf.len() > MAX_INLINE_SIZE => {
                return Err(ParseError::MessageTooLarge {
                    size: buf.len(),
                    max: MAX_INLINE_SIZE,
                })
            }
            None => return Ok(None),
        };

        let line = std::str::from_utf8(&buf[..crlf_pos])
            .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;

        let argv = line
            .split_whitespace()
            .map(|s| Bytes::copy_from_slice(s.as_bytes()))
            .collect();

        Ok(Some((Request::new(argv), crlf_pos + 2)))
    }
}

/// Parses a `<prefix><integer>\r\n` line, returning the integer and the
/// bytes consumed.
fn parse_length_line(buf: &[u8]) -> ParseResult<Option<(i64, usize)>> {
    let end = match find_crlf(&buf[1..]) {
        Some(pos) => pos,
        None => return Ok(None),
    };

    let s = std::str::from_utf8(&buf[1..1 + end])
        .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
    let n: i64 = s
        .parse()
        .map_err(|e: ParseIntError| ParseError::InvalidInteger(e.to_string()))?;

    // +1 for prefix, +2 for CRLF
    Ok(Some((n, 1 + end + 2)))
}

/// Parses a bulk string: `$<length>\r\n<data>\r\n`
fn parse_bulk(buf: &[u8]) -> ParseResult<Option<(Bytes, usize)>> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] != prefix::BULK_STRING {
        return Err(ParseError::ProtocolError(format!(
            "expected '$', got '{}'",
            buf[0] as char
        )));
    }

    let Some((length, data_start)) = parse_length_line(buf)? else {
        return Ok(None);
    };
    if length < 0 {
        return Err(ParseError::InvalidBulkLength(length));
    }

    let length = length as usize;
    if length > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let total_needed = data_start + length + 2; // data + CRLF
    if buf.len() < total_needed {
        return Ok(None); // Incomplete
    }
    if &buf[data_start + length..total_needed] != CRLF {
        return Err(ParseError::ProtocolError(
            "bulk string missing trailing CRLF".to_string(),
        ));
    }

    let data = Bytes::copy_from_slice(&buf[data_start..data_start + length]);
    Ok(Some((data, total_needed)))
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Decodes a single request from bytes.
pub fn parse_request(buf: &[u8]) -> ParseResult<Option<(Request, usize)>> {
    RequestParser::new().parse(buf)
}
