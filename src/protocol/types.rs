//! Requests and Replies
//!
//! Clients send commands as RESP arrays of bulk strings. The server answers
//! with one of a small set of reply primitives.
//!
//! ## Protocol Format
//!
//! Each reply starts with a type prefix byte:
//! - `+` Status
//! - `-` Error
//! - `:` Integer
//! - `$` Bulk string (`$-1` is nil)
//! - `*` Array of bulk strings
//!
//! All lines are terminated with CRLF (`\r\n`).
//!
//! ## Examples
//!
//! Request: `*2\r\n$3\r\nGET\r\n$4\r\nname\r\n`
//! Status: `+OK\r\n`
//! Error: `-ERR unknown command 'FOO'\r\n`
//! Integer: `:1000\r\n`
//! Bulk: `$5\r\nhello\r\n`
//! Nil: `$-1\r\n`

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const STATUS: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A decoded client command: the name followed by its arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    argv: Vec<Bytes>,
}

impl Request {
    pub fn new(argv: Vec<Bytes>) -> Self {
        Self { argv }
    }

    /// Builds a request from string parts, e.g. `["SET", "k", "v"]`.
    pub fn from_strs<S: AsRef<str>>(parts: &[S]) -> Self {
        Self::new(
            parts
                .iter()
                .map(|p| Bytes::copy_from_slice(p.as_ref().as_bytes()))
                .collect(),
        )
    }

    /// True for a blank inline line or a zero-length array.
    pub fn is_empty(&self) -> bool {
        self.argv.is_empty()
    }

    /// The command name as sent, in its original case.
    pub fn name(&self) -> &[u8] {
        self.argv.first().map(|b| &b[..]).unwrap_or_default()
    }

    /// Number of parts including the command name.
    pub fn arg_count(&self) -> usize {
        self.argv.len()
    }

    /// The part at `index`; index 0 is the command name.
    pub fn arg(&self, index: usize) -> Option<&Bytes> {
        self.argv.get(index)
    }

    /// The part at `index` as UTF-8, if present and valid.
    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.arg(index).and_then(|b| std::str::from_utf8(b).ok())
    }

    /// All parts, name first.
    pub fn argv(&self) -> &[Bytes] {
        &self.argv
    }

    /// Encodes the request as a RESP array of bulk strings.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(prefix::ARRAY);
        buf.extend_from_slice(self.argv.len().to_string().as_bytes());
        buf.extend_from_slice(CRLF);
        for arg in &self.argv {
            write_bulk(buf, arg);
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.argv.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", String::from_utf8_lossy(arg))?;
        }
        Ok(())
    }
}

/// A reply to a client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Missing value.
    /// Format: `$-1\r\n`
    Nil,

    /// Short non-binary status line.
    /// Format: `+<string>\r\n`
    Status(String),

    /// Binary-safe string.
    /// Format: `$<length>\r\n<data>\r\n`
    Bulk(Bytes),

    /// 64-bit signed integer.
    /// Format: `:<integer>\r\n`
    Integer(i64),

    /// Sequence of bulk strings.
    /// Format: `*<count>\r\n<bulk1><bulk2>...`
    Bulks(Vec<Bytes>),

    /// Error line.
    /// Format: `-<message>\r\n`
    Error(String),
}

impl Reply {
    /// Common response for successful operations
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    pub fn pong() -> Self {
        Reply::Status("PONG".to_string())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error(message.into())
    }

    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(data.into())
    }

    /// A count or size as an integer reply.
    pub fn count(n: usize) -> Self {
        Reply::Integer(n as i64)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Serializes the reply to bytes for sending over the wire.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the reply into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Nil => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(b"-1");
                buf.extend_from_slice(CRLF);
            }
            Reply::Status(s) => {
                buf.push(prefix::STATUS);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Bulk(data) => write_bulk(buf, data),
            Reply::Integer(n) => {
                buf.push(prefix::INTEGER);
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Bulks(items) => {
                buf.push(prefix::ARRAY);
                buf.extend_from_slice(items.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for item in items {
                    write_bulk(buf, item);
                }
            }
            Reply::Error(s) => {
                buf.push(prefix::ERROR);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Nil => write!(f, "(nil)"),
            Reply::Status(s) => write!(f, "{}", s),
            Reply::Bulk(data) => write!(f, "\"{}\"", String::from_utf8_lossy(data)),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::Bulks(items) if items.is_empty() => write!(f, "(empty array)"),
            Reply::Bulks(items) => {
                for (i, item) in items.iter().enumerate() {
                    writeln!(f, "{}) \"{}\"", i + 1, String::from_utf8_lossy(item))?;
                }
                Ok(())
            }
            Reply::Error(s) => write!(f, "(error) {}", s),
        }
    }
}

fn write_bulk(buf: &mut Vec<u8>, data: &[u8]) {
    buf.push(prefix::BULK_STRING);
    buf.extend_from_slice(data.len().to_string().as_bytes());
    buf.extend_from_slice(CRLF);
    buf.extend_from_slice(data);
    buf.extend_from_slice(CRLF);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_error_serialize() {
        assert_eq!(Reply::ok().serialize(), b"+OK\r\n");
        assert_eq!(Reply::pong().serialize(), b"+PONG\r\n");
        assert_eq!(
            Reply::error("ERR unknown command").serialize(),
            b"-ERR unknown command\r\n"
        );
    }

    #[test]
    fn test_integer_serialize() {
        assert_eq!(Reply::Integer(1000).serialize(), b":1000\r\n");
        assert_eq!(Reply::Integer(-2).serialize(), b":-2\r\n");
    }

    #[test]
    fn test_bulk_and_nil_serialize() {
        assert_eq!(Reply::bulk("hello").serialize(), b"$5\r\nhello\r\n");
        assert_eq!(Reply::bulk("").serialize(), b"$0\r\n\r\n");
        assert_eq!(Reply::Nil.serialize(), b"$-1\r\n");
    }

    #[test]
    fn test_bulks_serialize() {
        let reply = Reply::Bulks(vec![Bytes::from("a"), Bytes::from("bc")]);
        assert_eq!(reply.serialize(), b"*2\r\n$1\r\na\r\n$2\r\nbc\r\n");
        assert_eq!(Reply::Bulks(vec![]).serialize(), b"*0\r\n");
    }

    #[test]
    fn test_request_accessors() {
        let req = Request::from_strs(&["set", "key", "value"]);
        assert_eq!(req.name(), b"set");
        assert_eq!(req.arg_count(), 3);
        assert_eq!(req.arg_str(1), Some("key"));
        assert_eq!(req.arg(3), None);
        assert_eq!(req.to_string(), "set key value");
        assert!(Request::default().is_empty());
        assert_eq!(Request::default().name(), b"");
    }

    #[test]
    fn test_request_encode() {
        let mut buf = Vec::new();
        Request::from_strs(&["GET", "name"]).encode_into(&mut buf);
        assert_eq!(buf, b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n");
    }
}
