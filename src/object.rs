//! Object Envelope
//!
//! Every value in the keyspace is wrapped in an [`Object`]: the payload plus
//! the bookkeeping the server needs regardless of type.
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │ Object                                     │
//! │   payload    Raw(bytes) | Int(i64) | List  │
//! │   lru        last access, UNIX ms          │
//! │   ref_count  writes to the same key        │
//! └────────────────────────────────────────────┘
//! ```
//!
//! The logical type (`String` or `List`) and the physical encoding are both
//! derived from the payload variant, so they can never disagree.

use crate::error::{KeyspaceError, KeyspaceResult};
use crate::time::now_ms;
use bytes::Bytes;
use std::collections::VecDeque;
use std::fmt;

/// Fixed bookkeeping cost charged per object.
const OBJECT_OVERHEAD: usize = 32;

/// Cost charged per list element on top of its bytes.
const LIST_NODE_OVERHEAD: usize = 24;

/// Longest decimal representation of an `i64`.
const MAX_INT_LEN: usize = 20;

/// Logical type of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjType {
    String,
    List,
}

impl ObjType {
    /// Name reported by the `TYPE` command.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjType::String => "string",
            ObjType::List => "list",
        }
    }
}

impl fmt::Display for ObjType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical representation of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Arbitrary bytes.
    Raw,
    /// A string holding a canonical 64-bit integer.
    Int,
    /// A double-ended list of byte strings.
    LinkedList,
}

/// The value a key maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Raw(Bytes),
    Int(i64),
    List(VecDeque<Bytes>),
}

/// A stored value with its access metadata.
#[derive(Debug, Clone)]
pub struct Object {
    payload: Payload,
    lru: i64,
    ref_count: u32,
}

impl Object {
    fn new(payload: Payload) -> Self {
        Self {
            payload,
            lru: now_ms(),
            ref_count: 1,
        }
    }

    /// Creates a string object, using the integer encoding when `value` is
    /// the canonical form of an `i64`.
    pub fn string(value: impl Into<Bytes>) -> Self {
        let value = value.into();
        match parse_canonical_int(&value) {
            Some(n) => Self::new(Payload::Int(n)),
            None => Self::new(Payload::Raw(value)),
        }
    }

    /// Creates an empty list object.
    pub fn list() -> Self {
        Self::new(Payload::List(VecDeque::new()))
    }

    pub fn obj_type(&self) -> ObjType {
        match self.payload {
            Payload::Raw(_) | Payload::Int(_) => ObjType::String,
            Payload::List(_) => ObjType::List,
        }
    }

    pub fn encoding(&self) -> Encoding {
        match self.payload {
            Payload::Raw(_) => Encoding::Raw,
            Payload::Int(_) => Encoding::Int,
            Payload::List(_) => Encoding::LinkedList,
        }
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Last access time in UNIX milliseconds.
    pub fn lru(&self) -> i64 {
        self.lru
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    /// Marks the object as accessed now.
    #[inline]
    pub fn touch(&mut self) {
        self.lru = now_ms();
    }

    /// Milliseconds since the last access, as of `now`.
    #[inline]
    pub fn idle_ms(&self, now: i64) -> i64 {
        (now - self.lru).max(0)
    }

    /// Replaces the payload of an existing object in place. The access time
    /// is kept and the reference count records the extra write.
    pub(crate) fn overwrite(&mut self, other: Object) {
        self.payload = other.payload;
        self.ref_count = self.ref_count.saturating_add(1);
    }

    /// The string value as bytes.
    pub fn as_bytes(&self) -> KeyspaceResult<Bytes> {
        match &self.payload {
            Payload::Raw(b) => Ok(b.clone()),
            Payload::Int(n) => Ok(Bytes::from(n.to_string())),
            Payload::List(_) => Err(KeyspaceError::WrongType),
        }
    }

    pub fn as_list(&self) -> KeyspaceResult<&VecDeque<Bytes>> {
        match &self.payload {
            Payload::List(list) => Ok(list),
            _ => Err(KeyspaceError::WrongType),
        }
    }

    pub fn as_list_mut(&mut self) -> KeyspaceResult<&mut VecDeque<Bytes>> {
        match &mut self.payload {
            Payload::List(list) => Ok(list),
            _ => Err(KeyspaceError::WrongType),
        }
    }

    /// Approximate number of bytes this object occupies.
    pub fn memory_usage(&self) -> usize {
        let payload = match &self.payload {
            Payload::Raw(b) => b.len(),
            Payload::Int(_) => 0,
            Payload::List(list) => list.iter().map(|b| b.len() + LIST_NODE_OVERHEAD).sum(),
        };
        OBJECT_OVERHEAD + payload
    }
}

/// Parses `bytes` as an `i64` only if formatting the result gives back the
/// same bytes, so `"007"`, `"+1"` and `"-0"` stay raw strings.
fn parse_canonical_int(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() || bytes.len() > MAX_INT_LEN {
        return None;
    }
    let s = std::str::from_utf8(bytes).ok()?;
    let n: i64 = s.parse().ok()?;
    (n.to_string() == s).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_encoding() {
        let obj = Object::string("12345");
        assert_eq!(obj.encoding(), Encoding::Int);
        assert_eq!(obj.obj_type(), ObjType::String);
        assert_eq!(obj.as_bytes(), Ok(Bytes::from("12345")));

        let neg = Object::string("-9223372036854775808");
        assert_eq!(neg.encoding(), Encoding::Int);
    }

    #[test]
    fn test_non_canonical_numbers_stay_raw() {
        for value in ["007", "+1", "-0", "1.5", " 1", "", "9223372036854775808"] {
            let obj = Object::string(value);
            assert_eq!(obj.encoding(), Encoding::Raw, "value {:?}", value);
            assert_eq!(obj.as_bytes(), Ok(Bytes::from(value)));
        }
    }

    #[test]
    fn test_wrong_type_access() {
        let mut list = Object::list();
        assert_eq!(list.as_bytes(), Err(KeyspaceError::WrongType));
        assert!(list.as_list_mut().is_ok());

        let mut string = Object::string("hello");
        assert_eq!(string.as_list().err(), Some(KeyspaceError::WrongType));
        assert_eq!(string.as_list_mut().err(), Some(KeyspaceError::WrongType));
    }

    #[test]
    fn test_overwrite_keeps_lru_and_counts_writes() {
        let mut obj = Object::string("1");
        obj.lru = 42;
        obj.overwrite(Object::string("2"));

        assert_eq!(obj.lru(), 42);
        assert_eq!(obj.ref_count(), 2);
        assert_eq!(obj.as_bytes(), Ok(Bytes::from("2")));
    }

    #[test]
    fn test_memory_usage_grows_with_payload() {
        let small = Object::string("a");
        let large = Object::string("a".repeat(1000));
        assert!(large.memory_usage() > small.memory_usage() + 900);

        let mut list = Object::list();
        let empty = list.memory_usage();
        list.as_list_mut().unwrap().push_back(Bytes::from("xyz"));
        assert_eq!(list.memory_usage(), empty + 3 + LIST_NODE_OVERHEAD);
    }

    #[test]
    fn test_idle_time() {
        let mut obj = Object::string("v");
        obj.lru = 1_000;
        assert_eq!(obj.idle_ms(1_500), 500);
        assert_eq!(obj.idle_ms(500), 0);
    }
}
