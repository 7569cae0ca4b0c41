//! RESP Protocol Implementation
//!
//! The server speaks the Redis Serialization Protocol (RESP): requests come
//! in as arrays of bulk strings (or inline lines) and every command answers
//! with one reply.
//!
//! ## Modules
//!
//! - `types`: [`Request`] and [`Reply`] plus the reply encoder
//! - `parser`: incremental request decoder
//!
//! ## Example
//!
//! ```ignore
//! use rehashkv::protocol::{parse_request, Reply};
//!
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (request, consumed) = parse_request(data).unwrap().unwrap();
//!
//! let bytes = Reply::bulk("value").serialize();
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{parse_request, ParseError, ParseResult, RequestParser};
pub use types::{Reply, Request};
