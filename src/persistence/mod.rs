//! Persistence
//!
//! The server is durable through an append-only log of the commands that
//! changed the keyspace. See [`aof`] for the file format and the fsync
//! policies.

pub mod aof;

pub use aof::{AofError, AppendOnlyFile};
