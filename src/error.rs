//! Errors surfaced to clients by keyspace operations.

use thiserror::Error;

/// Failures of a keyspace operation that are reported back to the client
/// as an error reply. None of them are fatal to the server.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyspaceError {
    /// The key holds a value of a different type.
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    /// An argument or a stored value is not a 64-bit integer.
    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    /// Memory is over budget and nothing may be evicted.
    #[error("OOM command not allowed when used memory > 'maxmemory'")]
    OutOfMemory,
}

/// Result type for keyspace operations.
pub type KeyspaceResult<T> = Result<T, KeyspaceError>;

/// Failures of a single command. Each one becomes an error reply.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpireTime(&'static str),

    /// Keys are stored as UTF-8 strings.
    #[error("ERR invalid key")]
    InvalidKey,

    #[error(transparent)]
    Keyspace(#[from] KeyspaceError),
}

/// Result type of command handlers.
pub type CommandResult<T> = Result<T, CommandError>;
