//! Command Layer
//!
//! Every request is resolved to a [`Command`] by a static, case-insensitive
//! name lookup. A name that is not in the table resolves to
//! [`Command::Unknown`], whose handler answers with the unknown-command
//! error, so dispatch itself never fails.
//!
//! ## Flow
//!
//! ```text
//!   Request ──► Command::lookup(name) ──► arity check ──► Command::apply
//!                      │                                       │
//!                      └── Unknown ──► "ERR unknown command"    ▼
//!                                                      Server (db, dirty)
//! ```
//!
//! ## Supported Commands
//!
//! ### Strings
//! - `GET key`
//! - `SET key value [EX seconds | PX milliseconds] [NX | XX]`
//!
//! ### Lists
//! - `LPUSH key value [value ...]` / `RPUSH key value [value ...]`
//! - `LPOP key` / `RPOP key`
//! - `LRANGE key start stop`
//! - `LLEN key`
//!
//! ### Keys
//! - `DEL key [key ...]`, `EXISTS key [key ...]`, `TYPE key`
//! - `EXPIRE`, `PEXPIRE`, `EXPIREAT`, `PEXPIREAT`, `PERSIST`
//! - `TTL key` / `PTTL key`
//!
//! ### Server
//! - `PING [message]`, `ECHO message`
//! - `DBSIZE`, `FLUSHDB`, `INFO [section]`
//! - `QUIT` (answered by the connection itself)

pub mod handler;

/// The closed set of commands the server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Ping,
    Echo,
    Get,
    Set,
    Del,
    Exists,
    Type,
    Ttl,
    Pttl,
    Expire,
    Pexpire,
    Expireat,
    Pexpireat,
    Persist,
    Lpush,
    Rpush,
    Lpop,
    Rpop,
    Lrange,
    Llen,
    Dbsize,
    Flushdb,
    Info,
    Quit,
    Unknown,
}

/// Flag bits of a command table entry.
mod flags {
    /// Mutates the keyspace.
    pub const WRITE: u8 = 1 << 0;
    /// May grow memory, so it is refused when memory cannot be freed.
    pub const DENYOOM: u8 = 1 << 1;
}

/// Static description of a command.
#[derive(Debug)]
pub struct CommandSpec {
    /// Lowercase name, as used in error messages.
    pub name: &'static str,
    /// Positive: exact argument count including the name.
    /// Negative: at least `-arity` arguments.
    pub arity: i32,
    flags: u8,
}

const fn entry(name: &'static str, arity: i32, flags: u8) -> CommandSpec {
    CommandSpec { name, arity, flags }
}

static COMMAND_TABLE: &[(Command, CommandSpec)] = &[
    (Command::Ping, entry("ping", -1, 0)),
    (Command::Echo, entry("echo", 2, 0)),
    (Command::Get, entry("get", 2, 0)),
    (Command::Set, entry("set", -3, flags::WRITE | flags::DENYOOM)),
    (Command::Del, entry("del", -2, flags::WRITE)),
    (Command::Exists, entry("exists", -2, 0)),
    (Command::Type, entry("type", 2, 0)),
    (Command::Ttl, entry("ttl", 2, 0)),
    (Command::Pttl, entry("pttl", 2, 0)),
    (Command::Expire, entry("expire", 3, flags::WRITE)),
    (Command::Pexpire, entry("pexpire", 3, flags::WRITE)),
    (Command::Expireat, entry("expireat", 3, flags::WRITE)),
    (Command::Pexpireat, entry("pexpireat", 3, flags::WRITE)),
    (Command::Persist, entry("persist", 2, flags::WRITE)),
    (Command::Lpush, entry("lpush", -3, flags::WRITE | flags::DENYOOM)),
    (Command::Rpush, entry("rpush", -3, flags::WRITE | flags::DENYOOM)),
    (Command::Lpop, entry("lpop", 2, flags::WRITE)),
    (Command::Rpop, entry("rpop", 2, flags::WRITE)),
    (Command::Lrange, entry("lrange", 4, 0)),
    (Command::Llen, entry("llen", 2, 0)),
    (Command::Dbsize, entry("dbsize", 1, 0)),
    (Command::Flushdb, entry("flushdb", 1, flags::WRITE)),
    (Command::Info, entry("info", -1, 0)),
    (Command::Quit, entry("quit", 1, 0)),
];

static UNKNOWN: CommandSpec = entry("unknown", -1, 0);

impl Command {
    /// Resolves a command name, ignoring ASCII case.
    pub fn lookup(name: &[u8]) -> Command {
        COMMAND_TABLE
            .iter()
            .find(|(_, spec)| spec.name.as_bytes().eq_ignore_ascii_case(name))
            .map(|(cmd, _)| *cmd)
            .unwrap_or(Command::Unknown)
    }

    pub fn spec(self) -> &'static CommandSpec {
        COMMAND_TABLE
            .iter()
            .find(|(cmd, _)| *cmd == self)
            .map(|(_, spec)| spec)
            .unwrap_or(&UNKNOWN)
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }

    /// Whether `argc` (including the command name) satisfies the arity.
    pub fn arity_ok(self, argc: usize) -> bool {
        let arity = self.spec().arity;
        if arity >= 0 {
            argc == arity as usize
        } else {
            argc >= arity.unsigned_abs() as usize
        }
    }

    pub fn is_write(self) -> bool {
        self.spec().flags & flags::WRITE != 0
    }

    /// Whether the command must run the eviction check before executing.
    pub fn denies_oom(self) -> bool {
        self.spec().flags & flags::DENYOOM != 0
    }
}
