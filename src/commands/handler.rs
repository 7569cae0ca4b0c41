//! Command Handlers
//!
//! One `cmd_*` function per command. Each takes the server context and the
//! request, and returns either a reply or a [`CommandError`] that
//! [`Command::apply`] turns into an error reply.
//!
//! Handlers that change the keyspace add to `server.dirty`; the server
//! uses that to decide whether the request goes to the append-only file.
//! Arity has been checked by [`Command::check`] before a handler runs, so
//! handlers index their fixed arguments directly.

use super::Command;
use crate::error::{CommandError, CommandResult, KeyspaceError};
use crate::keyspace::ListEnd;
use crate::protocol::{Reply, Request};
use crate::server::Server;
use crate::time::now_ms;
use bytes::Bytes;

impl Command {
    /// Rejects unknown commands and wrong argument counts.
    pub fn check(self, req: &Request) -> CommandResult<()> {
        if self == Command::Unknown {
            return Err(CommandError::UnknownCommand(
                String::from_utf8_lossy(req.name()).into_owned(),
            ));
        }
        if !self.arity_ok(req.arg_count()) {
            return Err(CommandError::WrongArity(self.name()));
        }
        Ok(())
    }

    /// Runs the command against `server`.
    pub fn apply(self, server: &mut Server, req: &Request) -> Reply {
        let result = match self {
            Command::Ping => cmd_ping(req),
            Command::Echo => Ok(Reply::Bulk(arg(req, 1))),
            Command::Get => cmd_get(server, req),
            Command::Set => cmd_set(server, req),
            Command::Del => cmd_del(server, req),
            Command::Exists => cmd_exists(server, req),
            Command::Type => cmd_type(server, req),
            Command::Ttl => cmd_ttl(server, req, false),
            Command::Pttl => cmd_ttl(server, req, true),
            Command::Expire | Command::Pexpire | Command::Expireat | Command::Pexpireat => {
                cmd_expire(server, req, self)
            }
            Command::Persist => cmd_persist(server, req),
            Command::Lpush => cmd_push(server, req, ListEnd::Front),
            Command::Rpush => cmd_push(server, req, ListEnd::Back),
            Command::Lpop => cmd_pop(server, req, ListEnd::Front),
            Command::Rpop => cmd_pop(server, req, ListEnd::Back),
            Command::Lrange => cmd_lrange(server, req),
            Command::Llen => cmd_llen(server, req),
            Command::Dbsize => Ok(Reply::count(server.db.len())),
            Command::Flushdb => cmd_flushdb(server),
            Command::Info => Ok(Reply::bulk(server.info(req.arg_str(1)))),
            Command::Quit => Ok(Reply::ok()),
            Command::Unknown => self.check(req).map(|_| Reply::Nil),
        };
        result.unwrap_or_else(|e| Reply::error(e.to_string()))
    }
}

// ============================================================================
// Argument helpers
// ============================================================================

/// The argument at `index`. Callers only ask for indices within the arity.
fn arg(req: &Request, index: usize) -> Bytes {
    req.arg(index).cloned().unwrap_or_default()
}

fn key(req: &Request, index: usize) -> CommandResult<&str> {
    req.arg_str(index).ok_or(CommandError::InvalidKey)
}

fn int_arg(req: &Request, index: usize) -> CommandResult<i64> {
    req.arg_str(index)
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::Keyspace(KeyspaceError::NotInteger))
}

// ============================================================================
// Server commands
// ============================================================================

/// PING [message]
fn cmd_ping(req: &Request) -> CommandResult<Reply> {
    match req.arg_count() {
        1 => Ok(Reply::pong()),
        2 => Ok(Reply::Bulk(arg(req, 1))),
        _ => Err(CommandError::WrongArity(Command::Ping.name())),
    }
}

/// FLUSHDB
fn cmd_flushdb(server: &mut Server) -> CommandResult<Reply> {
    let removed = server.db.flush();
    server.dirty += removed as u64 + 1;
    Ok(Reply::ok())
}

// ============================================================================
// String commands
// ============================================================================

/// GET key
fn cmd_get(server: &mut Server, req: &Request) -> CommandResult<Reply> {
    match server.db.get_string(key(req, 1)?)? {
        Some(value) => {
            server.stats.keyspace_hits += 1;
            Ok(Reply::Bulk(value))
        }
        None => {
            server.stats.keyspace_misses += 1;
            Ok(Reply::Nil)
        }
    }
}

/// SET key value [EX seconds | PX milliseconds] [NX | XX]
fn cmd_set(server: &mut Server, req: &Request) -> CommandResult<Reply> {
    let key = key(req, 1)?;
    let value = arg(req, 2);

    let mut ttl_ms: Option<i64> = None;
    let mut nx = false;
    let mut xx = false;

    let mut i = 3;
    while i < req.arg_count() {
        let opt = arg(req, i).to_ascii_uppercase();
        let has_next = i + 1 < req.arg_count();
        match opt.as_slice() {
            b"NX" if !xx => nx = true,
            b"XX" if !nx => xx = true,
            b"EX" | b"PX" if ttl_ms.is_none() && has_next => {
                let n = int_arg(req, i + 1)?;
                let ms = if opt.as_slice() == b"EX" {
                    n.checked_mul(1000)
                } else {
                    Some(n)
                };
                match ms {
                    Some(ms) if ms > 0 => ttl_ms = Some(ms),
                    _ => return Err(CommandError::InvalidExpireTime(Command::Set.name())),
                }
                i += 1;
            }
            _ => return Err(CommandError::Syntax),
        }
        i += 1;
    }

    let exists = server.db.exists(key);
    if (nx && exists) || (xx && !exists) {
        return Ok(Reply::Nil);
    }

    server.db.set_string(key, value);
    if let Some(ms) = ttl_ms {
        server.db.set_expire(key, now_ms().saturating_add(ms));
    }
    server.dirty += 1;
    Ok(Reply::ok())
}

// ============================================================================
// Key commands
// ============================================================================

/// DEL key [key ...]
fn cmd_del(server: &mut Server, req: &Request) -> CommandResult<Reply> {
    let mut deleted = 0;
    for i in 1..req.arg_count() {
        let key = key(req, i)?;
        if server.db.exists(key) && server.db.delete_key(key) {
            deleted += 1;
        }
    }
    server.dirty += deleted as u64;
    Ok(Reply::count(deleted))
}

/// EXISTS key [key ...]
fn cmd_exists(server: &mut Server, req: &Request) -> CommandResult<Reply> {
    let mut count = 0;
    for i in 1..req.arg_count() {
        if server.db.exists(key(req, i)?) {
            count += 1;
        }
    }
    Ok(Reply::count(count))
}

/// TYPE key
fn cmd_type(server: &mut Server, req: &Request) -> CommandResult<Reply> {
    let name = server.db.key_type(key(req, 1)?);
    Ok(Reply::Status(name.to_string()))
}

/// TTL key / PTTL key
fn cmd_ttl(server: &mut Server, req: &Request, millis: bool) -> CommandResult<Reply> {
    let key = key(req, 1)?;
    let ttl = if millis {
        server.db.ttl_ms(key)
    } else {
        server.db.ttl_seconds(key)
    };
    Ok(Reply::Integer(ttl))
}

/// EXPIRE key seconds / PEXPIRE key ms / EXPIREAT key unix-s / PEXPIREAT key unix-ms
///
/// A time already in the past deletes the key, except while loading, where
/// the logged time is installed as-is and the key expires on first access.
fn cmd_expire(server: &mut Server, req: &Request, cmd: Command) -> CommandResult<Reply> {
    let key = key(req, 1)?;
    let n = int_arg(req, 2)?;
    let now = now_ms();

    let when = match cmd {
        Command::Expire => n.checked_mul(1000).and_then(|ms| ms.checked_add(now)),
        Command::Pexpire => n.checked_add(now),
        Command::Expireat => n.checked_mul(1000),
        _ => Some(n),
    }
    .ok_or(CommandError::InvalidExpireTime(cmd.name()))?;

    if !server.db.exists(key) {
        return Ok(Reply::Integer(0));
    }
    if when <= now && !server.db.is_loading() {
        server.db.delete_key(key);
    } else {
        server.db.set_expire(key, when);
    }
    server.dirty += 1;
    Ok(Reply::Integer(1))
}

/// PERSIST key
fn cmd_persist(server: &mut Server, req: &Request) -> CommandResult<Reply> {
    if server.db.persist(key(req, 1)?) {
        server.dirty += 1;
        Ok(Reply::Integer(1))
    } else {
        Ok(Reply::Integer(0))
    }
}

// ============================================================================
// List commands
// ============================================================================

/// LPUSH key value [value ...] / RPUSH key value [value ...]
fn cmd_push(server: &mut Server, req: &Request, end: ListEnd) -> CommandResult<Reply> {
    let key = key(req, 1)?;
    let values = req.argv()[2..].to_vec();
    let pushed = values.len();

    let len = server.db.list_push(key, values, end)?;
    server.dirty += pushed as u64;
    Ok(Reply::count(len))
}

/// LPOP key / RPOP key
fn cmd_pop(server: &mut Server, req: &Request, end: ListEnd) -> CommandResult<Reply> {
    match server.db.list_pop(key(req, 1)?, end)? {
        Some(value) => {
            server.dirty += 1;
            Ok(Reply::Bulk(value))
        }
        None => Ok(Reply::Nil),
    }
}

/// LRANGE key start stop
fn cmd_lrange(server: &mut Server, req: &Request) -> CommandResult<Reply> {
    let key = key(req, 1)?;
    let start = int_arg(req, 2)?;
    let stop = int_arg(req, 3)?;
    Ok(Reply::Bulks(server.db.list_range(key, start, stop)?))
}

/// LLEN key
fn cmd_llen(server: &mut Server, req: &Request) -> CommandResult<Reply> {
    Ok(Reply::count(server.db.list_len(key(req, 1)?)?))
}
