//! Server Context
//!
//! A [`Server`] owns all mutable server state: the keyspace, the evictor,
//! the append-only file and the counters reported by `INFO`. It is owned
//! by the [`EventLoop`], which applies requests and runs maintenance
//! strictly one after the other, so nothing in here needs a lock.
//!
//! ## Maintenance Order
//!
//! [`Server::cron`] runs after every batch of requests:
//!
//! ```text
//! 1. eviction check       (only if something was written)
//! 2. active expiration
//! 3. shrink sparse tables
//! 4. incremental rehash   (REHASH_CRON_BUDGET)
//! 5. append-only flush
//! ```

mod event_loop;

pub use event_loop::{Envelope, EventLoop, LoopClosed, ServerHandle};

use crate::commands::Command;
use crate::config::Config;
use crate::connection::ConnectionStats;
use crate::error::KeyspaceResult;
use crate::eviction::{EvictionConfig, Evictor};
use crate::keyspace::Database;
use crate::persistence::{AofError, AppendOnlyFile};
use crate::protocol::{Reply, Request};
use bytes::Bytes;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Wall-clock budget of the incremental rehash step of one cron.
pub const REHASH_CRON_BUDGET: Duration = Duration::from_millis(1);

/// Counters maintained by the command path.
#[derive(Debug, Default, Clone, Copy)]
pub struct ServerStats {
    pub commands_processed: u64,
    pub keyspace_hits: u64,
    pub keyspace_misses: u64,
    /// Writes refused because memory could not be freed.
    pub rejected_writes: u64,
}

/// All server state, owned by the event loop.
#[derive(Debug)]
pub struct Server {
    pub(crate) db: Database,
    pub(crate) evictor: Evictor,
    pub(crate) aof: Option<AppendOnlyFile>,
    /// Keyspace changes since startup (or since the log was loaded).
    pub(crate) dirty: u64,
    pub(crate) stats: ServerStats,
    connections: Arc<ConnectionStats>,
    port: u16,
    started: Instant,
    wrote_since_cron: bool,
}

impl Server {
    /// Creates a server with an empty keyspace and no append-only file.
    pub fn new(config: &Config) -> Self {
        Self {
            db: Database::new(config.keyspace()),
            evictor: Evictor::new(EvictionConfig::from(config)),
            aof: None,
            dirty: 0,
            stats: ServerStats::default(),
            connections: Arc::new(ConnectionStats::new()),
            port: config.port,
            started: Instant::now(),
            wrote_since_cron: false,
        }
    }

    /// Creates a server and, with `--appendonly`, replays the log and opens
    /// it for appending.
    pub fn open(config: &Config) -> Result<Self, AofError> {
        let mut server = Server::new(config);
        if config.appendonly {
            let start = Instant::now();
            let loaded = server.load_aof(&config.appendfilename)?;
            info!(
                commands = loaded,
                keys = server.db.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "loaded append-only file"
            );
            server.aof = Some(AppendOnlyFile::open(
                &config.appendfilename,
                config.appendfsync,
            )?);
        }
        Ok(server)
    }

    /// Shares connection counters with the accept loop, for `INFO`.
    pub fn with_connection_stats(mut self, stats: Arc<ConnectionStats>) -> Self {
        self.connections = stats;
        self
    }

    /// Replays the log at `path` through the command path in loading mode.
    pub fn load_aof(&mut self, path: &Path) -> Result<usize, AofError> {
        self.db.set_loading(true);
        let result = AppendOnlyFile::load(path, |req| {
            if let Reply::Error(msg) = self.execute(&req) {
                warn!(command = %req, error = %msg, "replayed command failed");
            }
        });
        self.db.set_loading(false);
        self.dirty = 0;
        result
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn database_mut(&mut self) -> &mut Database {
        &mut self.db
    }

    pub fn evictor(&self) -> &Evictor {
        &self.evictor
    }

    pub fn dirty(&self) -> u64 {
        self.dirty
    }

    pub fn stats(&self) -> ServerStats {
        self.stats
    }

    /// Applies one request to the keyspace and returns its reply.
    ///
    /// Commands that may grow memory run the eviction check first and are
    /// refused when it fails. A command that changed the keyspace is fed
    /// to the append-only file, unless it is being replayed from it.
    pub fn execute(&mut self, req: &Request) -> Reply {
        let cmd = Command::lookup(req.name());
        if let Err(e) = cmd.check(req) {
            return Reply::error(e.to_string());
        }
        self.stats.commands_processed += 1;

        let loading = self.db.is_loading();
        if cmd.denies_oom() && !loading {
            if let Err(e) = self.free_memory() {
                self.stats.rejected_writes += 1;
                return Reply::error(e.to_string());
            }
        }

        let dirty_before = self.dirty;
        let reply = cmd.apply(self, req);
        if cmd.is_write() && self.dirty > dirty_before {
            self.wrote_since_cron = true;
            if !loading {
                if let Some(aof) = self.aof.as_mut() {
                    aof.feed(req);
                }
            }
        }
        reply
    }

    /// Runs the eviction check. Each evicted key is logged as a `DEL` so a
    /// replay does not bring it back.
    fn free_memory(&mut self) -> KeyspaceResult<usize> {
        let aof = &mut self.aof;
        let dirty = &mut self.dirty;
        self.evictor.free_memory_with(&mut self.db, |key| {
            *dirty += 1;
            if let Some(aof) = aof.as_mut() {
                aof.feed(&Request::new(vec![
                    Bytes::from_static(b"DEL"),
                    Bytes::copy_from_slice(key.as_bytes()),
                ]));
            }
        })
    }

    /// One round of maintenance. Fails only when the append-only file
    /// cannot be written, which the caller must treat as fatal.
    pub async fn cron(&mut self) -> Result<(), AofError> {
        if std::mem::take(&mut self.wrote_since_cron) {
            if let Err(e) = self.free_memory() {
                debug!(error = %e, used = self.db.used_memory(), "memory over budget");
            }
        }
        self.db.active_expire_cycle();
        self.db.resize_if_needed();
        self.db.rehash_step(REHASH_CRON_BUDGET);

        if let Some(aof) = self.aof.as_mut() {
            aof.flush(false).await?;
        }
        Ok(())
    }

    /// Writes and syncs the append-only file before exit.
    pub async fn shutdown(&mut self) -> Result<(), AofError> {
        match self.aof.as_mut() {
            Some(aof) => aof.shutdown().await,
            None => Ok(()),
        }
    }

    /// Text of the `INFO` reply. `section` selects one section by name;
    /// `None`, `all` and `default` select every section.
    pub fn info(&self, section: Option<&str>) -> String {
        let keyspace = self.db.stats();
        let sections = [
            (
                "server",
                format!(
                    "# Server\r\n\
                     rehashkv_version:{}\r\n\
                     os:{}\r\n\
                     tcp_port:{}\r\n\
                     uptime_in_seconds:{}\r\n",
                    env!("CARGO_PKG_VERSION"),
                    std::env::consts::OS,
                    self.port,
                    self.started.elapsed().as_secs(),
                ),
            ),
            (
                "clients",
                format!(
                    "# Clients\r\n\
                     connected_clients:{}\r\n",
                    self.connections.active_connections.load(Ordering::Relaxed),
                ),
            ),
            (
                "memory",
                format!(
                    "# Memory\r\n\
                     used_memory:{}\r\n\
                     used_memory_human:{}\r\n\
                     maxmemory:{}\r\n\
                     maxmemory_human:{}\r\n\
                     maxmemory_policy:{}\r\n",
                    keyspace.used_memory,
                    bytes_to_human(keyspace.used_memory),
                    self.evictor.maxmemory(),
                    bytes_to_human(self.evictor.maxmemory()),
                    self.evictor.policy().as_str(),
                ),
            ),
            (
                "persistence",
                format!(
                    "# Persistence\r\n\
                     loading:{}\r\n\
                     aof_enabled:{}\r\n\
                     aof_fsync:{}\r\n\
                     aof_buffer_length:{}\r\n\
                     changes_since_start:{}\r\n",
                    self.db.is_loading() as u8,
                    self.aof.is_some() as u8,
                    self.aof.as_ref().map(|a| a.policy().as_str()).unwrap_or("-"),
                    self.aof.as_ref().map(|a| a.buffered()).unwrap_or(0),
                    self.dirty,
                ),
            ),
            (
                "stats",
                format!(
                    "# Stats\r\n\
                     total_connections_received:{}\r\n\
                     total_commands_processed:{}\r\n\
                     expired_keys:{}\r\n\
                     evicted_keys:{}\r\n\
                     rejected_writes:{}\r\n\
                     keyspace_hits:{}\r\n\
                     keyspace_misses:{}\r\n\
                     rehashing:{}\r\n",
                    self.connections.connections_accepted.load(Ordering::Relaxed),
                    self.stats.commands_processed,
                    keyspace.expired_keys,
                    self.evictor.evicted_keys(),
                    self.stats.rejected_writes,
                    self.stats.keyspace_hits,
                    self.stats.keyspace_misses,
                    self.db.is_rehashing() as u8,
                ),
            ),
            (
                "keyspace",
                format!(
                    "# Keyspace\r\n\
                     db0:keys={},expires={}\r\n",
                    keyspace.keys, keyspace.expires,
                ),
            ),
        ];

        let all = matches!(section, None | Some("all") | Some("default") | Some("everything"));
        sections
            .iter()
            .filter(|(name, _)| all || section.is_some_and(|s| s.eq_ignore_ascii_case(name)))
            .map(|(_, text)| text.as_str())
            .collect::<Vec<_>>()
            .join("\r\n")
    }
}

/// Formats a byte count the way `INFO` shows it, e.g. `1.50M`.
fn bytes_to_human(bytes: usize) -> String {
    const UNITS: [(&str, f64); 3] = [
        ("G", 1024.0 * 1024.0 * 1024.0),
        ("M", 1024.0 * 1024.0),
        ("K", 1024.0),
    ];
    let n = bytes as f64;
    for (suffix, size) in UNITS {
        if n >= size {
            return format!("{:.2}{}", n / size, suffix);
        }
    }
    format!("{}B", bytes)
}
