//! Append-only file.
//!
//! Every command that changed the keyspace is appended to the log as a RESP
//! array, exactly as a client would send it, so replaying the file means
//! running it through the ordinary request parser and command path.
//!
//! Relative expirations are logged with absolute times:
//!
//! ```text
//! SET k v EX 10      ──►  SET k v
//!                         PEXPIREAT k <now + 10000>
//! EXPIRE k 10        ──►  PEXPIREAT k <now + 10000>
//! ```
//!
//! Writes are collected in a buffer by [`AppendOnlyFile::feed`] and written
//! out by [`AppendOnlyFile::flush`], which the event loop calls once per
//! iteration. With `everysec`, fsync runs on a blocking task at most once a
//! second and only one may be in flight.

use crate::commands::Command;
use crate::config::FsyncPolicy;
use crate::protocol::{ParseError, Request, RequestParser};
use crate::time::now_ms;
use bytes::Bytes;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Minimum spacing of background fsyncs under `everysec`.
const FSYNC_INTERVAL: Duration = Duration::from_secs(1);

/// How long a write may wait for an in-flight fsync before it goes ahead
/// anyway.
const MAX_FLUSH_POSTPONE: Duration = Duration::from_secs(2);

/// Errors of the append-only file. Write and fsync failures are fatal.
#[derive(Debug, Error)]
pub enum AofError {
    #[error("failed to open append-only file {}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },

    #[error("failed to read append-only file: {0}")]
    Read(#[source] io::Error),

    #[error("failed to write append-only file: {0}")]
    Write(#[source] io::Error),

    #[error("failed to fsync append-only file: {0}")]
    Fsync(#[source] io::Error),

    #[error("corrupt append-only file at byte {offset}: {source}")]
    Corrupt { offset: usize, source: ParseError },
}

/// Writer side of the append-only file.
#[derive(Debug)]
pub struct AppendOnlyFile {
    file: Arc<File>,
    path: PathBuf,
    policy: FsyncPolicy,
    /// Commands fed since the last write.
    buf: Vec<u8>,
    /// Set when a write was deferred because an fsync was still running.
    postponed_since: Option<Instant>,
    last_fsync: Instant,
    fsync_in_progress: Arc<AtomicBool>,
    fsync_task: Option<JoinHandle<io::Result<()>>>,
}

impl AppendOnlyFile {
    /// Opens (or creates) the log for appending.
    pub fn open(path: impl Into<PathBuf>, policy: FsyncPolicy) -> Result<Self, AofError> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| AofError::Open {
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), ?policy, "opened append-only file");
        Ok(Self {
            file: Arc::new(file),
            path,
            policy,
            buf: Vec::new(),
            postponed_since: None,
            last_fsync: Instant::now(),
            fsync_in_progress: Arc::new(AtomicBool::new(false)),
            fsync_task: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> FsyncPolicy {
        self.policy
    }

    /// Bytes fed but not yet written.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Appends a command that changed the keyspace to the write buffer.
    pub fn feed(&mut self, req: &Request) {
        let now = now_ms();
        match Command::lookup(req.name()) {
            Command::Set => {
                let argv = req.argv();
                Request::new(argv[..3.min(argv.len())].to_vec()).encode_into(&mut self.buf);
                if let Some(ms) = set_expire_ms(req) {
                    self.feed_pexpireat(&argv[1], now.saturating_add(ms));
                }
            }
            cmd @ (Command::Expire | Command::Pexpire | Command::Expireat) => {
                let argv = req.argv();
                let Some(n) = req.arg_str(2).and_then(|s| s.parse::<i64>().ok()) else {
                    return;
                };
                let when = match cmd {
                    Command::Expire => now.saturating_add(n.saturating_mul(1000)),
                    Command::Pexpire => now.saturating_add(n),
                    _ => n.saturating_mul(1000),
                };
                self.feed_pexpireat(&argv[1], when);
            }
            _ => req.encode_into(&mut self.buf),
        }
    }

    fn feed_pexpireat(&mut self, key: &Bytes, when: i64) {
        Request::new(vec![
            Bytes::from_static(b"PEXPIREAT"),
            key.clone(),
            Bytes::from(when.to_string()),
        ])
        .encode_into(&mut self.buf);
    }

    /// Writes the buffer to the file and schedules fsync per the policy.
    ///
    /// Under `everysec`, unless `force` is set, the write is held back while
    /// a background fsync is running, for at most [`MAX_FLUSH_POSTPONE`].
    pub async fn flush(&mut self, force: bool) -> Result<(), AofError> {
        self.reap_fsync().await?;
        if self.buf.is_empty() {
            return Ok(());
        }

        if self.policy == FsyncPolicy::Everysec && !force && self.fsync_running() {
            match self.postponed_since {
                None => {
                    self.postponed_since = Some(Instant::now());
                    return Ok(());
                }
                Some(since) if since.elapsed() < MAX_FLUSH_POSTPONE => return Ok(()),
                Some(_) => warn!("fsync is taking too long, writing without waiting for it"),
            }
        }
        self.postponed_since = None;

        (&*self.file)
            .write_all(&self.buf)
            .map_err(AofError::Write)?;
        self.buf.clear();

        match self.policy {
            FsyncPolicy::Always => {
                self.file.sync_data().map_err(AofError::Fsync)?;
                self.last_fsync = Instant::now();
            }
            FsyncPolicy::Everysec => {
                // an unreaped task may still hold an error, even after
                // it cleared the in-progress flag
                if self.last_fsync.elapsed() >= FSYNC_INTERVAL
                    && !self.fsync_running()
                    && self.fsync_task.is_none()
                {
                    self.start_background_fsync();
                }
            }
            FsyncPolicy::No => {}
        }
        Ok(())
    }

    /// Writes everything out and fsyncs once any background fsync is done.
    pub async fn shutdown(&mut self) -> Result<(), AofError> {
        self.flush(true).await?;
        if let Some(task) = self.fsync_task.take() {
            join_fsync(task).await?;
        }
        self.file.sync_data().map_err(AofError::Fsync)?;
        info!(path = %self.path.display(), "append-only file synced");
        Ok(())
    }

    fn fsync_running(&self) -> bool {
        self.fsync_in_progress.load(Ordering::Acquire)
    }

    fn start_background_fsync(&mut self) {
        let file = Arc::clone(&self.file);
        let in_progress = Arc::clone(&self.fsync_in_progress);
        in_progress.store(true, Ordering::Release);
        self.last_fsync = Instant::now();

        self.fsync_task = Some(tokio::task::spawn_blocking(move || {
            let result = file.sync_data();
            in_progress.store(false, Ordering::Release);
            result
        }));
    }

    /// Collects the result of a finished background fsync.
    async fn reap_fsync(&mut self) -> Result<(), AofError> {
        match self.fsync_task.take() {
            Some(task) if task.is_finished() => join_fsync(task).await,
            pending => {
                self.fsync_task = pending;
                Ok(())
            }
        }
    }

    /// Replays the log at `path`, handing every command to `apply`.
    /// Returns the number of commands replayed; a missing file replays none.
    ///
    /// A command cut off at the end of the file (a crash mid-write) is
    /// skipped with a warning. Anything else unparseable is an error.
    pub fn load(path: &Path, mut apply: impl FnMut(Request)) -> Result<usize, AofError> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(AofError::Read(e)),
        };

        let mut parser = RequestParser::new();
        let mut offset = 0;
        let mut loaded = 0;
        while offset < data.len() {
            match parser.parse(&data[offset..]) {
                Ok(Some((req, used))) => {
                    offset += used;
                    if !req.is_empty() {
                        apply(req);
                        loaded += 1;
                    }
                }
                Ok(None) => {
                    warn!(
                        offset,
                        trailing = data.len() - offset,
                        "ignoring truncated command at end of append-only file"
                    );
                    break;
                }
                Err(source) => return Err(AofError::Corrupt { offset, source }),
            }
        }
        Ok(loaded)
    }
}

async fn join_fsync(task: JoinHandle<io::Result<()>>) -> Result<(), AofError> {
    match task.await {
        Ok(result) => result.map_err(AofError::Fsync),
        Err(e) => Err(AofError::Fsync(io::Error::other(e))),
    }
}

/// The relative expiry of a `SET ... EX|PX` request in milliseconds.
fn set_expire_ms(req: &Request) -> Option<i64> {
    let mut i = 3;
    while i + 1 < req.arg_count() {
        let opt = req.arg(i)?;
        let n = req.arg_str(i + 1).and_then(|s| s.parse::<i64>().ok());
        if opt.eq_ignore_ascii_case(b"EX") {
            return n.map(|s| s.saturating_mul(1000));
        }
        if opt.eq_ignore_ascii_case(b"PX") {
            return n;
        }
        i += 1;
    }
    None
}
