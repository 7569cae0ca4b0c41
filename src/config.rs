//! Server configuration.
//!
//! Everything is set from the command line. [`Config::default`] gives the
//! same values as running the binary without arguments.

use crate::keyspace::KeyspaceConfig;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// What to do when memory use exceeds `--maxmemory`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EvictionPolicy {
    /// Evict the least recently used keys, approximated by sampling.
    AllkeysLru,
    /// Evict uniformly random keys.
    AllkeysRandom,
    /// Reject writes that need memory.
    Noeviction,
}

/// When the append-only file is fsynced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FsyncPolicy {
    /// After every flush of the write buffer.
    Always,
    /// At most once per second, in the background.
    Everysec,
    /// Never explicitly; left to the operating system.
    No,
}

impl EvictionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionPolicy::AllkeysLru => "allkeys-lru",
            EvictionPolicy::AllkeysRandom => "allkeys-random",
            EvictionPolicy::Noeviction => "noeviction",
        }
    }
}

impl FsyncPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FsyncPolicy::Always => "always",
            FsyncPolicy::Everysec => "everysec",
            FsyncPolicy::No => "no",
        }
    }
}

/// Command-line configuration for the server.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "In-memory key-value server")]
pub struct Config {
    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 6379)]
    pub port: u16,

    /// Memory budget, e.g. 100mb or 1gb. 0 disables the limit.
    #[arg(long, default_value = "0", value_parser = parse_memory)]
    pub maxmemory: usize,

    /// Policy applied when memory is over budget
    #[arg(long, value_enum, default_value_t = EvictionPolicy::Noeviction)]
    pub maxmemory_policy: EvictionPolicy,

    /// Keys sampled per eviction pool refill
    #[arg(long, default_value_t = 5)]
    pub maxmemory_samples: usize,

    /// Number of slots in the eviction candidate pool
    #[arg(long, default_value_t = 15)]
    pub eviction_pool_size: usize,

    /// Expiry records sampled per active expiration round
    #[arg(long, default_value_t = 20)]
    pub active_expire_lookups: usize,

    /// Time budget of one active expiration cycle, in milliseconds
    #[arg(long, default_value_t = 25)]
    pub active_expire_budget_ms: u64,

    /// Minimum bucket count of the hash tables
    #[arg(long, default_value_t = 4)]
    pub min_table_size: usize,

    /// Log every write to the append-only file
    #[arg(long)]
    pub appendonly: bool,

    /// Path of the append-only file
    #[arg(long, default_value = "appendonly.aof")]
    pub appendfilename: PathBuf,

    /// Fsync policy of the append-only file
    #[arg(long, value_enum, default_value_t = FsyncPolicy::Everysec)]
    pub appendfsync: FsyncPolicy,

    /// Capacity of the request queue feeding the event loop
    #[arg(long, default_value_t = 1024)]
    pub request_queue: usize,

    /// Most requests applied per event loop iteration
    #[arg(long, default_value_t = 128)]
    pub batch_size: usize,

    /// Longest wait for a request before maintenance runs, in milliseconds
    #[arg(long, default_value_t = 100)]
    pub loop_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config::parse_from(["rehashkv"])
    }
}

impl Config {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn keyspace(&self) -> KeyspaceConfig {
        KeyspaceConfig {
            min_table_size: self.min_table_size,
            expire_lookups: self.active_expire_lookups,
            expire_budget: Duration::from_millis(self.active_expire_budget_ms),
        }
    }

    pub fn loop_timeout(&self) -> Duration {
        Duration::from_millis(self.loop_timeout_ms)
    }
}

/// Parses a byte count with an optional `k`, `kb`, `m`, `mb`, `g` or `gb`
/// suffix (case-insensitive, powers of 1024).
pub fn parse_memory(input: &str) -> Result<usize, String> {
    let lower = input.trim().to_ascii_lowercase();
    let split = lower
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(lower.len());
    let (digits, unit) = lower.split_at(split);

    let value: usize = digits
        .parse()
        .map_err(|_| format!("invalid memory size: {}", input))?;
    let multiplier: usize = match unit {
        "" | "b" => 1,
        "k" | "kb" => 1024,
        "m" | "mb" => 1024 * 1024,
        "g" | "gb" => 1024 * 1024 * 1024,
        _ => return Err(format!("unknown memory unit in: {}", input)),
    };
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("memory size out of range: {}", input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind_address(), "127.0.0.1:6379");
        assert_eq!(config.maxmemory, 0);
        assert_eq!(config.maxmemory_policy, EvictionPolicy::Noeviction);
        assert_eq!(config.maxmemory_samples, 5);
        assert_eq!(config.eviction_pool_size, 15);
        assert_eq!(config.active_expire_lookups, 20);
        assert_eq!(config.active_expire_budget_ms, 25);
        assert_eq!(config.min_table_size, 4);
        assert!(!config.appendonly);
        assert_eq!(config.appendfsync, FsyncPolicy::Everysec);
        assert_eq!(config.request_queue, 1024);
        assert_eq!(config.batch_size, 128);
        assert_eq!(config.loop_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn test_parse_flags() {
        let config = Config::parse_from([
            "rehashkv",
            "--port",
            "7000",
            "--maxmemory",
            "64mb",
            "--maxmemory-policy",
            "allkeys-lru",
            "--appendonly",
            "--appendfsync",
            "always",
        ]);
        assert_eq!(config.port, 7000);
        assert_eq!(config.maxmemory, 64 * 1024 * 1024);
        assert_eq!(config.maxmemory_policy, EvictionPolicy::AllkeysLru);
        assert!(config.appendonly);
        assert_eq!(config.appendfsync, FsyncPolicy::Always);
    }

    #[test]
    fn test_parse_memory() {
        assert_eq!(parse_memory("0"), Ok(0));
        assert_eq!(parse_memory("100"), Ok(100));
        assert_eq!(parse_memory("2k"), Ok(2048));
        assert_eq!(parse_memory("1MB"), Ok(1024 * 1024));
        assert_eq!(parse_memory("3gb"), Ok(3 * 1024 * 1024 * 1024));
        assert!(parse_memory("ten").is_err());
        assert!(parse_memory("5tb").is_err());
        assert!(parse_memory("").is_err());
    }

    #[test]
    fn test_policy_names() {
        assert_eq!(EvictionPolicy::AllkeysLru.as_str(), "allkeys-lru");
        assert_eq!(EvictionPolicy::Noeviction.as_str(), "noeviction");
        assert_eq!(FsyncPolicy::Everysec.as_str(), "everysec");
    }
}
