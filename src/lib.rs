//! # rehashkv - An In-Memory Key-Value Server
//!
//! rehashkv speaks the Redis protocol and keeps its data in a hash table
//! that grows and shrinks incrementally, so no single request ever pays for
//! a full rehash.
//!
//! ## Features
//!
//! - **Incremental rehashing**: a two-table [`dict::Dict`] moves buckets a
//!   few at a time, on every access and from a time-boxed cron
//! - **TTL support**: expired keys are removed on access and by a sampling
//!   sweep that adapts to how many keys are expiring
//! - **Memory budget**: approximate LRU or random eviction once tracked
//!   memory exceeds `--maxmemory`
//! - **Durability**: an append-only command log, replayed at startup
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              rehashkv                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐   mpsc    ┌──────────────────────┐  │
//! │  │ TCP Server  │───>│ Connection  │──────────>│      EventLoop       │  │
//! │  │ (Listener)  │    │  tasks (N)  │<──────────│  (single consumer)   │  │
//! │  └─────────────┘    └─────────────┘  oneshot  └──────────┬───────────┘  │
//! │                                                          │              │
//! │                      ┌───────────────────────────────────┼───────────┐  │
//! │                      │ Server                            ▼           │  │
//! │                      │  ┌──────────┐  ┌──────────┐  ┌──────────────┐ │  │
//! │                      │  │ Database │  │ Evictor  │  │AppendOnlyFile│ │  │
//! │                      │  │ store    │  │ pool     │  │              │ │  │
//! │                      │  │ expires  │  │          │  │              │ │  │
//! │                      │  └──────────┘  └──────────┘  └──────────────┘ │  │
//! │                      └───────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Exactly one task ever touches the keyspace. Connection tasks only
//! decode requests and wait for replies, so the data structures below need
//! no locks.
//!
//! ## Quick Start
//!
//! ```ignore
//! use rehashkv::config::Config;
//! use rehashkv::connection::{handle_connection, ConnectionStats};
//! use rehashkv::server::{EventLoop, Server};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let (event_loop, handle) = EventLoop::new(Server::open(&config)?, &config);
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!     tokio::spawn(event_loop.run(shutdown_rx));
//!
//!     let stats = Arc::new(ConnectionStats::new());
//!     let listener = TcpListener::bind(config.bind_address()).await?;
//!     loop {
//!         let (stream, addr) = listener.accept().await?;
//!         tokio::spawn(handle_connection(stream, addr, handle.clone(), Arc::clone(&stats)));
//!     }
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - Strings: `GET`, `SET key value [EX s | PX ms] [NX | XX]`
//! - Lists: `LPUSH`, `RPUSH`, `LPOP`, `RPOP`, `LRANGE`, `LLEN`
//! - Keys: `DEL`, `EXISTS`, `TYPE`, `EXPIRE`, `PEXPIRE`, `EXPIREAT`,
//!   `PEXPIREAT`, `PERSIST`, `TTL`, `PTTL`
//! - Server: `PING`, `ECHO`, `DBSIZE`, `FLUSHDB`, `INFO`, `QUIT`
//!
//! ## Module Overview
//!
//! - [`dict`]: incrementally rehashing hash table with random sampling
//! - [`object`]: the typed value envelope stored per key
//! - [`keyspace`]: store + expiry index, passive and active expiration
//! - [`eviction`]: memory budget enforcement and the LRU candidate pool
//! - [`commands`]: static command table and handlers
//! - [`persistence`]: append-only file
//! - [`server`]: server context and the event loop
//! - [`protocol`]: RESP request decoder and reply encoder
//! - [`connection`]: client connection tasks

pub mod commands;
pub mod config;
pub mod connection;
pub mod dict;
pub mod error;
pub mod eviction;
pub mod keyspace;
pub mod object;
pub mod persistence;
pub mod protocol;
pub mod server;
pub mod time;

// Re-export commonly used types for convenience
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use dict::Dict;
pub use keyspace::Database;
pub use object::Object;
pub use protocol::{ParseError, Reply, Request, RequestParser};
pub use server::{EventLoop, Server, ServerHandle};

/// The default port rehashkv listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host rehashkv binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of rehashkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
