//! Client Connections
//!
//! Each accepted socket is served by its own task. Connection tasks decode
//! requests and hand them to the event loop through a [`ServerHandle`];
//! they never touch the keyspace themselves.
//!
//! ```text
//!  TcpListener ──accept──► spawn ConnectionHandler ──► ServerHandle::call
//!                                   ▲                          │
//!                                   └────────── Reply ─────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use rehashkv::connection::{handle_connection, ConnectionStats};
//! use std::sync::Arc;
//!
//! let stats = Arc::new(ConnectionStats::new());
//! let (stream, addr) = listener.accept().await?;
//! tokio::spawn(handle_connection(stream, addr, handle.clone(), Arc::clone(&stats)));
//! ```
//!
//! [`ServerHandle`]: crate::server::ServerHandle

pub mod handler;

// Re-export commonly used types
pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
