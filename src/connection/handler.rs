//! Connection Handler Module
//!
//! Each client gets its own task that reads requests, forwards them to the
//! event loop and writes the replies back in order.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects, ConnectionHandler spawned
//!        │
//!        ▼
//! 2. ┌──────────────────────────────┐
//!    │  Read bytes from socket      │◄─────┐
//!    │  Decode every full request   │      │
//!    │  ServerHandle::call each one │      │
//!    │  Write replies, flush once   │──────┘
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 3. QUIT, client disconnect, protocol error or event loop gone
//! ```
//!
//! ## Buffer Management
//!
//! TCP is a stream: one read may hold half a request or several of them.
//! Bytes accumulate in a `BytesMut` and are consumed only once a whole
//! request has been decoded, so pipelined requests are answered in one
//! write.

use crate::commands::Command;
use crate::protocol::{ParseError, Reply, RequestParser};
use crate::server::{LoopClosed, ServerHandle};
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

/// Largest amount of unparsed input a client may buffer (1 GB).
const MAX_QUERY_BUFFER: usize = 1024 * 1024 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Requests forwarded to the event loop
    pub requests_forwarded: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn request_forwarded(&self) {
        self.requests_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Handles a single client connection.
pub struct ConnectionHandler {
    /// The TCP stream for this connection
    stream: BufWriter<TcpStream>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Buffer for incoming data
    buffer: BytesMut,

    /// Sending side of the event loop
    server: ServerHandle,

    parser: RequestParser,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        server: ServerHandle,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            server,
            parser: RequestParser::new(),
            stats,
        }
    }

    /// Runs the connection until the client leaves or an error occurs.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(e) => match e {
                ConnectionError::ClientDisconnected => {
                    debug!(client = %self.addr, "Client disconnected")
                }
                ConnectionError::IoError(io_err)
                    if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
                {
                    debug!(client = %self.addr, "Connection reset by client")
                }
                _ => warn!(client = %self.addr, error = %e, "Connection error"),
            },
        }

        self.stats.connection_closed();
        result
    }

    /// The read-forward-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            let mut written = 0;
            loop {
                let request = match self.parser.parse(&self.buffer) {
                    Ok(Some((request, consumed))) => {
                        self.buffer.advance(consumed);
                        request
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(client = %self.addr, error = %e, "Protocol error");
                        let reply = Reply::error(format!("ERR Protocol error: {}", e));
                        self.write_reply(&reply).await?;
                        self.stream.flush().await?;
                        return Err(ConnectionError::ParseError(e));
                    }
                };
                if request.is_empty() {
                    continue;
                }
                trace!(client = %self.addr, request = %request, "Parsed request");

                if Command::lookup(request.name()) == Command::Quit {
                    self.write_reply(&Reply::ok()).await?;
                    self.stream.flush().await?;
                    return Ok(());
                }

                self.stats.request_forwarded();
                let reply = self.server.call(request).await?;
                written += self.write_reply(&reply).await?;
            }

            if written > 0 {
                self.stream.flush().await?;
                trace!(client = %self.addr, bytes = written, "Sent replies");
            }

            self.read_more_data().await?;
        }
    }

    /// Reads more data from the socket into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_QUERY_BUFFER {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "Query buffer limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(4096);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            if self.buffer.is_empty() {
                return Err(ConnectionError::ClientDisconnected);
            } else {
                return Err(ConnectionError::UnexpectedEof);
            }
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }

    /// Queues a reply in the write buffer. Returns its encoded size.
    async fn write_reply(&mut self, reply: &Reply) -> Result<usize, ConnectionError> {
        let bytes = reply.serialize();
        self.stream.write_all(&bytes).await?;
        self.stats.bytes_written(bytes.len());
        Ok(bytes.len())
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Malformed request
    #[error("Parse error: {0}")]
    ParseError(#[from] ParseError),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial command)
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Query buffer limit exceeded
    #[error("Buffer size limit exceeded")]
    BufferFull,

    /// The event loop stopped while a request was pending
    #[error(transparent)]
    LoopClosed(#[from] LoopClosed),
}

/// Runs a [`ConnectionHandler`] to completion, logging unexpected errors.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    server: ServerHandle,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, server, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::server::{EventLoop, Server};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::watch;

    async fn create_test_server() -> (SocketAddr, Arc<ConnectionStats>, watch::Sender<bool>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let stats = Arc::new(ConnectionStats::new());

        let config = Config {
            loop_timeout_ms: 5,
            ..Config::default()
        };
        let server = Server::new(&config).with_connection_stats(Arc::clone(&stats));
        let (event_loop, handle) = EventLoop::new(server, &config);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(event_loop.run(shutdown_rx));

        let stats_clone = Arc::clone(&stats);
        tokio::spawn(async move {
            while let Ok((stream, client_addr)) = listener.accept().await {
                let stats = Arc::clone(&stats_clone);
                tokio::spawn(handle_connection(stream, client_addr, handle.clone(), stats));
            }
        });

        (addr, stats, shutdown_tx)
    }

    /// Reads until exactly `expected.len()` bytes have arrived.
    async fn read_exact_reply(client: &mut TcpStream, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(
            String::from_utf8_lossy(&buf),
            String::from_utf8_lossy(expected)
        );
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (addr, _, _shutdown) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        read_exact_reply(&mut client, b"+PONG\r\n").await;
    }

    #[tokio::test]
    async fn test_set_get() {
        let (addr, _, _shutdown) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\nAriz\r\n")
            .await
            .unwrap();
        read_exact_reply(&mut client, b"+OK\r\n").await;

        client
            .write_all(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
            .await
            .unwrap();
        read_exact_reply(&mut client, b"$4\r\nAriz\r\n").await;
    }

    #[tokio::test]
    async fn test_pipelined_and_split_requests() {
        let (addr, _, _shutdown) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client
            .write_all(b"*3\r\n$5\r\nRPUSH\r\n$1\r\nl\r\n$1\r\na\r\n*2\r\n$4\r\nLLEN\r\n$1\r\nl\r\n*2\r\n$3\r\nGE")
            .await
            .unwrap();
        read_exact_reply(&mut client, b":1\r\n:1\r\n").await;

        client.write_all(b"T\r\n$1\r\nx\r\n").await.unwrap();
        read_exact_reply(&mut client, b"$-1\r\n").await;
    }

    #[tokio::test]
    async fn test_inline_command() {
        let (addr, _, _shutdown) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"\r\nECHO hello\r\n").await.unwrap();
        read_exact_reply(&mut client, b"$5\r\nhello\r\n").await;
    }

    #[tokio::test]
    async fn test_quit_closes_connection() {
        let (addr, _, _shutdown) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nQUIT\r\n").await.unwrap();
        read_exact_reply(&mut client, b"+OK\r\n").await;

        let mut buf = [0u8; 16];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_protocol_error_closes_connection() {
        let (addr, _, _shutdown) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n:5\r\n").await.unwrap();
        let mut reply = Vec::new();
        client.read_to_end(&mut reply).await.unwrap();
        assert!(reply.starts_with(b"-ERR Protocol error"));
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let (addr, stats, _shutdown) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$6\r\nDBSIZE\r\n").await.unwrap();
        read_exact_reply(&mut client, b":0\r\n").await;

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);
        assert_eq!(stats.requests_forwarded.load(Ordering::Relaxed), 1);
        assert_eq!(stats.bytes_written.load(Ordering::Relaxed), 4);
    }
}
