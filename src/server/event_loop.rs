//! Event Loop
//!
//! Connection tasks never touch the keyspace. They send each decoded
//! request through a bounded channel together with a oneshot sender, and
//! a single consumer applies requests in arrival order:
//!
//! ```text
//!  conn 1 ──┐
//!  conn 2 ──┼──► mpsc (bounded) ──► EventLoop ──► Server::execute
//!  conn N ──┘                          │
//!                                      └──► Server::cron between batches
//! ```
//!
//! A full channel blocks senders, which is the only admission control.

use super::Server;
use crate::config::Config;
use crate::persistence::AofError;
use crate::protocol::{Reply, Request};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, info, trace};

/// A request waiting to be applied, with the channel for its reply.
#[derive(Debug)]
pub struct Envelope {
    pub request: Request,
    pub reply: oneshot::Sender<Reply>,
}

/// The event loop stopped before answering.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("event loop has shut down")]
pub struct LoopClosed;

/// Cloneable sending side of the event loop.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    tx: mpsc::Sender<Envelope>,
}

impl ServerHandle {
    /// Queues `request` and waits for its reply.
    pub async fn call(&self, request: Request) -> Result<Reply, LoopClosed> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope { request, reply })
            .await
            .map_err(|_| LoopClosed)?;
        rx.await.map_err(|_| LoopClosed)
    }
}

/// The single consumer of the request channel.
#[derive(Debug)]
pub struct EventLoop {
    server: Server,
    rx: mpsc::Receiver<Envelope>,
    batch_size: usize,
    idle_timeout: Duration,
}

impl EventLoop {
    pub fn new(server: Server, config: &Config) -> (Self, ServerHandle) {
        let (tx, rx) = mpsc::channel(config.request_queue.max(1));
        let event_loop = Self {
            server,
            rx,
            batch_size: config.batch_size.max(1),
            idle_timeout: config.loop_timeout(),
        };
        (event_loop, ServerHandle { tx })
    }

    /// Applies requests until `shutdown` flips or every handle is dropped.
    ///
    /// Each iteration waits up to the idle timeout for a request, applies at
    /// most `batch_size` of them, then runs [`Server::cron`]. On the way out
    /// the requests already queued are answered and the append-only file is
    /// synced. An append-only file failure ends the loop with an error.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<Server, AofError> {
        info!(
            batch_size = self.batch_size,
            idle_timeout_ms = self.idle_timeout.as_millis() as u64,
            "event loop started"
        );

        while !*shutdown.borrow() {
            tokio::select! {
                biased;

                _ = shutdown.changed() => break,

                received = timeout(self.idle_timeout, self.rx.recv()) => match received {
                    Ok(Some(envelope)) => {
                        self.apply(envelope);
                        let applied = 1 + self.drain(self.batch_size - 1);
                        trace!(applied, "applied batch");
                    }
                    Ok(None) => {
                        debug!("all server handles dropped");
                        break;
                    }
                    Err(_) => {}
                },
            }
            self.server.cron().await?;
        }

        self.rx.close();
        let remaining = self.drain(usize::MAX);
        if remaining > 0 {
            debug!(remaining, "answered queued requests before shutdown");
        }
        self.server.shutdown().await?;
        info!("event loop stopped");
        Ok(self.server)
    }

    fn apply(&mut self, envelope: Envelope) {
        let reply = self.server.execute(&envelope.request);
        if envelope.reply.send(reply).is_err() {
            trace!("client went away before its reply");
        }
    }

    /// Applies up to `max` requests that are already queued.
    fn drain(&mut self, max: usize) -> usize {
        let mut applied = 0;
        while applied < max {
            match self.rx.try_recv() {
                Ok(envelope) => {
                    self.apply(envelope);
                    applied += 1;
                }
                Err(_) => break,
            }
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task::JoinHandle;

    fn test_config() -> Config {
        Config {
            loop_timeout_ms: 5,
            ..Config::default()
        }
    }

    fn start(
        config: &Config,
    ) -> (
        ServerHandle,
        watch::Sender<bool>,
        JoinHandle<Result<Server, AofError>>,
    ) {
        let (event_loop, handle) = EventLoop::new(Server::new(config), config);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(event_loop.run(shutdown_rx));
        (handle, shutdown_tx, task)
    }

    async fn call(handle: &ServerHandle, parts: &[&str]) -> Reply {
        handle.call(Request::from_strs(parts)).await.unwrap()
    }

    #[tokio::test]
    async fn test_requests_are_applied_in_order() {
        let (handle, shutdown, task) = start(&test_config());

        assert_eq!(call(&handle, &["SET", "a", "1"]).await, Reply::ok());
        assert_eq!(call(&handle, &["RPUSH", "l", "x"]).await, Reply::Integer(1));
        assert_eq!(call(&handle, &["GET", "a"]).await, Reply::bulk("1"));

        shutdown.send(true).unwrap();
        let server = task.await.unwrap().unwrap();
        assert_eq!(server.database().len(), 2);
        assert_eq!(server.dirty(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_clients_are_serialized() {
        let (handle, shutdown, task) = start(&test_config());

        let mut clients = Vec::new();
        for c in 0..8 {
            let handle = handle.clone();
            clients.push(tokio::spawn(async move {
                for i in 0..50 {
                    let value = format!("{}-{}", c, i);
                    handle
                        .call(Request::from_strs(&["RPUSH", "shared", value.as_str()]))
                        .await
                        .unwrap();
                }
            }));
        }
        for client in clients {
            client.await.unwrap();
        }

        assert_eq!(call(&handle, &["LLEN", "shared"]).await, Reply::Integer(400));
        shutdown.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cron_runs_while_idle() {
        let (handle, shutdown, task) = start(&test_config());

        for i in 0..40 {
            call(&handle, &["SET", &format!("k{}", i), "v", "PX", "5"]).await;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;

        // DBSIZE counts keys still in the store, so zero means the cron
        // reclaimed them without any lookup
        assert_eq!(call(&handle, &["DBSIZE"]).await, Reply::Integer(0));
        shutdown.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_full_queue_blocks_callers_until_drained() {
        let config = Config {
            request_queue: 1,
            ..test_config()
        };
        let (event_loop, handle) = EventLoop::new(Server::new(&config), &config);

        // nothing consumes yet: the first call fills the queue, the second
        // is stuck sending
        let first = tokio::spawn({
            let handle = handle.clone();
            async move { handle.call(Request::from_strs(&["SET", "a", "1"])).await }
        });
        let second = tokio::spawn({
            let handle = handle.clone();
            async move { handle.call(Request::from_strs(&["GET", "a"])).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!first.is_finished());
        assert!(!second.is_finished());
        assert_eq!(handle.tx.capacity(), 0);
        let (reply, _rx) = oneshot::channel();
        let envelope = Envelope {
            request: Request::from_strs(&["PING"]),
            reply,
        };
        assert!(matches!(
            handle.tx.try_send(envelope),
            Err(mpsc::error::TrySendError::Full(_))
        ));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(event_loop.run(shutdown_rx));

        assert_eq!(first.await.unwrap(), Ok(Reply::ok()));
        assert_eq!(second.await.unwrap(), Ok(Reply::bulk("1")));
        shutdown.send(true).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stops_when_handles_dropped() {
        let (handle, _shutdown, task) = start(&test_config());
        call(&handle, &["SET", "a", "1"]).await;
        drop(handle);

        let server = task.await.unwrap().unwrap();
        assert_eq!(server.database().len(), 1);
    }

    #[tokio::test]
    async fn test_call_after_shutdown_fails() {
        let (handle, shutdown, task) = start(&test_config());
        shutdown.send(true).unwrap();
        task.await.unwrap().unwrap();

        let result = handle.call(Request::from_strs(&["PING"])).await;
        assert_eq!(result, Err(LoopClosed));
    }
}
