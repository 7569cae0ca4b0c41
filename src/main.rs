//! rehashkv server binary.
//!
//! Parses the command line, replays the append-only file, starts the event
//! loop and accepts connections until Ctrl+C.

use anyhow::Context;
use clap::Parser;
use rehashkv::config::Config;
use rehashkv::connection::{handle_connection, ConnectionStats};
use rehashkv::persistence::AofError;
use rehashkv::server::{EventLoop, Server, ServerHandle};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn print_banner(config: &Config) {
    println!(
        r#"
rehashkv v{} - in-memory key-value server
──────────────────────────────────────────────────────────────
Listening on     {}
maxmemory        {} ({})
append-only      {}

Use Ctrl+C to shutdown gracefully.
"#,
        rehashkv::VERSION,
        config.bind_address(),
        config.maxmemory,
        config.maxmemory_policy.as_str(),
        if config.appendonly {
            format!(
                "{} (fsync {})",
                config.appendfilename.display(),
                config.appendfsync.as_str()
            )
        } else {
            "off".to_string()
        },
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    print_banner(&config);

    let stats = Arc::new(ConnectionStats::new());
    let server = Server::open(&config)
        .context("failed to load the append-only file")?
        .with_connection_stats(Arc::clone(&stats));

    let (event_loop, handle) = EventLoop::new(server, &config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut loop_task: JoinHandle<Result<Server, AofError>> =
        tokio::spawn(event_loop.run(shutdown_rx));

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!("Listening on {}", config.bind_address());

    tokio::select! {
        _ = accept_loop(listener, handle, stats) => {}
        result = signal::ctrl_c() => {
            result.context("failed to install Ctrl+C handler")?;
            info!("Shutdown signal received, stopping server...");
        }
        finished = &mut loop_task => {
            // the loop only ends on its own when persistence failed
            let server = finished.context("event loop panicked")??;
            error!(keys = server.database().len(), "event loop stopped unexpectedly");
            anyhow::bail!("event loop stopped unexpectedly");
        }
    }

    let _ = shutdown_tx.send(true);
    let server = loop_task.await.context("event loop panicked")??;
    info!(keys = server.database().len(), "Server shutdown complete");
    Ok(())
}

/// Main loop that accepts incoming connections
async fn accept_loop(listener: TcpListener, handle: ServerHandle, stats: Arc<ConnectionStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_connection(stream, addr, handle.clone(), Arc::clone(&stats)));
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
