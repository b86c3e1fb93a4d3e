//! LiveKV server entry point.

use anyhow::Context;
use clap::Parser;
use livekv::connection::{handle_connection, ConnectionStats};
use livekv::{Database, ServerConfig};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)
            .with_context(|| format!("invalid log filter '{}'", config.log_level))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let db = Arc::new(Database::start(config.engine()));
    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!(
        version = livekv::VERSION,
        address = %config.bind_address(),
        push_buffer = config.push_buffer,
        "LiveKV listening"
    );

    tokio::select! {
        _ = accept_loop(listener, Arc::clone(&db), Arc::clone(&stats)) => {}
        result = signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            info!("Shutdown signal received, stopping server");
        }
    }

    db.shutdown().await;
    info!(
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        pushes = stats.pushes_sent.load(Ordering::Relaxed),
        bytes_read = stats.bytes_read.load(Ordering::Relaxed),
        bytes_written = stats.bytes_written.load(Ordering::Relaxed),
        "Server shutdown complete"
    );
    Ok(())
}

async fn accept_loop(listener: TcpListener, db: Arc<Database>, stats: Arc<ConnectionStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    error!(client = %addr, error = %e, "Failed to set TCP_NODELAY");
                }
                tokio::spawn(handle_connection(
                    stream,
                    addr,
                    Arc::clone(&db),
                    Arc::clone(&stats),
                ));
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}
