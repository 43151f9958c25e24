//! tcp-acceptor: serves an example line protocol on top of the acceptor
//! framework.
//!
//! Protocols:
//! - echo: every line is sent back unchanged
//! - counter: every decimal line is answered with its value plus one
//!
//! Configuration via CLI arguments or TOML file. Ctrl-C or SIGTERM stops
//! accepting and drains open sessions.

mod config;

use anyhow::{Context, Result};
use config::{Config, ProtocolType};
use tcp_acceptor::protocols::counter::{Counter, CounterState};
use tcp_acceptor::protocols::echo::Echo;
use tcp_acceptor::{Conn, Handler, Server, ServerConfig, ServerError};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        acceptors = ?config.acceptors,
        idle_timeout = ?config.idle_timeout,
        protocol = ?config.protocol,
        "Starting tcp-acceptor"
    );

    let server_config = ServerConfig::new(config.listen.clone())
        .acceptors(config.acceptors.unwrap_or(0))
        .idle_timeout(config.idle_timeout);

    let server_config = match config.protocol {
        ProtocolType::Echo => server_config.handler(|_: &Conn| Handler::event(Echo::new())),
        ProtocolType::Counter => {
            let state = CounterState::new();
            server_config.handler(move |_: &Conn| Handler::step(Counter::new(state.clone())))
        }
    };

    let mut server = Server::bind(server_config)
        .await
        .with_context(|| format!("failed to start server on {}", config.listen))?;
    server.start()?;

    shutdown_signal().await?;

    server.stop()?;
    match server.wait(Some(config.drain_timeout)).await {
        Ok(()) => info!("Shutdown complete"),
        Err(ServerError::DrainTimeout { live }) => {
            warn!(live, "Drain timed out, exiting with sessions still open")
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;

        tokio::select! {
            res = signal::ctrl_c() => res.context("failed to listen for Ctrl-C")?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;

    info!("Shutdown signal received");
    Ok(())
}
