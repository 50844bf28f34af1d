//! clinicq - Background Worker Entry Point
//!
//! Runs the sweeper without serving HTTP. Swept entries are announced through
//! the store's queue change feed, and every server relays them to its rooms.

use anyhow::Context;
use clinicq::{background, config::Config, logging, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    let _telemetry_guard =
        logging::init_logging(&config.logging).context("Failed to initialize logging/telemetry")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting clinicq worker");

    let state = AppState::new(config)
        .await
        .context("Failed to initialize application state")?;

    let workers = background::start_workers(&state);
    shutdown_signal().await;
    workers.shutdown().await;

    tracing::info!("Worker shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm =
        signal(SignalKind::terminate()).expect("Failed to install SIGTERM signal handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("SIGINT received, stopping workers..."),
        _ = sigterm.recv() => tracing::info!("SIGTERM received, stopping workers..."),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
}
