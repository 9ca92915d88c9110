//! fleet-bridge server entry point.
//!
//! Starts the Axum HTTP server with the REST and WebSocket endpoints.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use fleet_bridge::config::{BridgeConfig, LogFormat};
use fleet_bridge::{build_app, build_bridge};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = BridgeConfig::from_env()
        .map_err(|err| anyhow::anyhow!("{err}"))
        .context("loading configuration")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    tracing::info!(
        addr = %config.listen_addr,
        call_timeout_secs = config.call_timeout_secs,
        heartbeat_interval_secs = config.heartbeat_interval_secs,
        "starting fleet-bridge"
    );

    // Build service and router
    let bridge = build_bridge(&config);
    let app = build_app(&config, Arc::clone(&bridge)).context("building router")?;

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!(clients = bridge.registry().len(), "closing client connections");
    bridge.registry().close_all().await;
    Ok(())
}

/// Resolves on Ctrl-C.
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
