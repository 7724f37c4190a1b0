//! AutoPromote authentication gateway.
//!
//! Loads `.env`, the YAML config (`GATEWAY_CONFIG`) and the auth settings
//! from the environment, then serves the routes in [`routes`] until Ctrl+C
//! or SIGTERM.

mod config;
mod error;
mod logging;
mod maintenance;
mod routes;
mod state;

use anyhow::Context;
use autopromote_auth::AuthConfig;
use std::net::SocketAddr;
use tokio::signal;
use tracing::info;

use crate::config::GatewayConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Missing .env is fine; the environment may be set by the platform.
    let _ = dotenvy::dotenv();

    let config_path = GatewayConfig::config_path();
    let mut config = GatewayConfig::from_file(&config_path)?;
    config.apply_env_overrides();

    logging::init_logging(&config.logging)?;
    info!(path = %config_path, "Configuration loaded");

    let auth = AuthConfig::from_env().context("Invalid auth configuration")?;
    info!(
        audience = ?auth.expected_audience,
        issuer = ?auth.expected_issuer,
        no_token_block = auth.thresholds.no_token_block,
        verify_error_block = auth.thresholds.verify_error_block,
        invalid_format_throttle = auth.thresholds.invalid_format_throttle,
        block_secs = auth.thresholds.block_duration.as_secs(),
        global_capacity = auth.global_limit.capacity,
        global_refill = auth.global_limit.refill_per_sec,
        trusted_proxies = ?auth.trusted_proxies,
        "Auth gateway configured"
    );

    let state = AppState::from_config(&config, auth)?;
    let _maintenance = maintenance::spawn(state.clone(), config.maintenance.clone());

    let app = routes::router(state, config.auth.public_paths.clone());

    let addr: SocketAddr = config
        .bind_addr()
        .parse()
        .with_context(|| format!("Invalid bind address '{}'", config.bind_addr()))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to address {addr}"))?;

    info!(%addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
