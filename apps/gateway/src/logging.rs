//! Structured logging setup using tracing.
//!
//! JSON output by default for log aggregation; `pretty` for local runs.
//! `RUST_LOG` takes precedence over the configured level.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{AppError, AppResult};

/// Initialize the global tracing subscriber.
pub fn init_logging(config: &LoggingConfig) -> AppResult<()> {
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| AppError::Config(format!("Invalid log filter '{}': {e}", config.level)))?;

    let registry = tracing_subscriber::registry().with(filter_layer);

    let result = match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .flatten_event(true),
            )
            .try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
    };
    result.map_err(|e| AppError::Config(format!("Failed to install subscriber: {e}")))?;

    tracing::info!(level = %config.level, format = ?config.format, "Logging initialized");
    Ok(())
}
