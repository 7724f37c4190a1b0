//! Startup errors.
//!
//! Request-time failures are [`autopromote_auth::GatewayError`] and render
//! themselves; these only stop the process from starting.

use autopromote_auth::{ConfigError, VerifyError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Auth configuration error: {0}")]
    Auth(#[from] ConfigError),

    #[error("Verifier setup failed: {0}")]
    Verifier(#[from] VerifyError),
}

pub type AppResult<T> = Result<T, AppError>;
