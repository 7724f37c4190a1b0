//! Gateway configuration loading and types.
//!
//! Process-level settings come from a YAML file. Authentication tuning
//! (thresholds, audience, limiter defaults) is read from the environment by
//! [`autopromote_auth::AuthConfig::from_env`].

use autopromote_auth::{AdminRecord, UserRecord};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Root gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub auth: AuthSection,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub seed: SeedConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Authentication settings that belong to the deployment, not the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    pub verifier: VerifierConfig,
    #[serde(default = "default_leeway")]
    pub leeway_secs: u64,
    /// Served without authentication. A trailing `*` matches a prefix.
    #[serde(default = "default_public_paths")]
    pub public_paths: Vec<String>,
}

fn default_leeway() -> u64 {
    60
}

fn default_public_paths() -> Vec<String> {
    vec!["/health".to_string()]
}

/// Where the token verification key comes from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum VerifierConfig {
    /// RS256 public key in a PEM file.
    Rs256 { public_key_path: String },
    /// HS256 shared secret read from the named environment variable.
    Hs256 { secret_env: String },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info,autopromote_auth=info".to_string()
}

/// Background pruning of abuse counters and limiter buckets.
#[derive(Debug, Clone, Deserialize)]
pub struct MaintenanceConfig {
    #[serde(default = "default_prune_interval")]
    pub prune_interval_secs: u64,
    /// Buckets untouched for this long are dropped.
    #[serde(default = "default_bucket_idle")]
    pub bucket_idle_secs: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            prune_interval_secs: default_prune_interval(),
            bucket_idle_secs: default_bucket_idle(),
        }
    }
}

fn default_prune_interval() -> u64 {
    60
}

fn default_bucket_idle() -> u64 {
    600
}

impl MaintenanceConfig {
    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }

    pub fn bucket_idle(&self) -> Duration {
        Duration::from_secs(self.bucket_idle_secs)
    }
}

/// Records loaded into the in-memory user store at startup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedConfig {
    #[serde(default)]
    pub users: HashMap<String, UserRecord>,
    #[serde(default)]
    pub admins: HashMap<String, AdminRecord>,
}

impl GatewayConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            AppError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(content: &str) -> AppResult<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Get the configuration file path from environment or default.
    pub fn config_path() -> String {
        std::env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "./config/gateway.yaml".to_string())
    }

    /// Apply environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("GATEWAY_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("GATEWAY_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    fn validate(&self) -> AppResult<()> {
        if self.maintenance.prune_interval_secs == 0 {
            return Err(AppError::Config(
                "maintenance.prune_interval_secs must be greater than zero".to_string(),
            ));
        }
        match &self.auth.verifier {
            VerifierConfig::Rs256 { public_key_path } if public_key_path.is_empty() => Err(
                AppError::Config("auth.verifier.public_key_path is empty".to_string()),
            ),
            VerifierConfig::Hs256 { secret_env } if secret_env.is_empty() => Err(
                AppError::Config("auth.verifier.secret_env is empty".to_string()),
            ),
            _ => Ok(()),
        }
    }
}
