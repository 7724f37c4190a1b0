//! Gateway configuration loaded once at startup.

use std::env::VarError;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::credential::TrustedProxies;

/// Default minimum length of a credential before it is sent to the verifier.
pub const DEFAULT_MIN_TOKEN_LENGTH: usize = 100;

/// Encoded-token prefix every identity token starts with (`{"` in base64url).
pub const DEFAULT_TOKEN_PREFIX: &str = "eyJ";

/// Bucket parameters for a token-bucket limiter.
#[derive(Debug, Clone, PartialEq)]
pub struct LimitConfig {
    /// Maximum tokens held by one bucket. Must be at least one.
    pub capacity: u32,
    /// Tokens added back per second.
    pub refill_per_sec: f64,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            refill_per_sec: 50.0,
        }
    }
}

/// Per-address failure thresholds.
///
/// A threshold is exceeded when the address's failure count in the current
/// window is strictly greater than it.
#[derive(Debug, Clone, PartialEq)]
pub struct AbuseThresholds {
    /// `no_token` failures before the address is blocked.
    pub no_token_block: u64,
    /// Verification failures before the address is blocked.
    pub verify_error_block: u64,
    /// Format failures before the address is throttled (no block).
    pub invalid_format_throttle: u64,
    pub block_duration: Duration,
    /// Idle time after which an address's counter starts over.
    pub failure_window: Duration,
}

impl Default for AbuseThresholds {
    fn default() -> Self {
        Self {
            no_token_block: 50,
            verify_error_block: 80,
            invalid_format_throttle: 120,
            block_duration: Duration::from_secs(600),
            failure_window: Duration::from_secs(60),
        }
    }
}

/// Configuration for the authentication gateway.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Log per-request detail (credential metadata only) at `info`.
    pub debug_auth: bool,

    /// When set, tokens carrying a different `aud` are rejected.
    pub expected_audience: Option<String>,

    /// When set, tokens carrying a different `iss` are rejected.
    pub expected_issuer: Option<String>,

    /// Default limiter parameters used by the binary's global limiter.
    pub global_limit: LimitConfig,

    pub thresholds: AbuseThresholds,

    /// Requests slower than this are logged at `warn`.
    pub slow_request_threshold: Duration,

    pub min_token_length: usize,

    pub token_prefix: String,

    /// Upper bound on a single verification call. Unset means no bound.
    pub verify_timeout: Option<Duration>,

    /// Peers allowed to report the caller's address in `X-Forwarded-For`
    /// or `X-Real-IP`. Empty means the socket peer is always used.
    pub trusted_proxies: TrustedProxies,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            debug_auth: false,
            expected_audience: None,
            expected_issuer: None,
            global_limit: LimitConfig::default(),
            thresholds: AbuseThresholds::default(),
            slow_request_threshold: Duration::from_millis(500),
            min_token_length: DEFAULT_MIN_TOKEN_LENGTH,
            token_prefix: DEFAULT_TOKEN_PREFIX.to_string(),
            verify_timeout: None,
            trusted_proxies: TrustedProxies::default(),
        }
    }
}

impl AuthConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load configuration from a custom variable reader.
    ///
    /// This allows tests to supply variables without mutating process-global
    /// environment state. The result is validated before it is returned.
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let defaults = Self::default();

        let debug_auth = reader("DEBUG_AUTH")
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        let expected_audience = optional(&reader, "JWT_AUDIENCE");
        let expected_issuer = optional(&reader, "JWT_ISSUER");

        let global_limit = LimitConfig {
            capacity: parse_or(
                &reader,
                "RATE_LIMIT_GLOBAL_MAX",
                defaults.global_limit.capacity,
            )?,
            refill_per_sec: parse_or(
                &reader,
                "RATE_LIMIT_GLOBAL_REFILL",
                defaults.global_limit.refill_per_sec,
            )?,
        };

        let thresholds = AbuseThresholds {
            no_token_block: parse_or(
                &reader,
                "AUTH_NO_TOKEN_BLOCK_THRESHOLD",
                defaults.thresholds.no_token_block,
            )?,
            verify_error_block: parse_or(
                &reader,
                "AUTH_VERIFY_ERROR_BLOCK_THRESHOLD",
                defaults.thresholds.verify_error_block,
            )?,
            invalid_format_throttle: parse_or(
                &reader,
                "AUTH_INVALID_FORMAT_THROTTLE_THRESHOLD",
                defaults.thresholds.invalid_format_throttle,
            )?,
            block_duration: Duration::from_secs(parse_or(
                &reader,
                "AUTH_BLOCK_DURATION_SECS",
                defaults.thresholds.block_duration.as_secs(),
            )?),
            failure_window: Duration::from_secs(parse_or(
                &reader,
                "AUTH_FAILURE_WINDOW_SECS",
                defaults.thresholds.failure_window.as_secs(),
            )?),
        };

        let slow_request_threshold = Duration::from_millis(parse_or(
            &reader,
            "AUTH_SLOW_REQUEST_MS",
            500,
        )?);

        let min_token_length =
            parse_or(&reader, "AUTH_MIN_TOKEN_LENGTH", DEFAULT_MIN_TOKEN_LENGTH)?;

        let token_prefix = reader("AUTH_TOKEN_PREFIX").unwrap_or(defaults.token_prefix);

        let verify_timeout = match optional(&reader, "AUTH_VERIFY_TIMEOUT_MS") {
            Some(raw) => Some(Duration::from_millis(raw.parse::<u64>().map_err(|e| {
                ConfigError::InvalidValue("AUTH_VERIFY_TIMEOUT_MS".into(), e.to_string())
            })?)),
            None => None,
        };

        let trusted_proxies = match optional(&reader, "AUTH_TRUSTED_PROXIES") {
            Some(raw) => TrustedProxies::parse(&raw).map_err(|e| {
                ConfigError::InvalidValue("AUTH_TRUSTED_PROXIES".into(), e.to_string())
            })?,
            None => TrustedProxies::default(),
        };

        let config = Self {
            debug_auth,
            expected_audience,
            expected_issuer,
            global_limit,
            thresholds,
            slow_request_threshold,
            min_token_length,
            token_prefix,
            verify_timeout,
            trusted_proxies,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would silently disable or break a protection.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.global_limit.capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "RATE_LIMIT_GLOBAL_MAX".into(),
                "must be greater than zero".into(),
            ));
        }

        let refill = self.global_limit.refill_per_sec;
        if !refill.is_finite() || refill < 0.0 {
            return Err(ConfigError::InvalidValue(
                "RATE_LIMIT_GLOBAL_REFILL".into(),
                format!("must be a finite, non-negative number (got {refill})"),
            ));
        }

        let thresholds = [
            ("AUTH_NO_TOKEN_BLOCK_THRESHOLD", self.thresholds.no_token_block),
            (
                "AUTH_VERIFY_ERROR_BLOCK_THRESHOLD",
                self.thresholds.verify_error_block,
            ),
            (
                "AUTH_INVALID_FORMAT_THROTTLE_THRESHOLD",
                self.thresholds.invalid_format_throttle,
            ),
        ];
        for (name, value) in thresholds {
            if value == 0 {
                return Err(ConfigError::InvalidValue(
                    name.into(),
                    "must be greater than zero".into(),
                ));
            }
        }

        if self.thresholds.block_duration.is_zero() {
            return Err(ConfigError::InvalidValue(
                "AUTH_BLOCK_DURATION_SECS".into(),
                "must be greater than zero".into(),
            ));
        }
        if self.thresholds.failure_window.is_zero() {
            return Err(ConfigError::InvalidValue(
                "AUTH_FAILURE_WINDOW_SECS".into(),
                "must be greater than zero".into(),
            ));
        }
        if self.token_prefix.is_empty() {
            return Err(ConfigError::InvalidValue(
                "AUTH_TOKEN_PREFIX".into(),
                "must not be empty".into(),
            ));
        }
        if matches!(self.verify_timeout, Some(timeout) if timeout.is_zero()) {
            return Err(ConfigError::InvalidValue(
                "AUTH_VERIFY_TIMEOUT_MS".into(),
                "must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}

/// Read a variable, treating an empty value as unset.
fn optional<F>(reader: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    reader(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<F, T>(reader: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
    T: FromStr,
    T::Err: Display,
{
    match optional(reader, key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.into(), e.to_string())),
        None => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}
