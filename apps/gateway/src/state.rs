//! Shared application state.

use autopromote_auth::{
    AuthConfig, AuthGateway, IdentityVerifier, InMemoryUserStore, JwtVerifier, RateLimiter,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::config::{GatewayConfig, SeedConfig, VerifierConfig};
use crate::error::{AppError, AppResult};

/// Scope label of the limiter applied to every protected route.
pub const GLOBAL_SCOPE: &str = "global";

#[derive(Clone)]
pub struct AppState {
    pub gateway: AuthGateway,
    pub limiter: RateLimiter,
    pub started_at: Instant,
    pub version: &'static str,
}

impl AppState {
    pub fn new(gateway: AuthGateway, limiter: RateLimiter) -> Self {
        Self {
            gateway,
            limiter,
            started_at: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Wire the gateway from file and environment configuration.
    pub fn from_config(config: &GatewayConfig, auth: AuthConfig) -> AppResult<Self> {
        let verifier = build_verifier(&config.auth.verifier, config.auth.leeway_secs)?;
        let store = Arc::new(seed_store(&config.seed));
        let limiter = RateLimiter::from_config(&auth.global_limit, GLOBAL_SCOPE);

        let builder = AuthGateway::builder(auth, verifier, store);

        #[cfg(feature = "test-bypass")]
        let builder = {
            warn!("Test credentials are ENABLED; this build must not serve production traffic");
            builder.test_identities(autopromote_auth::TestIdentityProvider::new())
        };

        Ok(Self::new(builder.build()?, limiter))
    }
}

fn build_verifier(
    config: &VerifierConfig,
    leeway_secs: u64,
) -> AppResult<Arc<dyn IdentityVerifier>> {
    let verifier = match config {
        VerifierConfig::Rs256 { public_key_path } => {
            let pem = std::fs::read(public_key_path).map_err(|e| {
                AppError::Config(format!("Failed to read public key {public_key_path}: {e}"))
            })?;
            JwtVerifier::from_rsa_pem(&pem)?
        }
        VerifierConfig::Hs256 { secret_env } => {
            let secret = std::env::var(secret_env)
                .map_err(|_| AppError::Config(format!("{secret_env} is not set")))?;
            if secret.is_empty() {
                warn!(var = %secret_env, "HS256 secret is empty");
            }
            JwtVerifier::from_secret(secret.as_bytes())
        }
    };
    Ok(Arc::new(verifier.with_leeway(leeway_secs)))
}

/// In-memory store preloaded with the configured records.
pub fn seed_store(seed: &SeedConfig) -> InMemoryUserStore {
    let store = InMemoryUserStore::new();
    for (uid, record) in &seed.users {
        store.insert_user(uid.clone(), record.clone());
    }
    for (uid, record) in &seed.admins {
        store.insert_admin(uid.clone(), record.clone());
    }
    if store.user_count() + store.admin_count() > 0 {
        info!(
            users = store.user_count(),
            admins = store.admin_count(),
            "Seeded user store"
        );
    }
    store
}
