//! HTTP routes.
//!
//! `/health` is public. Everything else runs behind the auth gateway and the
//! global rate limiter; `/internal/auth/*` additionally requires an admin.

pub mod diagnostics;
pub mod health;
pub mod me;

use autopromote_auth::{require_admin, RateLimitLayer};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn router(state: AppState, public_paths: Vec<String>) -> Router {
    let admin = Router::new()
        .route("/internal/auth/diagnostics", get(diagnostics::snapshot_handler))
        .route("/internal/auth/diagnostics/reset", post(diagnostics::reset_handler))
        .route_layer(middleware::from_fn(require_admin));

    let protected = Router::new()
        .route("/me", get(me::me_handler))
        .merge(admin)
        .layer(
            RateLimitLayer::new(state.limiter.clone())
                .with_trusted_proxies(state.gateway.config().trusted_proxies.clone()),
        );

    let auth = state.gateway.layer().with_public_paths(public_paths);

    Router::new()
        .route("/health", get(health::health_handler))
        .merge(protected)
        .layer(auth)
        .with_state(state)
}
