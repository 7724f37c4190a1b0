//! Admin view of abuse counters and blocks.

use autopromote_auth::{abuse::DEFAULT_SNAPSHOT_TOP_N, AbuseSnapshot, AuthenticatedUser};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::info;

use crate::state::AppState;

const MAX_TOP_N: usize = 500;

#[derive(Debug, Default, Deserialize)]
pub struct SnapshotQuery {
    pub top: Option<usize>,
}

/// `GET /internal/auth/diagnostics?top=N`
pub async fn snapshot_handler(
    State(state): State<AppState>,
    Query(query): Query<SnapshotQuery>,
) -> Json<AbuseSnapshot> {
    let top_n = query.top.unwrap_or(DEFAULT_SNAPSHOT_TOP_N).min(MAX_TOP_N);
    Json(state.gateway.snapshot(top_n))
}

/// `POST /internal/auth/diagnostics/reset`: clears counters, blocks and totals.
pub async fn reset_handler(State(state): State<AppState>, admin: AuthenticatedUser) -> StatusCode {
    state.gateway.abuse().reset();
    info!(uid = %admin.uid, "Abuse diagnostics reset");
    StatusCode::NO_CONTENT
}
