//! The caller's resolved identity.

use autopromote_auth::{AuthenticatedUser, RequestContext};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub user: AuthenticatedUser,
    pub address: String,
}

pub async fn me_handler(context: RequestContext) -> Json<MeResponse> {
    Json(MeResponse {
        user: context.user,
        address: context.address,
    })
}
