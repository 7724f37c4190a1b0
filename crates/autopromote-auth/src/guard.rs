//! Admin-only route guard.

use axum::{body::Body, extract::Request, middleware::Next, response::Response};

use crate::context::AuthenticatedUser;
use crate::error::GatewayError;

/// Middleware that lets only admins through.
///
/// Must run after the gateway layer, which attaches the
/// [`AuthenticatedUser`].
///
/// ```rust,ignore
/// let admin = Router::new()
///     .route("/internal/auth/diagnostics", get(diagnostics))
///     .layer(middleware::from_fn(require_admin))
///     .layer(gateway.layer());
/// ```
///
/// # Errors
///
/// - [`GatewayError::Unauthenticated`] (401) when no identity is attached
/// - [`GatewayError::Forbidden`] (403) when the caller is not an admin
pub async fn require_admin(request: Request<Body>, next: Next) -> Result<Response, GatewayError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or(GatewayError::Unauthenticated)?;

    if !user.is_admin {
        tracing::warn!(
            uid = %user.uid,
            role = %user.role,
            "Access denied: admin required"
        );
        return Err(GatewayError::Forbidden);
    }

    tracing::debug!(uid = %user.uid, "Admin access granted");

    Ok(next.run(request).await)
}
