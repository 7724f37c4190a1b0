//! Per-request identity attached by the gateway.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

use crate::claims::Claims;
use crate::error::GatewayError;

/// Which source of truth decided the caller's role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    /// Authoritative admins set.
    Admins,
    /// Cached user record.
    Users,
    /// Token claims only (backing store unavailable).
    Claims,
    /// Synthesized from a test credential.
    Test,
}

/// The caller's effective identity.
///
/// The raw credential is kept for request-scoped use (forwarding to
/// downstream services) but never serialized and redacted from `Debug`.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedUser {
    pub uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub role: String,
    pub is_admin: bool,
    pub source: IdentitySource,
    /// Extra profile fields from the record that decided the role.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub profile: Map<String, Value>,
    #[serde(skip)]
    credential: Option<String>,
}

impl AuthenticatedUser {
    pub fn new(
        uid: impl Into<String>,
        role: impl Into<String>,
        is_admin: bool,
        source: IdentitySource,
    ) -> Self {
        Self {
            uid: uid.into(),
            email: None,
            name: None,
            role: role.into(),
            is_admin,
            source,
            profile: Map::new(),
            credential: None,
        }
    }

    /// Identity derived from claims alone.
    pub fn from_claims(claims: &Claims) -> Self {
        Self {
            email: claims.email.clone(),
            name: claims.name.clone(),
            ..Self::new(
                claims.sub.clone(),
                claims.claimed_role(),
                claims.asserts_admin(),
                IdentitySource::Claims,
            )
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    #[must_use]
    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    /// The credential this identity was verified from.
    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }
}

impl fmt::Debug for AuthenticatedUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedUser")
            .field("uid", &self.uid)
            .field("email", &self.email)
            .field("name", &self.name)
            .field("role", &self.role)
            .field("is_admin", &self.is_admin)
            .field("source", &self.source)
            .field("profile", &self.profile)
            .field("credential", &self.credential.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Normalized request metadata plus the resolved identity.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub user_id: String,
    pub user: AuthenticatedUser,
    /// Best-effort client network address.
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    pub path: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or(GatewayError::Unauthenticated)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or(GatewayError::Unauthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, http::StatusCode, routing::get, Router};
    use tower::ServiceExt;

    #[test]
    fn test_from_claims() {
        let claims = Claims::builder()
            .subject("Z")
            .email("z@example.com")
            .admin(true)
            .build();
        let user = AuthenticatedUser::from_claims(&claims);
        assert_eq!(user.uid, "Z");
        assert_eq!(user.role, "admin");
        assert!(user.is_admin);
        assert_eq!(user.source, IdentitySource::Claims);
    }

    #[test]
    fn test_credential_is_redacted() {
        let user = AuthenticatedUser::new("u1", "user", false, IdentitySource::Users)
            .with_credential("eyJsecret-material");

        let debug = format!("{user:?}");
        assert!(!debug.contains("secret-material"));
        assert!(debug.contains("[REDACTED]"));

        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("secret-material"));
        assert!(json.contains("\"isAdmin\":false"));

        assert_eq!(user.credential(), Some("eyJsecret-material"));
    }

    async fn whoami(user: AuthenticatedUser) -> String {
        user.uid
    }

    #[tokio::test]
    async fn test_extractor_rejects_without_context() {
        let app = Router::new().route("/", get(whoami));
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_extractor_reads_extension() {
        let app = Router::new().route("/", get(whoami));
        let mut request = Request::builder().uri("/").body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(AuthenticatedUser::new("u9", "user", false, IdentitySource::Users));

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"u9");
    }
}
