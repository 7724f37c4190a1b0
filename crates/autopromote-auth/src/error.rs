//! Gateway error types and HTTP response handling.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Terminal outcomes of the authentication gateway.
///
/// Every variant maps to a 401, 403 or 429 response. The `Display` text is
/// meant for logs; clients only ever see [`GatewayError::error_code`] and
/// [`GatewayError::client_message`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("no credential provided")]
    NoCredential,

    #[error("credential does not look like an identity token")]
    MalformedCredential,

    #[error("identity token has expired")]
    ExpiredCredential,

    #[error("identity token failed verification")]
    InvalidCredential,

    #[error("token audience does not match the expected audience")]
    AudienceMismatch,

    #[error("token issuer does not match the expected issuer")]
    IssuerMismatch,

    #[error("address is temporarily blocked for {retry_after}s")]
    Blocked { retry_after: u64 },

    #[error("rate limit exceeded")]
    RateLimited { retry_after: Option<u64> },

    /// No authenticated context on a route that needs one.
    #[error("authentication required")]
    Unauthenticated,

    #[error("admin access required")]
    Forbidden,
}

/// Structured error response returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl GatewayError {
    /// Machine-readable error code placed in the `error` field.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NoCredential => "no_token",
            Self::MalformedCredential => "invalid_token_format",
            Self::ExpiredCredential => "token_expired",
            Self::InvalidCredential => "invalid_token",
            Self::AudienceMismatch => "invalid_audience",
            Self::IssuerMismatch => "invalid_issuer",
            Self::Blocked { .. } => "ip_blocked",
            Self::RateLimited { .. } => "rate_limited",
            Self::Unauthenticated => "unauthorized",
            Self::Forbidden => "forbidden",
        }
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NoCredential
            | Self::MalformedCredential
            | Self::ExpiredCredential
            | Self::InvalidCredential
            | Self::AudienceMismatch
            | Self::IssuerMismatch
            | Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Blocked { .. } | Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Forbidden => StatusCode::FORBIDDEN,
        }
    }

    /// Short message safe to return to clients.
    ///
    /// Only an expired credential gets a message telling the caller what to
    /// do about it.
    pub fn client_message(&self) -> &'static str {
        match self {
            Self::NoCredential => "No token provided",
            Self::MalformedCredential => {
                "Please exchange your custom token for an ID token before making authenticated requests"
            }
            Self::ExpiredCredential => "Token expired. Refresh your ID token and retry the request",
            Self::InvalidCredential => "Invalid token",
            Self::AudienceMismatch => "Token audience mismatch",
            Self::IssuerMismatch => "Token issuer mismatch",
            Self::Blocked { .. } => "Temporarily blocked due to repeated invalid auth attempts",
            Self::RateLimited { .. } => "Rate limit exceeded",
            Self::Unauthenticated => "Authentication required",
            Self::Forbidden => "Admin access required",
        }
    }

    /// Seconds the caller should wait before retrying, when computable.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::Blocked { retry_after } => Some(*retry_after),
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.error_code().to_string(),
            message: self.client_message().to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = self.to_response();

        let mut response = (status, Json(body)).into_response();

        if let Some(retry_after) = self.retry_after() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(GatewayError::NoCredential.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            GatewayError::MalformedCredential.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::ExpiredCredential.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::AudienceMismatch.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::Blocked { retry_after: 600 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GatewayError::RateLimited { retry_after: None }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(GatewayError::Forbidden.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(GatewayError::NoCredential.error_code(), "no_token");
        assert_eq!(
            GatewayError::MalformedCredential.error_code(),
            "invalid_token_format"
        );
        assert_eq!(GatewayError::ExpiredCredential.error_code(), "token_expired");
        assert_eq!(GatewayError::InvalidCredential.error_code(), "invalid_token");
        assert_eq!(GatewayError::AudienceMismatch.error_code(), "invalid_audience");
        assert_eq!(GatewayError::IssuerMismatch.error_code(), "invalid_issuer");
        assert_eq!(
            GatewayError::Blocked { retry_after: 1 }.error_code(),
            "ip_blocked"
        );
        assert_eq!(
            GatewayError::RateLimited { retry_after: Some(1) }.error_code(),
            "rate_limited"
        );
    }

    #[test]
    fn test_only_expired_mentions_refresh() {
        assert!(GatewayError::ExpiredCredential
            .client_message()
            .contains("Refresh"));
        assert!(!GatewayError::InvalidCredential
            .client_message()
            .contains("Refresh"));
    }

    #[test]
    fn test_retry_after_header() {
        let response = GatewayError::RateLimited {
            retry_after: Some(7),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "7");

        let response = GatewayError::RateLimited { retry_after: None }.into_response();
        assert!(response.headers().get(header::RETRY_AFTER).is_none());

        let response = GatewayError::InvalidCredential.into_response();
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[tokio::test]
    async fn test_response_body() {
        let response = GatewayError::NoCredential.into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.error, "no_token");
        assert_eq!(parsed.message, "No token provided");
    }
}
