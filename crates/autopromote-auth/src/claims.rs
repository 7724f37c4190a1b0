//! Identity claims asserted by a verified token.
//!
//! Besides the registered JWT claims, the identity provider may attach custom
//! flags: `admin`, the legacy `isAdmin`, and a free-form `role`.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Role string granted to administrators.
pub const ADMIN_ROLE: &str = "admin";

/// Role string for everyone else.
pub const USER_ROLE: &str = "user";

/// The `aud` claim: a single string or a list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    /// Whether `expected` is among the audiences.
    #[must_use]
    pub fn contains(&self, expected: &str) -> bool {
        match self {
            Audience::One(aud) => aud == expected,
            Audience::Many(auds) => auds.iter().any(|aud| aud == expected),
        }
    }
}

/// Decoded identity claims.
///
/// # Example
///
/// ```rust
/// use autopromote_auth::Claims;
///
/// let claims = Claims::builder()
///     .subject("user-123")
///     .email("user-123@example.com")
///     .admin(true)
///     .expires_in_secs(3600)
///     .build();
///
/// assert!(claims.asserts_admin());
/// assert_eq!(claims.claimed_role(), "admin");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    /// Subject id.
    pub sub: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Audience>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Expiration time as Unix timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Issued at as Unix timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin: Option<bool>,

    /// Legacy spelling of the admin flag.
    #[serde(rename = "isAdmin", default, skip_serializing_if = "Option::is_none")]
    pub is_admin: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Claims {
    #[must_use]
    pub fn builder() -> ClaimsBuilder {
        ClaimsBuilder::default()
    }

    /// True iff `admin` or `isAdmin` is literally `true`.
    #[must_use]
    pub fn asserts_admin(&self) -> bool {
        self.admin == Some(true) || self.is_admin == Some(true)
    }

    /// `"admin"` when the claims assert admin, else the claimed role or `"user"`.
    #[must_use]
    pub fn claimed_role(&self) -> String {
        if self.asserts_admin() {
            ADMIN_ROLE.to_string()
        } else {
            self.role.clone().unwrap_or_else(|| USER_ROLE.to_string())
        }
    }

    /// A token without an `aud` claim is not checked.
    #[must_use]
    pub fn audience_mismatch(&self, expected: &str) -> bool {
        self.aud.as_ref().is_some_and(|aud| !aud.contains(expected))
    }

    /// A token without an `iss` claim is not checked.
    #[must_use]
    pub fn issuer_mismatch(&self, expected: &str) -> bool {
        self.iss.as_deref().is_some_and(|iss| iss != expected)
    }

    /// Display name, falling back to the local part of the email.
    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        self.name.clone().or_else(|| {
            self.email
                .as_deref()
                .and_then(|email| email.split('@').next())
                .filter(|local| !local.is_empty())
                .map(str::to_string)
        })
    }
}

/// Builder for constructing claims, mostly in tests and token minting tools.
#[derive(Debug, Default)]
pub struct ClaimsBuilder {
    claims: Claims,
}

impl ClaimsBuilder {
    #[must_use]
    pub fn subject(mut self, sub: impl Into<String>) -> Self {
        self.claims.sub = sub.into();
        self
    }

    #[must_use]
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.claims.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.claims.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn audience(mut self, aud: impl Into<String>) -> Self {
        self.claims.aud = Some(Audience::One(aud.into()));
        self
    }

    #[must_use]
    pub fn issuer(mut self, iss: impl Into<String>) -> Self {
        self.claims.iss = Some(iss.into());
        self
    }

    /// Set expiration time as seconds from now. Negative values produce an
    /// already expired token.
    #[must_use]
    pub fn expires_in_secs(mut self, secs: i64) -> Self {
        let now = Utc::now().timestamp();
        self.claims.iat = Some(now);
        self.claims.exp = Some(now + secs);
        self
    }

    #[must_use]
    pub fn admin(mut self, admin: bool) -> Self {
        self.claims.admin = Some(admin);
        self
    }

    #[must_use]
    pub fn legacy_admin(mut self, is_admin: bool) -> Self {
        self.claims.is_admin = Some(is_admin);
        self
    }

    #[must_use]
    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.claims.role = Some(role.into());
        self
    }

    #[must_use]
    pub fn build(self) -> Claims {
        self.claims
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asserts_admin_flags() {
        assert!(Claims::builder().admin(true).build().asserts_admin());
        assert!(Claims::builder().legacy_admin(true).build().asserts_admin());
        assert!(!Claims::builder().admin(false).build().asserts_admin());
        assert!(!Claims::builder().role("admin").build().asserts_admin());
        assert!(!Claims::default().asserts_admin());
    }

    #[test]
    fn test_claimed_role() {
        assert_eq!(Claims::builder().admin(true).role("editor").build().claimed_role(), "admin");
        assert_eq!(Claims::builder().role("editor").build().claimed_role(), "editor");
        assert_eq!(Claims::default().claimed_role(), "user");
    }

    #[test]
    fn test_deserialize_provider_shape() {
        let json = r#"{
            "sub": "abc123",
            "user_id": "abc123",
            "email": "a@example.com",
            "aud": "autopromote",
            "iss": "https://issuer.example.com",
            "exp": 1900000000,
            "iat": 1800000000,
            "isAdmin": true,
            "firebase": {"sign_in_provider": "password"}
        }"#;
        let claims: Claims = serde_json::from_str(json).unwrap();
        assert_eq!(claims.sub, "abc123");
        assert_eq!(claims.is_admin, Some(true));
        assert!(claims.admin.is_none());
        assert!(claims.asserts_admin());
        assert_eq!(claims.aud, Some(Audience::One("autopromote".to_string())));
    }

    #[test]
    fn test_audience_list() {
        let json = r#"{"sub": "x", "aud": ["a", "b"]}"#;
        let claims: Claims = serde_json::from_str(json).unwrap();
        assert!(!claims.audience_mismatch("b"));
        assert!(claims.audience_mismatch("c"));
    }

    #[test]
    fn test_missing_aud_and_iss_are_not_mismatches() {
        let claims = Claims::builder().subject("x").build();
        assert!(!claims.audience_mismatch("anything"));
        assert!(!claims.issuer_mismatch("anything"));

        let claims = Claims::builder().subject("x").issuer("a").build();
        assert!(claims.issuer_mismatch("b"));
        assert!(!claims.issuer_mismatch("a"));
    }

    #[test]
    fn test_display_name_falls_back_to_email() {
        let claims = Claims::builder().email("jordan@example.com").build();
        assert_eq!(claims.display_name().as_deref(), Some("jordan"));

        let claims = Claims::builder().name("Jordan").email("j@example.com").build();
        assert_eq!(claims.display_name().as_deref(), Some("Jordan"));

        assert!(Claims::default().display_name().is_none());
    }
}
