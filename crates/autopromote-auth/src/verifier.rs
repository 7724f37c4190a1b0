//! Identity token verification.
//!
//! The gateway only depends on [`IdentityVerifier`]. [`JwtVerifier`] is the
//! shipped implementation for RS256 (identity provider public key) or HS256
//! (shared secret) tokens.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use thiserror::Error;

use crate::claims::Claims;

/// Default clock skew tolerance in seconds.
pub const DEFAULT_LEEWAY_SECS: u64 = 60;

/// Classified verification failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("token has expired")]
    Expired,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("token audience mismatch")]
    AudienceMismatch,

    #[error("token issuer mismatch")]
    IssuerMismatch,

    #[error("verification failed: {0}")]
    Other(String),
}

impl VerifyError {
    /// Short, stable label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            VerifyError::Expired => "expired",
            VerifyError::Malformed(_) => "malformed",
            VerifyError::Invalid(_) => "invalid",
            VerifyError::AudienceMismatch => "audience_mismatch",
            VerifyError::IssuerMismatch => "issuer_mismatch",
            VerifyError::Other(_) => "other",
        }
    }
}

/// Verifies a raw credential and returns the claims it carries.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<Claims, VerifyError>;
}

/// JWT verifier backed by `jsonwebtoken`.
///
/// Audience and issuer are not checked here; the gateway enforces them when
/// configured.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("algorithms", &self.validation.algorithms)
            .field("leeway", &self.validation.leeway)
            .finish_non_exhaustive()
    }
}

impl JwtVerifier {
    /// Verify RS256 tokens against a PEM-encoded RSA public key.
    pub fn from_rsa_pem(public_key_pem: &[u8]) -> Result<Self, VerifyError> {
        let key = DecodingKey::from_rsa_pem(public_key_pem)
            .map_err(|e| VerifyError::Other(format!("invalid public key: {e}")))?;
        Ok(Self::new(key, Algorithm::RS256))
    }

    /// Verify HS256 tokens against a shared secret.
    #[must_use]
    pub fn from_secret(secret: &[u8]) -> Self {
        Self::new(DecodingKey::from_secret(secret), Algorithm::HS256)
    }

    fn new(key: DecodingKey, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.algorithms = vec![algorithm];
        validation.leeway = DEFAULT_LEEWAY_SECS;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self { key, validation }
    }

    /// Set the clock skew tolerance for `exp`.
    #[must_use]
    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.validation.leeway = leeway_secs;
        self
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, credential: &str) -> Result<Claims, VerifyError> {
        let token_data: TokenData<Claims> =
            decode(credential, &self.key, &self.validation).map_err(map_jwt_error)?;
        Ok(token_data.claims)
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> VerifyError {
    use jsonwebtoken::errors::ErrorKind;

    match err.kind() {
        ErrorKind::ExpiredSignature => VerifyError::Expired,
        ErrorKind::InvalidAudience => VerifyError::AudienceMismatch,
        ErrorKind::InvalidIssuer => VerifyError::IssuerMismatch,
        ErrorKind::InvalidToken => VerifyError::Malformed("malformed token".to_string()),
        ErrorKind::Base64(_) => VerifyError::Malformed("invalid base64 encoding".to_string()),
        ErrorKind::Json(_) => VerifyError::Malformed("invalid JSON in claims".to_string()),
        ErrorKind::Utf8(_) => VerifyError::Malformed("invalid UTF-8 in token".to_string()),
        ErrorKind::InvalidSignature => VerifyError::Invalid("invalid signature".to_string()),
        ErrorKind::InvalidAlgorithm => VerifyError::Invalid("unexpected algorithm".to_string()),
        ErrorKind::ImmatureSignature => VerifyError::Invalid("token not yet valid".to_string()),
        ErrorKind::MissingRequiredClaim(claim) => {
            VerifyError::Invalid(format!("missing required claim: {claim}"))
        }
        _ => VerifyError::Other(err.to_string()),
    }
}
