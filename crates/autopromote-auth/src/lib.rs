//! Request authentication and abuse mitigation for the AutoPromote API.
//!
//! Every protected route passes through [`AuthGateway`] before its handler
//! runs. The gateway:
//!
//! - extracts a bearer credential from the request ([`credential`]),
//! - sheds load from addresses that keep sending bad credentials ([`abuse`]),
//! - verifies the credential through a pluggable [`IdentityVerifier`],
//! - reconciles the caller's effective role from the admin registry, the
//!   cached user record and the token claims ([`role`]),
//! - attaches a [`RequestContext`] to the request for downstream handlers.
//!
//! [`RateLimiter`] is a standalone token-bucket throttle that any route can
//! layer on top of the gateway.
//!
//! # Example
//!
//! ```rust,ignore
//! use autopromote_auth::{AuthConfig, AuthGateway, InMemoryUserStore, JwtVerifier};
//! use std::sync::Arc;
//!
//! let gateway = AuthGateway::builder(
//!     AuthConfig::from_env()?,
//!     Arc::new(JwtVerifier::from_secret(b"secret")),
//!     Arc::new(InMemoryUserStore::new()),
//! )
//! .build()?;
//!
//! let app = Router::new()
//!     .route("/me", get(me))
//!     .layer(gateway.layer());
//! ```

pub mod abuse;
pub mod claims;
pub mod config;
pub mod context;
pub mod credential;
pub mod error;
pub mod gateway;
pub mod guard;
pub mod rate_limit;
pub mod role;
pub mod store;
#[cfg(feature = "test-bypass")]
pub mod test_identity;
pub mod verifier;

pub use abuse::{AbuseSnapshot, AbuseStore, FailureKind, InMemoryAbuseStore};
pub use claims::{Audience, Claims};
pub use config::{AbuseThresholds, AuthConfig, ConfigError, LimitConfig};
pub use context::{AuthenticatedUser, IdentitySource, RequestContext};
pub use credential::{client_address, extract_credential, CredentialInfo, TrustedProxies};
pub use error::{ErrorResponse, GatewayError};
pub use gateway::{is_public_path, AuthGateway, AuthGatewayBuilder, AuthLayer, InboundRequest};
pub use guard::require_admin;
pub use rate_limit::{BucketStore, InMemoryBucketStore, RateDecision, RateLimitLayer, RateLimiter};
pub use role::{reconcile_role, Reconciliation, RoleResolver, WriteBack};
pub use store::{AdminRecord, InMemoryUserStore, RoleUpdate, StoreError, UserRecord, UserStore};
#[cfg(feature = "test-bypass")]
pub use test_identity::TestIdentityProvider;
pub use verifier::{IdentityVerifier, JwtVerifier, VerifyError};
