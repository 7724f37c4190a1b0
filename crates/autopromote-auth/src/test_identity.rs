//! Test-only identities for integration environments without an identity
//! provider.
//!
//! Compiled only with the `test-bypass` feature. Default builds contain no
//! code path that accepts an unverified credential.

use crate::claims::{ADMIN_ROLE, USER_ROLE};
use crate::context::{AuthenticatedUser, IdentitySource};

/// Credential prefix recognized by [`TestIdentityProvider`].
pub const TEST_TOKEN_PREFIX: &str = "test-token-for-";

/// Synthesizes identities from `test-token-for-<uid>` credentials.
#[derive(Debug, Clone, Default)]
pub struct TestIdentityProvider;

impl TestIdentityProvider {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Identity for a test credential, or `None` for anything else.
    ///
    /// The uid is the credential suffix; the caller is an admin iff the uid
    /// contains `admin` in any case.
    pub fn identify(&self, credential: &str) -> Option<AuthenticatedUser> {
        let uid = credential.strip_prefix(TEST_TOKEN_PREFIX)?;
        if uid.is_empty() {
            return None;
        }

        let is_admin = uid.to_lowercase().contains(ADMIN_ROLE);
        let role = if is_admin { ADMIN_ROLE } else { USER_ROLE };

        Some(
            AuthenticatedUser::new(uid, role, is_admin, IdentitySource::Test)
                .with_email(Some(format!("{uid}@example.com")))
                .with_credential(credential),
        )
    }
}
