//! Effective role resolution.
//!
//! Three sources can claim a caller is an admin: the admins set, the cached
//! user record, and the token claims. The admins set is authoritative. Claims
//! can promote a cached record; a cached admin record with no backing from
//! either other source is demoted.
//!
//! [`reconcile_role`] makes the decision without touching the store, and
//! [`RoleResolver`] performs the lookups and the write-back.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::claims::{Claims, ADMIN_ROLE, USER_ROLE};
use crate::context::{AuthenticatedUser, IdentitySource};
use crate::store::{AdminRecord, RoleUpdate, StoreError, UserRecord, UserStore};

/// Admin record fields that are identity attributes rather than profile data.
const RESERVED_FIELDS: [&str; 4] = ["email", "name", "role", "isAdmin"];

/// Store mutation required to make the cached user record consistent.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteBack {
    Create(UserRecord),
    Promote(RoleUpdate),
    Demote(RoleUpdate),
}

/// Result of reconciling the three role sources.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub role: String,
    pub is_admin: bool,
    pub source: IdentitySource,
    pub email: Option<String>,
    pub name: Option<String>,
    pub profile: Map<String, Value>,
    pub write_back: Option<WriteBack>,
}

impl Reconciliation {
    pub fn into_user(self, uid: impl Into<String>) -> AuthenticatedUser {
        let mut user = AuthenticatedUser::new(uid, self.role, self.is_admin, self.source)
            .with_email(self.email);
        user.name = self.name;
        user.profile = self.profile;
        user
    }
}

/// Decide the effective role for `claims.sub`.
///
/// Pure and idempotent: applying the returned write-back and reconciling
/// again yields no further write-back.
pub fn reconcile_role(
    claims: &Claims,
    admin: Option<&AdminRecord>,
    user: Option<&UserRecord>,
    now: DateTime<Utc>,
) -> Reconciliation {
    if let Some(admin) = admin {
        let field = |key: &str| {
            admin
                .fields
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        let profile = admin
            .fields
            .iter()
            .filter(|(key, _)| !RESERVED_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        return Reconciliation {
            role: ADMIN_ROLE.to_string(),
            is_admin: true,
            source: IdentitySource::Admins,
            email: field("email").or_else(|| claims.email.clone()),
            name: field("name").or_else(|| claims.name.clone()),
            profile,
            write_back: None,
        };
    }

    let claims_admin = claims.asserts_admin();

    let Some(stored) = user else {
        let record = UserRecord {
            role: if claims_admin { ADMIN_ROLE } else { USER_ROLE }.to_string(),
            is_admin: claims_admin,
            email: claims.email.clone(),
            name: claims.display_name(),
            created_at: Some(now),
            ..UserRecord::default()
        };
        return Reconciliation {
            role: record.role.clone(),
            is_admin: record.is_admin,
            source: IdentitySource::Users,
            email: record.email.clone(),
            name: record.name.clone(),
            profile: Map::new(),
            write_back: Some(WriteBack::Create(record)),
        };
    };

    let mut record = stored.clone();
    let write_back = if claims_admin && record.role != ADMIN_ROLE {
        let update = RoleUpdate {
            role: ADMIN_ROLE.to_string(),
            is_admin: true,
            updated_at: now,
        };
        update.apply(&mut record);
        Some(WriteBack::Promote(update))
    } else if !claims_admin && record.role == ADMIN_ROLE {
        let update = RoleUpdate {
            role: USER_ROLE.to_string(),
            is_admin: false,
            updated_at: now,
        };
        update.apply(&mut record);
        Some(WriteBack::Demote(update))
    } else {
        None
    };

    // Without an admin record the claims alone decide admin status.
    let (role, is_admin) = if claims_admin {
        (ADMIN_ROLE.to_string(), true)
    } else {
        (record.role.clone(), false)
    };

    Reconciliation {
        role,
        is_admin,
        source: IdentitySource::Users,
        email: record.email.clone().or_else(|| claims.email.clone()),
        name: record.name.clone().or_else(|| claims.name.clone()),
        profile: record.extra,
        write_back,
    }
}

/// Resolves identities against the backing store.
///
/// Never fails: when the store is unavailable the identity is derived from
/// the claims alone and nothing is persisted.
#[derive(Clone)]
pub struct RoleResolver {
    store: Arc<dyn UserStore>,
}

impl RoleResolver {
    #[must_use]
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, claims: &Claims, credential: &str) -> AuthenticatedUser {
        let user = match self.try_resolve(claims).await {
            Ok(user) => user,
            Err(err) => {
                error!(
                    uid = %claims.sub,
                    error = %err,
                    "Backing store error during role resolution, using token claims only"
                );
                AuthenticatedUser::from_claims(claims)
            }
        };
        user.with_credential(credential)
    }

    async fn try_resolve(&self, claims: &Claims) -> Result<AuthenticatedUser, StoreError> {
        let uid = claims.sub.as_str();

        let admin = self.store.get_admin(uid).await?;
        let user = match admin {
            Some(_) => None,
            None => self.store.get_user(uid).await?,
        };

        let reconciliation = reconcile_role(claims, admin.as_ref(), user.as_ref(), Utc::now());

        match &reconciliation.write_back {
            Some(WriteBack::Create(record)) => {
                self.store.create_user(uid, record).await?;
                debug!(uid = %uid, role = %record.role, "Created user record");
            }
            Some(WriteBack::Promote(update)) => {
                self.store.update_user(uid, update).await?;
                info!(uid = %uid, "Promoted user record to admin from token claims");
            }
            Some(WriteBack::Demote(update)) => {
                self.store.update_user(uid, update).await?;
                info!(
                    uid = %uid,
                    "Demoted stale admin user record, no admin claim or admin entry"
                );
            }
            None => {}
        }

        Ok(reconciliation.into_user(uid))
    }
}
