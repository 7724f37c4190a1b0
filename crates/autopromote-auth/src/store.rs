//! Backing store of user and admin records.
//!
//! The document store itself lives outside this crate; the gateway only needs
//! the four operations on [`UserStore`]. [`InMemoryUserStore`] backs local
//! development and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

use crate::claims::USER_ROLE;

/// Backing store errors. The gateway recovers from all of them locally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
}

fn default_role() -> String {
    USER_ROLE.to_string()
}

/// Cached user profile keyed by subject id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(default = "default_role")]
    pub role: String,

    #[serde(default)]
    pub is_admin: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    /// Any other profile fields the application stores on the user.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for UserRecord {
    fn default() -> Self {
        Self {
            role: default_role(),
            is_admin: false,
            email: None,
            name: None,
            created_at: None,
            updated_at: None,
            extra: Map::new(),
        }
    }
}

/// Marker in the admins set. Presence alone grants admin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdminRecord {
    /// Free-form profile fields stored with the admin entry.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Partial update applied when a user's role is reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleUpdate {
    pub role: String,
    pub is_admin: bool,
    pub updated_at: DateTime<Utc>,
}

impl RoleUpdate {
    pub fn apply(&self, record: &mut UserRecord) {
        record.role = self.role.clone();
        record.is_admin = self.is_admin;
        record.updated_at = Some(self.updated_at);
    }
}

/// Key-value access to user and admin records.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, uid: &str) -> Result<Option<UserRecord>, StoreError>;

    async fn get_admin(&self, uid: &str) -> Result<Option<AdminRecord>, StoreError>;

    async fn create_user(&self, uid: &str, record: &UserRecord) -> Result<(), StoreError>;

    async fn update_user(&self, uid: &str, update: &RoleUpdate) -> Result<(), StoreError>;
}

/// Process-local [`UserStore`].
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<String, UserRecord>>,
    admins: RwLock<HashMap<String, AdminRecord>>,
}

impl InMemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, uid: impl Into<String>, record: UserRecord) {
        self.users.write().insert(uid.into(), record);
    }

    pub fn insert_admin(&self, uid: impl Into<String>, record: AdminRecord) {
        self.admins.write().insert(uid.into(), record);
    }

    pub fn remove_admin(&self, uid: &str) -> Option<AdminRecord> {
        self.admins.write().remove(uid)
    }

    /// Current stored user record, bypassing the async interface.
    pub fn user(&self, uid: &str) -> Option<UserRecord> {
        self.users.read().get(uid).cloned()
    }

    pub fn user_count(&self) -> usize {
        self.users.read().len()
    }

    pub fn admin_count(&self) -> usize {
        self.admins.read().len()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn get_user(&self, uid: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.users.read().get(uid).cloned())
    }

    async fn get_admin(&self, uid: &str) -> Result<Option<AdminRecord>, StoreError> {
        Ok(self.admins.read().get(uid).cloned())
    }

    async fn create_user(&self, uid: &str, record: &UserRecord) -> Result<(), StoreError> {
        self.users.write().insert(uid.to_string(), record.clone());
        Ok(())
    }

    async fn update_user(&self, uid: &str, update: &RoleUpdate) -> Result<(), StoreError> {
        let mut users = self.users.write();
        let record = users.entry(uid.to_string()).or_default();
        update.apply(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_record_defaults_from_sparse_document() {
        let record: UserRecord = serde_json::from_str(r#"{"email": "a@example.com"}"#).unwrap();
        assert_eq!(record.role, "user");
        assert!(!record.is_admin);
        assert_eq!(record.email.as_deref(), Some("a@example.com"));
    }

    #[test]
    fn test_user_record_keeps_extra_fields() {
        let json = r#"{
            "role": "admin",
            "isAdmin": true,
            "createdAt": "2024-01-01T00:00:00Z",
            "plan": "pro",
            "referralCount": 4
        }"#;
        let record: UserRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.role, "admin");
        assert!(record.is_admin);
        assert!(record.created_at.is_some());
        assert_eq!(record.extra.get("plan"), Some(&Value::from("pro")));
        assert_eq!(record.extra.get("referralCount"), Some(&Value::from(4)));

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["isAdmin"], true);
        assert_eq!(back["plan"], "pro");
    }

    #[tokio::test]
    async fn test_in_memory_roundtrip() {
        let store = InMemoryUserStore::new();
        assert!(store.get_user("u1").await.unwrap().is_none());

        let record = UserRecord {
            email: Some("u1@example.com".into()),
            ..UserRecord::default()
        };
        store.create_user("u1", &record).await.unwrap();
        assert_eq!(store.get_user("u1").await.unwrap(), Some(record));

        let update = RoleUpdate {
            role: "admin".into(),
            is_admin: true,
            updated_at: Utc::now(),
        };
        store.update_user("u1", &update).await.unwrap();
        let stored = store.user("u1").unwrap();
        assert_eq!(stored.role, "admin");
        assert!(stored.is_admin);
        assert_eq!(stored.email.as_deref(), Some("u1@example.com"));
    }

    #[tokio::test]
    async fn test_admin_lookup() {
        let store = InMemoryUserStore::new();
        let mut fields = Map::new();
        fields.insert("displayName".into(), Value::from("Ops"));
        store.insert_admin("root", AdminRecord { fields });

        let admin = store.get_admin("root").await.unwrap().unwrap();
        assert_eq!(admin.fields.get("displayName"), Some(&Value::from("Ops")));
        assert!(store.get_admin("nobody").await.unwrap().is_none());

        store.remove_admin("root");
        assert_eq!(store.admin_count(), 0);
    }
}
