//! Tenant data plane: users, refresh tokens, sessions, consents, linked
//! identities, email tokens and RBAC assignments.
//!
//! # Purpose
//! Each tenant may own a user store. Repositories are reached through a
//! [`TenantDatabase`] handle produced by an [`AdapterDriver`] and pooled per
//! tenant by [`TenantPool`]. When a tenant has no store configured the pool
//! answers [`DataError::NoDatabase`], so control-plane and discovery routes
//! keep working.
//!
//! # Secrets at rest
//! Refresh tokens, session ids and email tokens are stored only as
//! `base64url(SHA-256(raw))`. Raw values never reach a repository.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hellojohn_authz::RolePermission;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

pub mod memory;
pub mod pool;

pub use memory::MemoryDriver;
pub use pool::{AdapterRegistry, PoolSettings, TenantPool};

#[derive(Debug, Error)]
pub enum DataError {
    #[error("tenant has no user store configured")]
    NoDatabase,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("user store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type DataResult<T> = Result<T, DataError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(default, skip_serializing)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_until: Option<DateTime<Utc>>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub custom_fields: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: impl Into<String>, password_hash: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            password_hash,
            email_verified: false,
            name: None,
            given_name: None,
            family_name: None,
            picture: None,
            locale: None,
            language: None,
            disabled_until: None,
            metadata: Map::new(),
            custom_fields: Map::new(),
            created_at: now,
        }
    }

    pub fn is_disabled(&self, now: DateTime<Utc>) -> bool {
        self.disabled_until.is_some_and(|until| until > now)
    }

    /// Value of a named profile field, for claim mapping.
    pub fn field(&self, name: &str) -> Option<Value> {
        let text = |value: &Option<String>| value.clone().map(Value::String);
        match name {
            "email" => Some(Value::String(self.email.clone())),
            "email_verified" => Some(Value::Bool(self.email_verified)),
            "name" => text(&self.name),
            "given_name" => text(&self.given_name),
            "family_name" => text(&self.family_name),
            "picture" => text(&self.picture),
            "locale" => text(&self.locale),
            "language" => text(&self.language),
            other => self.custom_fields.get(other).cloned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub client_id: String,
    pub user_id: String,
    pub token_hash: String,
    /// Shared by every token descended from the same grant.
    pub family_id: Uuid,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub amr: Vec<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RefreshTokenRecord {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && now < self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id_hash: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub revoked_by: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl SessionRecord {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && now < self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ConsentRecord {
    pub user_id: Uuid,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub granted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl ConsentRecord {
    /// Whether every requested scope was already approved.
    pub fn covers<'a>(&self, requested: impl IntoIterator<Item = &'a str>) -> bool {
        if self.revoked_at.is_some() {
            return false;
        }
        requested
            .into_iter()
            .all(|scope| self.scopes.iter().any(|granted| granted == scope))
    }
}

/// External identity linked to a user (social login, federation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub subject: String,
    #[serde(default)]
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailTokenPurpose {
    VerifyEmail,
    PasswordReset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailToken {
    pub token_hash: String,
    pub user_id: Uuid,
    pub purpose: EmailTokenPurpose,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert; `Conflict` when the email is taken (case-insensitive).
    async fn create(&self, user: User) -> DataResult<User>;
    async fn get(&self, id: Uuid) -> DataResult<User>;
    async fn find_by_email(&self, email: &str) -> DataResult<Option<User>>;
    async fn list(&self) -> DataResult<Vec<User>>;
    async fn update(&self, user: User) -> DataResult<User>;
    async fn set_disabled_until(&self, id: Uuid, until: Option<DateTime<Utc>>) -> DataResult<User>;
    async fn delete(&self, id: Uuid) -> DataResult<()>;
}

#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    /// Insert; `Conflict` if the hash already exists.
    async fn insert(&self, record: RefreshTokenRecord) -> DataResult<()>;
    async fn get_by_hash(&self, token_hash: &str) -> DataResult<Option<RefreshTokenRecord>>;
    /// Mark revoked. Returns `true` only for the call that flipped it.
    async fn revoke(&self, id: Uuid, at: DateTime<Utc>) -> DataResult<bool>;
    async fn revoke_family(&self, family_id: Uuid, at: DateTime<Utc>) -> DataResult<usize>;
    async fn revoke_all_by_user(&self, user_id: &str, at: DateTime<Utc>) -> DataResult<usize>;
    async fn revoke_all_by_client(&self, client_id: &str, at: DateTime<Utc>) -> DataResult<usize>;
    async fn revoke_all(&self, at: DateTime<Utc>) -> DataResult<usize>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: SessionRecord) -> DataResult<()>;
    async fn get(&self, id_hash: &str) -> DataResult<Option<SessionRecord>>;
    async fn update_activity(&self, id_hash: &str, at: DateTime<Utc>) -> DataResult<()>;
    async fn revoke(&self, id_hash: &str, by: &str, reason: &str, at: DateTime<Utc>) -> DataResult<bool>;
    async fn revoke_all_by_user(&self, user_id: Uuid, by: &str, at: DateTime<Utc>) -> DataResult<usize>;
}

#[async_trait]
pub trait ConsentRepository: Send + Sync {
    /// Merge `scopes` into the stored set and clear any revocation.
    async fn upsert(
        &self,
        user_id: Uuid,
        client_id: &str,
        scopes: &[String],
        at: DateTime<Utc>,
    ) -> DataResult<ConsentRecord>;
    async fn get(&self, user_id: Uuid, client_id: &str) -> DataResult<Option<ConsentRecord>>;
    async fn list(&self, user_id: Option<Uuid>) -> DataResult<Vec<ConsentRecord>>;
    /// Empty the scope set and stamp `revoked_at`.
    async fn revoke(&self, user_id: Uuid, client_id: &str, at: DateTime<Utc>) -> DataResult<bool>;
    /// Whether any live consent includes `scope`.
    async fn scope_in_use(&self, scope: &str) -> DataResult<bool>;
    async fn delete_all(&self) -> DataResult<usize>;
}

#[async_trait]
pub trait IdentityRepository: Send + Sync {
    async fn link(&self, identity: Identity) -> DataResult<()>;
    async fn find(&self, provider: &str, subject: &str) -> DataResult<Option<Identity>>;
    async fn list_for_user(&self, user_id: Uuid) -> DataResult<Vec<Identity>>;
}

#[async_trait]
pub trait EmailTokenRepository: Send + Sync {
    async fn create(&self, token: EmailToken) -> DataResult<()>;
    /// One-shot: returns the token once if it is unexpired, then forgets it.
    async fn consume(&self, token_hash: &str, now: DateTime<Utc>) -> DataResult<Option<EmailToken>>;
}

#[async_trait]
pub trait RbacRepository: Send + Sync {
    async fn role_permissions(&self) -> DataResult<Vec<RolePermission>>;
    async fn set_role_permissions(&self, role: &str, permissions: &[String]) -> DataResult<()>;
    async fn delete_role(&self, role: &str) -> DataResult<bool>;
    async fn user_roles(&self, user_id: Uuid) -> DataResult<Vec<String>>;
    async fn set_user_roles(&self, user_id: Uuid, roles: &[String]) -> DataResult<()>;
}

/// One connection to a tenant's user store.
#[async_trait]
pub trait TenantDatabase: Send + Sync {
    fn users(&self) -> &dyn UserRepository;
    fn refresh_tokens(&self) -> &dyn RefreshTokenRepository;
    fn sessions(&self) -> &dyn SessionRepository;
    fn consents(&self) -> &dyn ConsentRepository;
    fn identities(&self) -> &dyn IdentityRepository;
    fn email_tokens(&self) -> &dyn EmailTokenRepository;
    fn rbac(&self) -> &dyn RbacRepository;
    async fn ping(&self) -> DataResult<()>;
    /// Delete sessions and email tokens that can no longer be used, and
    /// expired refresh tokens. Refresh tokens revoked before
    /// `revoked_before` go too; later ones stay so a replay is still
    /// recognised as reuse. Returns how many rows were removed.
    async fn purge_stale(
        &self,
        now: DateTime<Utc>,
        revoked_before: DateTime<Utc>,
    ) -> DataResult<usize>;
    async fn close(&self);
}

/// Opens tenant databases for one storage driver name.
#[async_trait]
pub trait AdapterDriver: Send + Sync {
    fn name(&self) -> &'static str;
    async fn connect(&self, dsn: &str) -> DataResult<Arc<dyn TenantDatabase>>;
}

/// Sorted, de-duplicated scope list.
pub fn normalize_scopes<'a>(scopes: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    scopes
        .into_iter()
        .filter(|scope| !scope.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consent_covers_subsets_only() {
        let consent = ConsentRecord {
            user_id: Uuid::new_v4(),
            client_id: "web".to_string(),
            scopes: normalize_scopes(["openid", "email", "profile"]),
            granted_at: Utc::now(),
            revoked_at: None,
        };
        assert!(consent.covers(["openid", "email"]));
        assert!(!consent.covers(["openid", "offline_access"]));

        let revoked = ConsentRecord {
            revoked_at: Some(Utc::now()),
            ..consent
        };
        assert!(!revoked.covers(["openid"]));
    }

    #[test]
    fn disabled_until_is_time_bound() {
        let now = Utc::now();
        let mut user = User::new("a@example.com", None, now);
        assert!(!user.is_disabled(now));
        user.disabled_until = Some(now + chrono::Duration::minutes(5));
        assert!(user.is_disabled(now));
        assert!(!user.is_disabled(now + chrono::Duration::minutes(6)));
    }
}
