//! In-memory tenant data adapter.
//!
//! Registered as driver `memory`. Data lives as long as the driver, keyed by
//! DSN, so a pooled connection that is closed and reopened sees the same
//! rows. Not durable across restarts; intended for development and tests.
use super::{
    AdapterDriver, ConsentRecord, ConsentRepository, DataError, DataResult, EmailToken,
    EmailTokenRepository, Identity, IdentityRepository, RbacRepository, RefreshTokenRecord,
    RefreshTokenRepository, SessionRecord, SessionRepository, TenantDatabase, User,
    UserRepository, normalize_scopes,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hellojohn_authz::RolePermission;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct MemoryData {
    users: RwLock<HashMap<Uuid, User>>,
    /// Keyed by token hash; the hash is the uniqueness constraint.
    refresh_tokens: RwLock<HashMap<String, RefreshTokenRecord>>,
    sessions: RwLock<HashMap<String, SessionRecord>>,
    consents: RwLock<HashMap<(Uuid, String), ConsentRecord>>,
    identities: RwLock<HashMap<(String, String), Identity>>,
    email_tokens: RwLock<HashMap<String, EmailToken>>,
    roles: RwLock<BTreeMap<String, Vec<String>>>,
    user_roles: RwLock<HashMap<Uuid, Vec<String>>>,
}

#[derive(Default)]
pub struct MemoryDriver {
    databases: DashMap<String, Arc<MemoryData>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AdapterDriver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self, dsn: &str) -> DataResult<Arc<dyn TenantDatabase>> {
        let data = self
            .databases
            .entry(dsn.to_string())
            .or_insert_with(|| Arc::new(MemoryData::default()))
            .clone();
        Ok(Arc::new(MemoryConnection {
            data,
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct MemoryConnection {
    data: Arc<MemoryData>,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn check_open(&self) -> DataResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DataError::Unavailable("connection closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TenantDatabase for MemoryConnection {
    fn users(&self) -> &dyn UserRepository {
        self
    }

    fn refresh_tokens(&self) -> &dyn RefreshTokenRepository {
        self
    }

    fn sessions(&self) -> &dyn SessionRepository {
        self
    }

    fn consents(&self) -> &dyn ConsentRepository {
        self
    }

    fn identities(&self) -> &dyn IdentityRepository {
        self
    }

    fn email_tokens(&self) -> &dyn EmailTokenRepository {
        self
    }

    fn rbac(&self) -> &dyn RbacRepository {
        self
    }

    async fn ping(&self) -> DataResult<()> {
        self.check_open()
    }

    async fn purge_stale(
        &self,
        now: DateTime<Utc>,
        revoked_before: DateTime<Utc>,
    ) -> DataResult<usize> {
        self.check_open()?;
        let mut purged = 0;
        {
            let mut tokens = self.data.refresh_tokens.write().await;
            let before = tokens.len();
            tokens.retain(|_, record| {
                now < record.expires_at && record.revoked_at.is_none_or(|at| at >= revoked_before)
            });
            purged += before - tokens.len();
        }
        {
            let mut sessions = self.data.sessions.write().await;
            let before = sessions.len();
            sessions.retain(|_, session| session.is_active(now));
            purged += before - sessions.len();
        }
        let mut email_tokens = self.data.email_tokens.write().await;
        let before = email_tokens.len();
        email_tokens.retain(|_, token| now < token.expires_at);
        purged += before - email_tokens.len();
        Ok(purged)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[async_trait]
impl UserRepository for MemoryConnection {
    async fn create(&self, user: User) -> DataResult<User> {
        self.check_open()?;
        let mut users = self.data.users.write().await;
        if users
            .values()
            .any(|existing| existing.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(DataError::Conflict(format!("email {} already registered", user.email)));
        }
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get(&self, id: Uuid) -> DataResult<User> {
        self.check_open()?;
        self.data
            .users
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| DataError::NotFound(format!("user {id}")))
    }

    async fn find_by_email(&self, email: &str) -> DataResult<Option<User>> {
        self.check_open()?;
        Ok(self
            .data
            .users
            .read()
            .await
            .values()
            .find(|user| user.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn list(&self) -> DataResult<Vec<User>> {
        self.check_open()?;
        let mut users: Vec<User> = self.data.users.read().await.values().cloned().collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.email.cmp(&b.email)));
        Ok(users)
    }

    async fn update(&self, user: User) -> DataResult<User> {
        self.check_open()?;
        let mut users = self.data.users.write().await;
        if users
            .values()
            .any(|other| other.id != user.id && other.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(DataError::Conflict(format!("email {} already registered", user.email)));
        }
        let slot = users
            .get_mut(&user.id)
            .ok_or_else(|| DataError::NotFound(format!("user {}", user.id)))?;
        *slot = user.clone();
        Ok(user)
    }

    async fn set_disabled_until(&self, id: Uuid, until: Option<DateTime<Utc>>) -> DataResult<User> {
        self.check_open()?;
        let mut users = self.data.users.write().await;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| DataError::NotFound(format!("user {id}")))?;
        user.disabled_until = until;
        Ok(user.clone())
    }

    async fn delete(&self, id: Uuid) -> DataResult<()> {
        self.check_open()?;
        self.data
            .users
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| DataError::NotFound(format!("user {id}")))
    }
}

#[async_trait]
impl RefreshTokenRepository for MemoryConnection {
    async fn insert(&self, record: RefreshTokenRecord) -> DataResult<()> {
        self.check_open()?;
        let mut tokens = self.data.refresh_tokens.write().await;
        if tokens.contains_key(&record.token_hash) {
            return Err(DataError::Conflict("refresh token hash exists".to_string()));
        }
        tokens.insert(record.token_hash.clone(), record);
        Ok(())
    }

    async fn get_by_hash(&self, token_hash: &str) -> DataResult<Option<RefreshTokenRecord>> {
        self.check_open()?;
        Ok(self.data.refresh_tokens.read().await.get(token_hash).cloned())
    }

    async fn revoke(&self, id: Uuid, at: DateTime<Utc>) -> DataResult<bool> {
        self.check_open()?;
        let mut tokens = self.data.refresh_tokens.write().await;
        match tokens.values_mut().find(|record| record.id == id) {
            Some(record) if record.revoked_at.is_none() => {
                record.revoked_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_family(&self, family_id: Uuid, at: DateTime<Utc>) -> DataResult<usize> {
        self.revoke_where(at, |record| record.family_id == family_id).await
    }

    async fn revoke_all_by_user(&self, user_id: &str, at: DateTime<Utc>) -> DataResult<usize> {
        self.revoke_where(at, |record| record.user_id == user_id).await
    }

    async fn revoke_all_by_client(&self, client_id: &str, at: DateTime<Utc>) -> DataResult<usize> {
        self.revoke_where(at, |record| record.client_id == client_id).await
    }

    async fn revoke_all(&self, at: DateTime<Utc>) -> DataResult<usize> {
        self.revoke_where(at, |_| true).await
    }
}

impl MemoryConnection {
    async fn revoke_where(
        &self,
        at: DateTime<Utc>,
        matches: impl Fn(&RefreshTokenRecord) -> bool + Send,
    ) -> DataResult<usize> {
        self.check_open()?;
        let mut tokens = self.data.refresh_tokens.write().await;
        let mut revoked = 0;
        for record in tokens
            .values_mut()
            .filter(|record| record.revoked_at.is_none() && matches(record))
        {
            record.revoked_at = Some(at);
            revoked += 1;
        }
        Ok(revoked)
    }
}

#[async_trait]
impl SessionRepository for MemoryConnection {
    async fn create(&self, session: SessionRecord) -> DataResult<()> {
        self.check_open()?;
        let mut sessions = self.data.sessions.write().await;
        if sessions.contains_key(&session.id_hash) {
            return Err(DataError::Conflict("session exists".to_string()));
        }
        sessions.insert(session.id_hash.clone(), session);
        Ok(())
    }

    async fn get(&self, id_hash: &str) -> DataResult<Option<SessionRecord>> {
        self.check_open()?;
        Ok(self.data.sessions.read().await.get(id_hash).cloned())
    }

    async fn update_activity(&self, id_hash: &str, at: DateTime<Utc>) -> DataResult<()> {
        self.check_open()?;
        if let Some(session) = self.data.sessions.write().await.get_mut(id_hash) {
            session.last_activity_at = at;
        }
        Ok(())
    }

    async fn revoke(&self, id_hash: &str, by: &str, reason: &str, at: DateTime<Utc>) -> DataResult<bool> {
        self.check_open()?;
        let mut sessions = self.data.sessions.write().await;
        match sessions.get_mut(id_hash) {
            Some(session) if session.revoked_at.is_none() => {
                session.revoked_at = Some(at);
                session.revoked_by = Some(by.to_string());
                session.reason = Some(reason.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_by_user(&self, user_id: Uuid, by: &str, at: DateTime<Utc>) -> DataResult<usize> {
        self.check_open()?;
        let mut sessions = self.data.sessions.write().await;
        let mut revoked = 0;
        for session in sessions
            .values_mut()
            .filter(|session| session.user_id == user_id && session.revoked_at.is_none())
        {
            session.revoked_at = Some(at);
            session.revoked_by = Some(by.to_string());
            session.reason = Some("revoked_by_admin".to_string());
            revoked += 1;
        }
        Ok(revoked)
    }
}

#[async_trait]
impl ConsentRepository for MemoryConnection {
    async fn upsert(
        &self,
        user_id: Uuid,
        client_id: &str,
        scopes: &[String],
        at: DateTime<Utc>,
    ) -> DataResult<ConsentRecord> {
        self.check_open()?;
        let mut consents = self.data.consents.write().await;
        let record = consents
            .entry((user_id, client_id.to_string()))
            .or_insert_with(|| ConsentRecord {
                user_id,
                client_id: client_id.to_string(),
                scopes: Vec::new(),
                granted_at: at,
                revoked_at: None,
            });
        let merged = normalize_scopes(
            record
                .scopes
                .iter()
                .map(String::as_str)
                .chain(scopes.iter().map(String::as_str)),
        );
        record.scopes = merged;
        record.granted_at = at;
        record.revoked_at = None;
        Ok(record.clone())
    }

    async fn get(&self, user_id: Uuid, client_id: &str) -> DataResult<Option<ConsentRecord>> {
        self.check_open()?;
        Ok(self
            .data
            .consents
            .read()
            .await
            .get(&(user_id, client_id.to_string()))
            .cloned())
    }

    async fn list(&self, user_id: Option<Uuid>) -> DataResult<Vec<ConsentRecord>> {
        self.check_open()?;
        let mut consents: Vec<ConsentRecord> = self
            .data
            .consents
            .read()
            .await
            .values()
            .filter(|record| user_id.is_none_or(|id| record.user_id == id))
            .cloned()
            .collect();
        consents.sort_by(|a, b| a.client_id.cmp(&b.client_id).then(a.user_id.cmp(&b.user_id)));
        Ok(consents)
    }

    async fn revoke(&self, user_id: Uuid, client_id: &str, at: DateTime<Utc>) -> DataResult<bool> {
        self.check_open()?;
        let mut consents = self.data.consents.write().await;
        match consents.get_mut(&(user_id, client_id.to_string())) {
            Some(record) if record.revoked_at.is_none() => {
                record.scopes.clear();
                record.revoked_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn scope_in_use(&self, scope: &str) -> DataResult<bool> {
        self.check_open()?;
        Ok(self.data.consents.read().await.values().any(|record| {
            record.revoked_at.is_none() && record.scopes.iter().any(|granted| granted == scope)
        }))
    }

    async fn delete_all(&self) -> DataResult<usize> {
        self.check_open()?;
        let mut consents = self.data.consents.write().await;
        let removed = consents.len();
        consents.clear();
        Ok(removed)
    }
}

#[async_trait]
impl IdentityRepository for MemoryConnection {
    async fn link(&self, identity: Identity) -> DataResult<()> {
        self.check_open()?;
        let key = (identity.provider.clone(), identity.subject.clone());
        let mut identities = self.data.identities.write().await;
        if let Some(existing) = identities.get(&key)
            && existing.user_id != identity.user_id
        {
            return Err(DataError::Conflict(format!(
                "{} identity already linked",
                identity.provider
            )));
        }
        identities.insert(key, identity);
        Ok(())
    }

    async fn find(&self, provider: &str, subject: &str) -> DataResult<Option<Identity>> {
        self.check_open()?;
        Ok(self
            .data
            .identities
            .read()
            .await
            .get(&(provider.to_string(), subject.to_string()))
            .cloned())
    }

    async fn list_for_user(&self, user_id: Uuid) -> DataResult<Vec<Identity>> {
        self.check_open()?;
        Ok(self
            .data
            .identities
            .read()
            .await
            .values()
            .filter(|identity| identity.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EmailTokenRepository for MemoryConnection {
    async fn create(&self, token: EmailToken) -> DataResult<()> {
        self.check_open()?;
        self.data
            .email_tokens
            .write()
            .await
            .insert(token.token_hash.clone(), token);
        Ok(())
    }

    async fn consume(&self, token_hash: &str, now: DateTime<Utc>) -> DataResult<Option<EmailToken>> {
        self.check_open()?;
        let token = self.data.email_tokens.write().await.remove(token_hash);
        Ok(token.filter(|token| now < token.expires_at))
    }
}

#[async_trait]
impl RbacRepository for MemoryConnection {
    async fn role_permissions(&self) -> DataResult<Vec<RolePermission>> {
        self.check_open()?;
        Ok(self
            .data
            .roles
            .read()
            .await
            .iter()
            .flat_map(|(role, permissions)| {
                permissions.iter().map(move |permission| RolePermission {
                    role: role.clone(),
                    permission: permission.clone(),
                })
            })
            .collect())
    }

    async fn set_role_permissions(&self, role: &str, permissions: &[String]) -> DataResult<()> {
        self.check_open()?;
        let permissions = normalize_scopes(permissions.iter().map(String::as_str));
        self.data
            .roles
            .write()
            .await
            .insert(role.to_string(), permissions);
        Ok(())
    }

    async fn delete_role(&self, role: &str) -> DataResult<bool> {
        self.check_open()?;
        let removed = self.data.roles.write().await.remove(role).is_some();
        if removed {
            for roles in self.data.user_roles.write().await.values_mut() {
                roles.retain(|assigned| assigned != role);
            }
        }
        Ok(removed)
    }

    async fn user_roles(&self, user_id: Uuid) -> DataResult<Vec<String>> {
        self.check_open()?;
        Ok(self
            .data
            .user_roles
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_user_roles(&self, user_id: Uuid, roles: &[String]) -> DataResult<()> {
        self.check_open()?;
        let roles = normalize_scopes(roles.iter().map(String::as_str));
        self.data.user_roles.write().await.insert(user_id, roles);
        Ok(())
    }
}
