//! Typed control-plane mutations.
//!
//! Builds [`Command`]s for the admin API and bootstrap, stamps them with a
//! logical timestamp and submits them through the cluster log. Nothing here
//! writes to the store directly.
use crate::cluster::{Applied, ClusterError, SharedLog};
use crate::model::{AdminRecord, ClaimDefinition, Client, Scope, Tenant};
use crate::store::{FsStore, RotateKeysPayload};
use hellojohn_authz::{generate_signing_key, now_epoch_seconds};
use hellojohn_consensus::{Command, CommandKind, RejectReason};
use hellojohn_crypto::SecretBox;
use serde::Serialize;
use serde_json::Value;

#[derive(Clone)]
pub struct ControlPlane {
    store: FsStore,
    log: SharedLog,
}

impl ControlPlane {
    pub fn new(store: FsStore, log: SharedLog) -> Self {
        Self { store, log }
    }

    pub fn store(&self) -> &FsStore {
        &self.store
    }

    pub fn is_leader(&self) -> bool {
        self.log.is_leader()
    }

    pub async fn upsert_tenant(
        &self,
        tenant: &Tenant,
        if_match: Option<String>,
    ) -> Result<Applied, ClusterError> {
        self.submit(CommandKind::UpsertTenant, None, &tenant.slug, tenant, if_match)
            .await
    }

    pub async fn delete_tenant(
        &self,
        slug: &str,
        if_match: Option<String>,
    ) -> Result<Applied, ClusterError> {
        self.submit(CommandKind::DeleteTenant, Some(slug), slug, &Value::Null, if_match)
            .await
    }

    pub async fn upsert_client(
        &self,
        slug: &str,
        client: &Client,
        if_match: Option<String>,
    ) -> Result<Applied, ClusterError> {
        self.submit(CommandKind::UpsertClient, Some(slug), &client.client_id, client, if_match)
            .await
    }

    pub async fn delete_client(
        &self,
        slug: &str,
        client_id: &str,
        if_match: Option<String>,
    ) -> Result<Applied, ClusterError> {
        self.submit(CommandKind::DeleteClient, Some(slug), client_id, &Value::Null, if_match)
            .await
    }

    pub async fn upsert_scope(
        &self,
        slug: &str,
        scope: &Scope,
        if_match: Option<String>,
    ) -> Result<Applied, ClusterError> {
        self.submit(CommandKind::UpsertScope, Some(slug), &scope.name, scope, if_match)
            .await
    }

    pub async fn delete_scope(
        &self,
        slug: &str,
        name: &str,
        if_match: Option<String>,
    ) -> Result<Applied, ClusterError> {
        self.submit(CommandKind::DeleteScope, Some(slug), name, &Value::Null, if_match)
            .await
    }

    pub async fn upsert_claim(
        &self,
        slug: &str,
        claim: &ClaimDefinition,
        if_match: Option<String>,
    ) -> Result<Applied, ClusterError> {
        self.submit(CommandKind::UpsertClaim, Some(slug), &claim.name, claim, if_match)
            .await
    }

    pub async fn delete_claim(
        &self,
        slug: &str,
        name: &str,
        if_match: Option<String>,
    ) -> Result<Applied, ClusterError> {
        self.submit(CommandKind::DeleteClaim, Some(slug), name, &Value::Null, if_match)
            .await
    }

    pub async fn upsert_admin(&self, admin: &AdminRecord) -> Result<Applied, ClusterError> {
        self.submit(CommandKind::UpsertAdmin, None, &admin.id.to_string(), admin, None)
            .await
    }

    pub async fn delete_admin(&self, id: &str) -> Result<Applied, ClusterError> {
        self.submit(CommandKind::DeleteAdmin, None, id, &Value::Null, None)
            .await
    }

    /// Generate a key on this node and replicate it as the tenant's new
    /// active key. Returns the new kid.
    pub async fn rotate_keys(
        &self,
        slug: &str,
        grace_seconds: i64,
        sealer: &SecretBox,
    ) -> Result<String, ClusterError> {
        self.install_key(slug, grace_seconds, false, sealer).await
    }

    /// Install a first key if the tenant has none. Returns the active kid.
    pub async fn ensure_initial_key(
        &self,
        slug: &str,
        sealer: &SecretBox,
    ) -> Result<String, ClusterError> {
        if let Ok(keys) = self.store.keys(slug)
            && let Some(active) = keys.value.active()
        {
            return Ok(active.kid.clone());
        }
        self.install_key(slug, 0, true, sealer).await
    }

    pub async fn revoke_key(&self, slug: &str, kid: &str) -> Result<Applied, ClusterError> {
        self.submit(CommandKind::RevokeKey, Some(slug), kid, &Value::Null, None)
            .await
    }

    async fn install_key(
        &self,
        slug: &str,
        grace_seconds: i64,
        initial: bool,
        sealer: &SecretBox,
    ) -> Result<String, ClusterError> {
        if !self.log.is_leader() {
            return Err(ClusterError::NotLeader {
                leader_id: self.log.leader_id(),
                leader_addr: None,
            });
        }
        let now = now_epoch_seconds();
        let key = generate_signing_key(sealer, now).map_err(|err| ClusterError::Rejected {
            reason: RejectReason::Invalid,
            message: err.to_string(),
        })?;
        let payload = RotateKeysPayload {
            key,
            grace_seconds: grace_seconds.max(0),
            initial,
        };
        let applied = self
            .submit(CommandKind::RotateKeys, Some(slug), "", &payload, None)
            .await?;
        let kid = applied
            .value
            .get("kid")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        tracing::info!(tenant = slug, kid = %kid, grace_seconds, initial, "signing key installed");
        Ok(kid)
    }

    async fn submit<T: Serialize>(
        &self,
        kind: CommandKind,
        tenant: Option<&str>,
        key: &str,
        payload: &T,
        if_match: Option<String>,
    ) -> Result<Applied, ClusterError> {
        let payload = serde_json::to_value(payload).map_err(|err| ClusterError::Rejected {
            reason: RejectReason::Invalid,
            message: err.to_string(),
        })?;
        let command =
            Command::new(kind, tenant, key, payload, now_epoch_seconds()).with_if_match(if_match);
        self.log.submit(command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::LocalLog;
    use hellojohn_crypto::MasterKey;
    use std::sync::Arc;

    fn control() -> (tempfile::TempDir, ControlPlane) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsStore::open(dir.path()).expect("open");
        let log = Arc::new(LocalLog::new(1, store.clone()));
        (dir, ControlPlane::new(store, log))
    }

    #[tokio::test]
    async fn initial_key_is_idempotent() {
        let (_dir, control) = control();
        let sealer = SecretBox::new(MasterKey::generate());
        control
            .upsert_tenant(&Tenant::new("acme", "Acme", 0), None)
            .await
            .expect("tenant");
        let first = control.ensure_initial_key("acme", &sealer).await.expect("key");
        let second = control.ensure_initial_key("acme", &sealer).await.expect("key");
        assert_eq!(first, second);

        let rotated = control.rotate_keys("acme", 30, &sealer).await.expect("rotate");
        assert_ne!(rotated, first);
        let keys = control.store().keys("acme").expect("keys").value;
        assert_eq!(keys.active().map(|k| k.kid.as_str()), Some(rotated.as_str()));
        assert_eq!(keys.keys.len(), 2);
    }

    #[tokio::test]
    async fn revoking_the_active_key_conflicts() {
        let (_dir, control) = control();
        let sealer = SecretBox::new(MasterKey::generate());
        control
            .upsert_tenant(&Tenant::new("acme", "Acme", 0), None)
            .await
            .expect("tenant");
        let kid = control.ensure_initial_key("acme", &sealer).await.expect("key");
        match control.revoke_key("acme", &kid).await {
            Err(ClusterError::Rejected { reason, .. }) => assert_eq!(reason, RejectReason::Conflict),
            other => panic!("expected conflict, got {other:?}"),
        }
    }
}
