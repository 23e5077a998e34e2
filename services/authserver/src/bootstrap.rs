//! First-start provisioning.
//!
//! Run on the leader only. Each step is idempotent so every restart may
//! repeat it: the default tenant, its first signing key, and a system admin
//! when `ADMIN_EMAIL`/`ADMIN_PASSWORD` are set and no admin exists yet.
use crate::app::AppState;
use crate::model::{AdminRecord, AdminRole, Tenant};
use anyhow::{Context, Result};
use hellojohn_authz::now_epoch_seconds;
use hellojohn_crypto::hash_password;
use uuid::Uuid;

pub async fn provision(state: &AppState) -> Result<()> {
    if !state.log.is_leader() {
        tracing::debug!("not the leader; skipping bootstrap");
        return Ok(());
    }
    ensure_default_tenant(state).await?;
    ensure_bootstrap_admin(state).await?;
    Ok(())
}

async fn ensure_default_tenant(state: &AppState) -> Result<()> {
    let slug = state.config.default_tenant.as_str();
    if state.store.find_tenant(slug).is_none() {
        let tenant = Tenant::new(slug, slug, now_epoch_seconds());
        state
            .control
            .upsert_tenant(&tenant, None)
            .await
            .context("create default tenant")?;
        tracing::info!(tenant = slug, "default tenant created");
    }
    let kid = state
        .control
        .ensure_initial_key(slug, &state.signing_sealer)
        .await
        .context("install default tenant key")?;
    tracing::debug!(tenant = slug, kid = %kid, "default tenant key ready");
    Ok(())
}

async fn ensure_bootstrap_admin(state: &AppState) -> Result<()> {
    let (Some(email), Some(password)) = (
        state.config.admin_email.as_deref(),
        state.config.admin_password.as_deref(),
    ) else {
        return Ok(());
    };
    if !state.store.admins().is_empty() {
        return Ok(());
    }
    let admin = AdminRecord {
        id: Uuid::new_v4(),
        email: email.trim().to_lowercase(),
        password_hash: hash_password(password).context("hash bootstrap admin password")?,
        role: AdminRole::SysAdmin,
        tenants: Vec::new(),
        disabled: false,
        created_at: now_epoch_seconds(),
    };
    state
        .control
        .upsert_admin(&admin)
        .await
        .context("create bootstrap admin")?;
    tracing::info!(admin_id = %admin.id, "bootstrap admin created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::build_state;
    use crate::cluster::LocalLog;
    use crate::config::AuthServerConfig;
    use crate::store::FsStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn provisioning_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = AuthServerConfig::local(dir.path());
        config.admin_email = Some("Root@Example.com".to_string());
        config.admin_password = Some("correct horse".to_string());
        let store = FsStore::open(dir.path()).expect("store");
        let log = Arc::new(LocalLog::new(1, store.clone()));
        let state = build_state(config, store, log, None);

        provision(&state).await.expect("first run");
        let kid = state.store.keys("local").expect("keys").value.active().map(|k| k.kid.clone());
        provision(&state).await.expect("second run");

        assert_eq!(state.store.tenants().len(), 1);
        assert_eq!(state.store.admins().len(), 1);
        assert!(state.store.admin_by_email("root@example.com").is_some());
        let again = state.store.keys("local").expect("keys").value.active().map(|k| k.kid.clone());
        assert!(kid.is_some());
        assert_eq!(kid, again);
    }
}
