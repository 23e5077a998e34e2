#![allow(dead_code)]

use authserver::app::{AppState, build_router, build_state};
use authserver::bootstrap;
use authserver::cluster::{LocalLog, SharedLog};
use authserver::config::AuthServerConfig;
use authserver::data::{TenantDatabase, User};
use authserver::model::client::{
    GRANT_AUTHORIZATION_CODE, GRANT_CLIENT_CREDENTIALS, GRANT_REFRESH_TOKEN,
};
use authserver::model::{Client, ClientType};
use authserver::store::FsStore;
use axum::Router;
use axum::response::Response;
use chrono::Utc;
use hellojohn_crypto::hash_password;
use std::sync::Arc;
use tempfile::TempDir;

pub const ADMIN_EMAIL: &str = "root@example.com";
pub const ADMIN_PASSWORD: &str = "admin-password-1";
pub const USER_EMAIL: &str = "alice@example.com";
pub const USER_PASSWORD: &str = "alice-password-1";
pub const WEB_REDIRECT: &str = "http://localhost:3000/callback";
pub const SERVICE_SECRET: &str = "service-secret-value";

pub async fn read_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

pub struct TestApp {
    pub dir: TempDir,
    pub state: AppState,
    pub router: Router,
    pub user_id: uuid::Uuid,
}

pub fn test_config(dir: &TempDir) -> AuthServerConfig {
    let mut config = AuthServerConfig::local(dir.path());
    config.storage_driver = Some("memory".to_string());
    config.storage_dsn = Some("memory://tests".to_string());
    config.admin_email = Some(ADMIN_EMAIL.to_string());
    config.admin_password = Some(ADMIN_PASSWORD.to_string());
    config.rate_limit_per_minute = 10_000;
    config.rate_limit_burst = 10_000;
    config
}

/// Provisioned single-node server: default tenant `local`, bootstrap admin,
/// a public `web` client, a confidential `svc` client and user alice.
pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

/// [`spawn_app`] with config adjustments applied before the state is built.
pub async fn spawn_app_with(configure: impl FnOnce(&mut AuthServerConfig)) -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = test_config(&dir);
    configure(&mut config);
    let store = FsStore::open(dir.path()).expect("store");
    let log: SharedLog = Arc::new(LocalLog::new(1, store.clone()));
    let state = build_state(config, store, log, None);
    bootstrap::provision(&state).await.expect("bootstrap");

    let web = Client {
        client_id: "web".to_string(),
        name: "Web App".to_string(),
        client_type: ClientType::Public,
        redirect_uris: vec![WEB_REDIRECT.to_string()],
        allowed_origins: vec!["http://localhost:3000".to_string()],
        grant_types: vec![
            GRANT_AUTHORIZATION_CODE.to_string(),
            GRANT_REFRESH_TOKEN.to_string(),
        ],
        scopes: vec![
            "openid".to_string(),
            "email".to_string(),
            "profile".to_string(),
        ],
        secret_sealed: None,
        access_ttl_seconds: None,
        refresh_ttl_seconds: None,
        id_ttl_seconds: None,
        enabled: true,
    };
    state
        .control
        .upsert_client("local", &web, None)
        .await
        .expect("web client");

    let svc = Client {
        client_id: "svc".to_string(),
        name: "Backend Service".to_string(),
        client_type: ClientType::Confidential,
        redirect_uris: Vec::new(),
        allowed_origins: Vec::new(),
        grant_types: vec![GRANT_CLIENT_CREDENTIALS.to_string()],
        scopes: vec!["reports:read".to_string()],
        secret_sealed: Some(state.secretbox.seal_str(SERVICE_SECRET).expect("seal")),
        access_ttl_seconds: None,
        refresh_ttl_seconds: None,
        id_ttl_seconds: None,
        enabled: true,
    };
    state
        .control
        .upsert_client("local", &svc, None)
        .await
        .expect("svc client");

    let db = state.pool.get("local").await.expect("tenant db");
    let mut user = User::new(
        USER_EMAIL,
        Some(hash_password(USER_PASSWORD).expect("hash")),
        Utc::now(),
    );
    user.name = Some("Alice".to_string());
    let user = db.users().create(user).await.expect("user");

    let router = build_router(state.clone());
    TestApp {
        dir,
        state,
        router,
        user_id: user.id,
    }
}
