//! HTTP application wiring.
//!
//! # Purpose
//! Builds the Axum router, configures middleware, and defines the shared
//! application state injected into handlers.
//!
//! # Notes
//! Every node serves the full router. Control-plane writes reach the
//! cluster log through [`ControlPlane`]; followers refuse or redirect them in
//! the leader gate.
use crate::api;
use crate::api::openapi::ApiDoc;
use crate::cluster::SharedLog;
use crate::config::AuthServerConfig;
use crate::control::ControlPlane;
use crate::data::{AdapterRegistry, PoolSettings, TenantPool};
use crate::keys::KeyService;
use crate::middleware::{
    RateLimiter, access_log, panic_response, rate_limit, request_id, security_headers, tenant_hint,
};
use crate::oauth;
use crate::oauth::introspect::REVOKE_BODY_LIMIT;
use crate::observability;
use crate::store::{ApplyEvent, FsStore};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Json, Router};
use hellojohn_authz::{KEY_CACHE_TTL, TokenIssuer, TokenVerifier};
use hellojohn_consensus::CommandKind;
use hellojohn_crypto::SecretBox;
use hellojohn_storage::{EphemeralCache, HandleCache};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use utoipa::OpenApi;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AuthServerConfig>,
    pub store: FsStore,
    pub control: ControlPlane,
    pub log: SharedLog,
    pub keys: KeyService,
    pub issuer: TokenIssuer,
    pub verifier: TokenVerifier,
    pub cache: Arc<dyn HandleCache>,
    pub pool: Arc<TenantPool>,
    /// Seals client secrets and tenant DSNs.
    pub secretbox: SecretBox,
    /// Seals private signing keys.
    pub signing_sealer: SecretBox,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics: Option<PrometheusHandle>,
}

pub fn build_state(
    config: AuthServerConfig,
    store: FsStore,
    log: SharedLog,
    metrics: Option<PrometheusHandle>,
) -> AppState {
    let secretbox = SecretBox::new(config.secretbox_master_key.clone());
    let signing_sealer = SecretBox::new(config.signing_master_key.clone());
    let keys = KeyService::new(
        store.clone(),
        signing_sealer.clone(),
        config.issuer.clone(),
        KEY_CACHE_TTL,
    );
    let key_store = Arc::new(keys.clone());
    let pool = TenantPool::new(
        store.clone(),
        Arc::new(AdapterRegistry::with_defaults()),
        secretbox.clone(),
        PoolSettings {
            idle_timeout: Duration::from_secs(config.pool_idle_seconds),
            health_interval: Duration::from_secs(config.pool_health_seconds),
            global_driver: config.storage_driver.clone(),
            global_dsn: config.storage_dsn.clone(),
            ..PoolSettings::default()
        },
    );
    AppState {
        control: ControlPlane::new(store.clone(), log.clone()),
        issuer: TokenIssuer::new(key_store.clone()),
        verifier: TokenVerifier::new(key_store, config.token_leeway_seconds),
        cache: Arc::new(EphemeralCache::new()),
        pool: Arc::new(pool),
        rate_limiter: Arc::new(RateLimiter::new(
            config.rate_limit_per_minute,
            config.rate_limit_burst,
            config.trusted_proxies.clone(),
        )),
        metrics: metrics.filter(|_| config.metrics_enabled),
        config: Arc::new(config),
        store,
        log,
        keys,
        secretbox,
        signing_sealer,
    }
}

/// Keep derived state in step with applied commands on this node.
pub fn spawn_apply_listener(state: AppState) -> tokio::task::JoinHandle<()> {
    let mut events = state.store.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => on_applied(&state, event).await,
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "apply events lagged; dropping derived caches");
                    state.keys.invalidate_all();
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn on_applied(state: &AppState, event: ApplyEvent) {
    let Some(tenant) = event.tenant.as_deref() else {
        if event.kind.is_none() {
            state.keys.invalidate_all();
            state.pool.evict_all().await;
        }
        return;
    };
    state.keys.invalidate(tenant);
    if event.kind == Some(CommandKind::DeleteTenant) {
        state.pool.evict(tenant).await;
        match state.cache.purge_tag(tenant).await {
            Ok(purged) => tracing::info!(tenant, purged, "tenant handles purged"),
            Err(err) => tracing::warn!(tenant, error = %err, "tenant handle purge failed"),
        }
    }
}

fn oauth_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/oauth2/authorize",
            get(oauth::authorize::authorize),
        )
        .route("/oauth2/introspect", post(oauth::introspect::introspect))
        .route(
            "/oauth2/revoke",
            post(oauth::introspect::revoke).layer(DefaultBodyLimit::max(REVOKE_BODY_LIMIT)),
        )
        .route("/userinfo", get(oauth::userinfo::userinfo).post(oauth::userinfo::userinfo))
        .route("/v2/auth/consent/accept", post(oauth::authorize::consent_accept))
        .route("/v2/auth/consent/:token", get(oauth::authorize::consent_info))
        .route(
            "/.well-known/openid-configuration",
            get(oauth::discovery::global_discovery),
        )
        .route(
            "/t/:slug/.well-known/openid-configuration",
            get(oauth::discovery::tenant_discovery),
        )
        .route("/.well-known/jwks.json", get(oauth::discovery::global_jwks))
        .route("/.well-known/jwks/:file", get(oauth::discovery::tenant_jwks))
}

/// Routes that accept credentials; rate limited per client address.
fn credential_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/oauth2/token", post(oauth::grants::token))
        .route("/v1/auth/login", post(api::auth::login))
        .route("/v1/auth/refresh", post(api::auth::refresh))
        .route("/v2/session/login", post(api::auth::session_login))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), rate_limit))
}

fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/auth/logout", post(api::auth::logout))
        .route("/v2/csrf", get(api::auth::csrf))
        .route("/v2/session/logout", post(api::auth::session_logout))
}

fn system_routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(api::system::healthz))
        .route("/readyz", get(api::system::readyz))
        .route("/v2/cluster/status", get(api::system::cluster_status))
        .route("/metrics", get(api::system::metrics))
        .route("/v2/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            let parent = observability::trace_context_from_headers(request.headers());
            let span = tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri().path(),
                version = ?request.version()
            );
            span.set_parent(parent);
            span
        });

    Router::new()
        .merge(oauth_routes())
        .merge(credential_routes(&state))
        .merge(session_routes())
        .merge(system_routes())
        .nest("/v2/admin", api::admin::router(state.clone()))
        .nest("/v1/admin", api::admin::router(state.clone()))
        .layer(axum::middleware::from_fn(tenant_hint))
        .layer(axum::middleware::from_fn(security_headers))
        .layer(axum::middleware::from_fn(access_log))
        .layer(trace_layer)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(axum::middleware::from_fn(request_id))
        .with_state(state)
}
