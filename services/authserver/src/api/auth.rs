//! First-party authentication endpoints.
//!
//! # Purpose
//! JSON password login with refresh rotation and logout for first-party
//! clients, plus the browser session (`sid` cookie) and the CSRF cookie the
//! session endpoints rely on.
//!
//! # Security considerations
//! - Unknown email, wrong password and disabled users all answer the same
//!   `401 invalid_credentials`.
//! - Session ids and refresh tokens are persisted only as SHA-256 hashes.
//! - Logout is non-filtering: `204` whether or not the token existed.
use crate::api::error::{ApiError, api_invalid_credentials, api_validation};
use crate::api::types::{
    CsrfResponse, LoginRequest, LogoutRequest, RefreshRequest, SessionLoginRequest,
    SessionLoginResponse,
};
use crate::app::AppState;
use crate::data::{SessionRecord, TenantDatabase, User, normalize_scopes};
use crate::middleware::csrf::{
    CSRF_COOKIE, CookieOptions, SESSION_COOKIE, clear_cookie, set_cookie,
};
use crate::middleware::{CsrfGuard, RequireTenantDb, cookie, resolve_tenant, tenant_db};
use crate::middleware::tenant::hint_from;
use crate::oauth::client_auth::lookup_client;
use crate::oauth::tokens::count_issued;
use crate::oauth::{TokenResponse, UserGrant, issue_user_tokens, revoke_refresh, rotate_refresh};
use crate::model::client::GRANT_REFRESH_TOKEN;
use crate::model::{Client, Tenant};
use axum::Json;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use chrono::{Duration, Utc};
use hellojohn_crypto::{hash_password, opaque_token, random_hex, sha256_b64url, verify_password};
use std::sync::{Arc, OnceLock};

const SESSION_ID_BYTES: usize = 32;

fn secure_cookies(state: &AppState) -> bool {
    state.config.issuer.starts_with("https://")
}

fn login_tenant(
    state: &AppState,
    uri: &Uri,
    headers: &HeaderMap,
    body_tenant: Option<&str>,
) -> Result<Tenant, ApiError> {
    let hint = body_tenant
        .filter(|tenant| !tenant.is_empty())
        .map(str::to_string)
        .or_else(|| hint_from(uri, headers));
    resolve_tenant(state, hint.as_deref())
}

/// Stand-in hash verified when there is no real one, so an unknown email
/// costs the same argon2 work as a wrong password.
fn decoy_hash() -> Option<&'static str> {
    static DECOY: OnceLock<Option<String>> = OnceLock::new();
    DECOY
        .get_or_init(|| hash_password("hellojohn-decoy-password").ok())
        .as_deref()
}

fn verify_decoy(password: &str) {
    if let Some(hash) = decoy_hash() {
        let _ = verify_password(password, hash);
    }
}

/// The enabled user owning `email` whose password matches.
async fn authenticate_user(
    db: &dyn TenantDatabase,
    email: &str,
    password: &str,
) -> Result<User, ApiError> {
    let Some(user) = db.users().find_by_email(email).await? else {
        verify_decoy(password);
        return Err(api_invalid_credentials());
    };
    let Some(hash) = user.password_hash.as_deref() else {
        verify_decoy(password);
        return Err(api_invalid_credentials());
    };
    if !verify_password(password, hash).unwrap_or(false) {
        return Err(api_invalid_credentials());
    }
    if user.is_disabled(Utc::now()) {
        tracing::info!(user_id = %user.id, "login refused for disabled user");
        return Err(api_invalid_credentials());
    }
    Ok(user)
}

fn login_scopes(client: &Client, requested: Option<&str>) -> Result<Vec<String>, ApiError> {
    let Some(requested) = requested.filter(|scope| !scope.trim().is_empty()) else {
        return Ok(normalize_scopes(client.scopes.iter().map(String::as_str)));
    };
    let scopes = normalize_scopes(requested.split_whitespace());
    if let Some(denied) = scopes.iter().find(|scope| !client.allows_scope(scope)) {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "invalid_scope",
            format!("scope {denied} is not allowed"),
        ));
    }
    Ok(scopes)
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Tokens issued", body = TokenResponse),
        (status = 401, description = "Invalid credentials", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn login(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<TokenResponse, ApiError> {
    let tenant = login_tenant(&state, &uri, &headers, body.tenant_id.as_deref())?;
    let client = lookup_client(&state, &tenant.slug, &body.client_id)?;
    let scopes = login_scopes(&client, body.scope.as_deref())?;
    let db = tenant_db(&state, &tenant.slug).await?;
    let user = authenticate_user(db.as_ref(), &body.email, &body.password).await?;

    let response = issue_user_tokens(
        &state,
        db.as_ref(),
        UserGrant {
            tenant: &tenant.slug,
            client: &client,
            user: &user,
            scopes,
            amr: vec!["pwd".to_string()],
            family_id: None,
            nonce: None,
            with_id_token: false,
        },
    )
    .await?;
    count_issued("password");
    tracing::info!(tenant = %tenant.slug, client_id = %client.client_id, user_id = %user.id, "password login");
    Ok(response)
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    tag = "auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Rotated tokens", body = TokenResponse),
        (status = 401, description = "Refresh token invalid, expired or reused", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn refresh(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<RefreshRequest>,
) -> Result<TokenResponse, ApiError> {
    let tenant = login_tenant(&state, &uri, &headers, body.tenant_id.as_deref())?;
    let client = lookup_client(&state, &tenant.slug, &body.client_id)?;
    if !client.allows_grant(GRANT_REFRESH_TOKEN) {
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "unauthorized_client",
            "client is not allowed to refresh",
        ));
    }
    let db = tenant_db(&state, &tenant.slug).await?;
    let response = rotate_refresh(&state, db.as_ref(), &tenant.slug, &client, &body.refresh_token).await?;
    count_issued(GRANT_REFRESH_TOKEN);
    Ok(response)
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    tag = "auth",
    request_body = LogoutRequest,
    responses(
        (status = 204, description = "Refresh token revoked, or it never existed")
    )
)]
pub(crate) async fn logout(State(state): State<AppState>, Json(body): Json<LogoutRequest>) -> StatusCode {
    revoke_refresh(&state, body.refresh_token.trim()).await;
    StatusCode::NO_CONTENT
}

#[utoipa::path(
    get,
    path = "/v2/csrf",
    tag = "auth",
    responses(
        (status = 200, description = "Fresh double-submit token, also set as a readable cookie", body = CsrfResponse)
    )
)]
pub(crate) async fn csrf(State(state): State<AppState>) -> Response {
    let token = random_hex(32);
    let cookie = set_cookie(
        CSRF_COOKIE,
        &token,
        &CookieOptions {
            max_age: state.config.csrf_ttl_seconds,
            http_only: false,
            secure: secure_cookies(&state),
            path: "/",
        },
    );
    (
        [(SET_COOKIE, cookie), (CACHE_CONTROL, "no-store".to_string())],
        Json(CsrfResponse { csrf_token: token }),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/v2/session/login",
    tag = "auth",
    request_body = SessionLoginRequest,
    responses(
        (status = 200, description = "Session created; `sid` cookie set", body = SessionLoginResponse),
        (status = 401, description = "Invalid credentials", body = crate::api::types::ErrorResponse),
        (status = 501, description = "Tenant has no user store", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn session_login(
    State(state): State<AppState>,
    RequireTenantDb { tenant, db }: RequireTenantDb,
    Json(body): Json<SessionLoginRequest>,
) -> Result<Response, ApiError> {
    let user = authenticate_user(db.as_ref(), &body.email, &body.password).await?;
    let raw = opaque_token(SESSION_ID_BYTES);
    let now = Utc::now();
    let expires_at = now + Duration::seconds(state.config.session_ttl_seconds);
    db.sessions()
        .create(SessionRecord {
            id_hash: sha256_b64url(&raw),
            user_id: user.id,
            created_at: now,
            last_activity_at: now,
            expires_at,
            revoked_at: None,
            revoked_by: None,
            reason: None,
        })
        .await?;
    tracing::info!(tenant = %tenant.slug, user_id = %user.id, "session created");
    let cookie = set_cookie(
        SESSION_COOKIE,
        &raw,
        &CookieOptions {
            max_age: state.config.session_ttl_seconds,
            http_only: true,
            secure: secure_cookies(&state),
            path: "/",
        },
    );
    Ok((
        [(SET_COOKIE, cookie), (CACHE_CONTROL, "no-store".to_string())],
        Json(SessionLoginResponse {
            user_id: user.id,
            expires_at,
        }),
    )
        .into_response())
}

#[utoipa::path(
    post,
    path = "/v2/session/logout",
    tag = "auth",
    responses(
        (status = 204, description = "Session revoked and cookie cleared"),
        (status = 403, description = "Missing or mismatched CSRF token", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn session_logout(
    _csrf: CsrfGuard,
    RequireTenantDb { tenant, db }: RequireTenantDb,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let Some(raw) = cookie(&headers, SESSION_COOKIE) else {
        return Err(api_validation("no session cookie"));
    };
    revoke_session(db, &sha256_b64url(&raw)).await;
    tracing::info!(tenant = %tenant.slug, "session ended");
    Ok((
        StatusCode::NO_CONTENT,
        [(SET_COOKIE, clear_cookie(SESSION_COOKIE, "/"))],
    )
        .into_response())
}

async fn revoke_session(db: Arc<dyn TenantDatabase>, id_hash: &str) {
    if let Err(err) = db.sessions().revoke(id_hash, "user", "logout", Utc::now()).await {
        tracing::warn!(error = %err, "session revoke failed");
    }
}
