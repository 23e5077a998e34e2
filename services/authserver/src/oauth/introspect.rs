//! Token introspection (RFC 7662) and revocation (RFC 7009).
//!
//! Both endpoints answer `200` whenever the caller is allowed to ask. A token
//! that fails verification, belongs to nobody, or trips an internal error is
//! reported as `{"active": false}` (introspection) or silently accepted
//! (revocation).
use super::OAuthError;
use super::client_auth::{authenticate_client, presented_client};
use crate::app::AppState;
use crate::data::{RefreshTokenRecord, TenantDatabase};
use crate::middleware::{bearer_token, resolve_tenant, tenant::hint_from};
use axum::Json;
use bytes::Bytes;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, PRAGMA};
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use hellojohn_authz::{SYS_CLAIM, TokenUse, now_epoch_seconds};
use hellojohn_crypto::sha256_b64url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use utoipa::ToSchema;

/// Request bodies on the revocation endpoint are capped at 32 KiB.
pub const REVOKE_BODY_LIMIT: usize = 32 * 1024;
const OPAQUE_MIN_LEN: usize = 40;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Introspection {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amr: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub roles: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub perms: Option<Value>,
}

impl Introspection {
    pub fn inactive() -> Self {
        Self::default()
    }
}

fn no_store(status: StatusCode, body: Option<Json<Introspection>>) -> Response {
    let mut response = match body {
        Some(body) => (status, body).into_response(),
        None => status.into_response(),
    };
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

enum TokenShape {
    Jwt,
    Opaque,
    Unknown,
}

fn classify(token: &str) -> TokenShape {
    match token.matches('.').count() {
        2 => TokenShape::Jwt,
        0 if token.len() >= OPAQUE_MIN_LEN => TokenShape::Opaque,
        _ => TokenShape::Unknown,
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct IntrospectForm {
    pub token: Option<String>,
    pub token_type_hint: Option<String>,
    pub include_sys: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl IntrospectForm {
    /// Fields of a form-encoded body. Anything else yields no fields, which
    /// leaves the token unset.
    pub fn parse(body: &[u8]) -> Self {
        let mut form = Self::default();
        for (key, value) in url::form_urlencoded::parse(body) {
            let slot = match key.as_ref() {
                "token" => &mut form.token,
                "token_type_hint" => &mut form.token_type_hint,
                "include_sys" => &mut form.include_sys,
                "client_id" => &mut form.client_id,
                "client_secret" => &mut form.client_secret,
                _ => continue,
            };
            slot.get_or_insert_with(|| value.into_owned());
        }
        form
    }
}

fn truthy(flag: Option<&str>) -> bool {
    matches!(flag, Some("1" | "true" | "yes"))
}

pub async fn introspect(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let form = IntrospectForm::parse(&body);
    let presented = presented_client(
        &headers,
        form.client_id.as_deref(),
        form.client_secret.as_deref(),
    );
    let Some(presented) = presented.filter(|client| client.secret.is_some()) else {
        return OAuthError::invalid_client("client authentication required").into_response();
    };
    let tenant = match resolve_tenant(&state, hint_from(&uri, &headers).as_deref()) {
        Ok(tenant) => tenant,
        Err(_) => return OAuthError::invalid_client("client authentication failed").into_response(),
    };
    if let Err(err) = authenticate_client(&state, &tenant.slug, &presented) {
        return err.into_response();
    }

    let include_sys = truthy(form.include_sys.as_deref());
    let body = match form.token.as_deref().map(str::trim) {
        Some(token) if !token.is_empty() => match classify(token) {
            TokenShape::Jwt => introspect_jwt(&state, token, include_sys),
            TokenShape::Opaque => introspect_refresh(&state, token).await,
            TokenShape::Unknown => Introspection::inactive(),
        },
        _ => Introspection::inactive(),
    };
    no_store(StatusCode::OK, Some(Json(body)))
}

fn introspect_jwt(state: &AppState, token: &str, include_sys: bool) -> Introspection {
    let claims = match state.verifier.verify(token, TokenUse::Access) {
        Ok(claims) => claims,
        Err(err) => {
            tracing::debug!(error = %err, "introspected token failed verification");
            return Introspection::inactive();
        }
    };
    let sys = include_sys.then(|| claims.claim(SYS_CLAIM).cloned()).flatten();
    Introspection {
        active: now_epoch_seconds() < claims.exp,
        token_type: Some("access_token".to_string()),
        scope: Some(claims.scope.clone()),
        client_id: Some(claims.aud.clone()),
        exp: Some(claims.exp),
        iat: Some(claims.iat),
        iss: Some(claims.iss.clone()),
        jti: (!claims.jti.is_empty()).then(|| claims.jti.clone()),
        tid: Some(claims.tid.clone()),
        acr: (!claims.acr.is_empty()).then(|| claims.acr.clone()),
        amr: Some(claims.amr.clone()),
        roles: sys.as_ref().and_then(|sys| sys.get("roles").cloned()),
        perms: sys.as_ref().and_then(|sys| sys.get("perms").cloned()),
        sub: Some(claims.sub),
    }
}

/// Every tenant database that answers, paired with its slug.
async fn tenant_databases(state: &AppState) -> Vec<(String, Arc<dyn TenantDatabase>)> {
    let mut databases = Vec::new();
    for tenant in state.store.tenants() {
        match state.pool.get(&tenant.slug).await {
            Ok(db) => databases.push((tenant.slug, db)),
            Err(crate::data::DataError::NoDatabase) => {}
            Err(err) => tracing::warn!(tenant = %tenant.slug, error = %err, "tenant store skipped"),
        }
    }
    databases
}

async fn find_refresh(state: &AppState, token: &str) -> Option<(String, Arc<dyn TenantDatabase>, RefreshTokenRecord)> {
    let hash = sha256_b64url(token);
    for (slug, db) in tenant_databases(state).await {
        match db.refresh_tokens().get_by_hash(&hash).await {
            Ok(Some(record)) => return Some((slug, db, record)),
            Ok(None) => {}
            Err(err) => tracing::warn!(tenant = %slug, error = %err, "refresh lookup failed"),
        }
    }
    None
}

async fn introspect_refresh(state: &AppState, token: &str) -> Introspection {
    let Some((slug, _, record)) = find_refresh(state, token).await else {
        return Introspection::inactive();
    };
    Introspection {
        active: record.is_active(Utc::now()),
        token_type: Some("refresh_token".to_string()),
        sub: Some(record.user_id),
        client_id: Some(record.client_id),
        scope: (!record.scope.is_empty()).then_some(record.scope),
        exp: Some(record.expires_at.timestamp()),
        iat: Some(record.issued_at.timestamp()),
        tid: Some(slug),
        ..Introspection::default()
    }
}

/// Revoke the refresh token `raw` wherever it lives. Returns whether a live
/// record was flipped.
pub async fn revoke_refresh(state: &AppState, raw: &str) -> bool {
    let Some((slug, db, record)) = find_refresh(state, raw).await else {
        return false;
    };
    match db.refresh_tokens().revoke(record.id, Utc::now()).await {
        Ok(flipped) => {
            if flipped {
                tracing::info!(tenant = %slug, client_id = %record.client_id, "refresh token revoked");
            }
            flipped
        }
        Err(err) => {
            tracing::warn!(tenant = %slug, error = %err, "refresh revoke failed");
            false
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RevokeBody {
    token: Option<String>,
}

/// Token from a JSON or form body, else from the bearer header.
fn revocation_token(headers: &HeaderMap, body: &[u8]) -> Option<String> {
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));
    let from_body = if is_json {
        serde_json::from_slice::<RevokeBody>(body)
            .ok()
            .and_then(|body| body.token)
    } else {
        url::form_urlencoded::parse(body)
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
    };
    from_body
        .filter(|token| !token.trim().is_empty())
        .or_else(|| bearer_token(headers).map(str::to_string))
}

pub async fn revoke(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Some(token) = revocation_token(&headers, &body) {
        let token = token.trim();
        if matches!(classify(token), TokenShape::Opaque) {
            revoke_refresh(&state, token).await;
        }
    }
    no_store(StatusCode::OK, None)
}
