//! Admin login and refresh.
//!
//! Admin access tokens are signed with the default tenant's key and carry
//! `aud = hellojohn-admin` plus the admin claim. Refresh handles live in the
//! handle cache, hashed, and rotate on every use.
use crate::api::error::{ApiError, api_internal, api_invalid_credentials, api_unauthorized};
use crate::api::types::{AdminLoginRequest, AdminRefreshRequest, AdminTokenResponse};
use crate::app::AppState;
use crate::middleware::{ADMIN_AUDIENCE, AdminClaim};
use crate::model::AdminRecord;
use axum::Json;
use axum::extract::State;
use axum::http::header::CACHE_CONTROL;
use axum::response::{IntoResponse, Response};
use hellojohn_authz::{ADMIN_CLAIM, TenantId, TokenClaims, TokenUse, acr_for_amr, now_epoch_seconds};
use hellojohn_crypto::{opaque_token, sha256_b64url, verify_password};
use hellojohn_storage::{put_json, take_json};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

const ADMIN_REFRESH_TAG: &str = "admin";

#[derive(Debug, Serialize, Deserialize)]
struct AdminRefreshHandle {
    admin_id: String,
}

fn refresh_key(raw: &str) -> String {
    format!("admin_refresh:{}", sha256_b64url(raw))
}

async fn issue(state: &AppState, admin: &AdminRecord) -> Result<AdminTokenResponse, ApiError> {
    let now = now_epoch_seconds();
    let ttl = state.config.access_ttl_seconds;
    let amr = vec!["pwd".to_string()];
    let claim = AdminClaim {
        role: admin.role,
        tenants: admin.tenants.clone(),
    };
    let claim = serde_json::to_value(&claim).map_err(|err| api_internal("could not encode admin claim", &err))?;
    let claims = TokenClaims {
        sub: admin.id.to_string(),
        aud: ADMIN_AUDIENCE.to_string(),
        exp: now + ttl,
        iat: now,
        jti: Uuid::new_v4().to_string(),
        acr: acr_for_amr(&amr).to_string(),
        amr,
        ..TokenClaims::default()
    }
    .with_claim(ADMIN_CLAIM, claim);
    let tenant = TenantId::new(state.config.default_tenant.as_str());
    let access_token = state
        .issuer
        .mint(&tenant, TokenUse::Access, claims)
        .map_err(|err| api_internal("could not sign admin token", &err))?;

    let refresh_token = opaque_token(32);
    let handle = AdminRefreshHandle {
        admin_id: admin.id.to_string(),
    };
    let refresh_ttl = Duration::from_secs(state.config.refresh_ttl_seconds.max(1) as u64);
    put_json(
        state.cache.as_ref(),
        &refresh_key(&refresh_token),
        ADMIN_REFRESH_TAG,
        &handle,
        refresh_ttl,
    )
    .await
    .map_err(|err| api_internal("could not store admin refresh token", &err))?;

    Ok(AdminTokenResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: ttl,
        refresh_token,
    })
}

fn no_store(body: AdminTokenResponse) -> Response {
    ([(CACHE_CONTROL, "no-store")], Json(body)).into_response()
}

#[utoipa::path(
    post,
    path = "/v2/admin/login",
    tag = "admin",
    request_body = AdminLoginRequest,
    responses(
        (status = 200, description = "Admin tokens", body = AdminTokenResponse),
        (status = 401, description = "Invalid credentials", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn admin_login(
    State(state): State<AppState>,
    Json(body): Json<AdminLoginRequest>,
) -> Result<Response, ApiError> {
    let admin = state
        .store
        .admin_by_email(&body.email)
        .ok_or_else(api_invalid_credentials)?;
    if !verify_password(&body.password, &admin.password_hash).unwrap_or(false) || admin.disabled {
        return Err(api_invalid_credentials());
    }
    let tokens = issue(&state, &admin).await?;
    tracing::info!(admin_id = %admin.id, "admin login");
    Ok(no_store(tokens))
}

#[utoipa::path(
    post,
    path = "/v2/admin/refresh",
    tag = "admin",
    request_body = AdminRefreshRequest,
    responses(
        (status = 200, description = "Rotated admin tokens", body = AdminTokenResponse),
        (status = 401, description = "Refresh token invalid or already used", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn admin_refresh(
    State(state): State<AppState>,
    Json(body): Json<AdminRefreshRequest>,
) -> Result<Response, ApiError> {
    let handle: AdminRefreshHandle = take_json(state.cache.as_ref(), &refresh_key(body.refresh_token.trim()))
        .await
        .map_err(|err| api_internal("could not read admin refresh token", &err))?
        .ok_or_else(|| api_unauthorized("invalid refresh token"))?;
    let admin = state
        .store
        .admin(&handle.admin_id)
        .map_err(|_| api_unauthorized("admin no longer exists"))?
        .value;
    if admin.disabled {
        return Err(api_unauthorized("admin is disabled"));
    }
    Ok(no_store(issue(&state, &admin).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_keys_never_hold_the_raw_token() {
        let key = refresh_key("raw-handle");
        assert!(key.starts_with("admin_refresh:"));
        assert!(!key.contains("raw-handle"));
    }
}
