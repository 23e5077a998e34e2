//! Signing-key rotation and revocation.
use super::managed_tenant;
use crate::api::error::ApiError;
use crate::api::types::{KeyInfo, KeyListResponse, RotateKeyResponse};
use crate::app::AppState;
use crate::middleware::RequireAdmin;
use crate::store::StoreError;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use hellojohn_authz::{KeyStatus, SigningKeyRecord};
use serde::Deserialize;

/// Grace window for the outgoing key when the caller names none.
pub const DEFAULT_GRACE_SECONDS: i64 = 3600;

#[derive(Debug, Default, Deserialize)]
pub struct RotateQuery {
    #[serde(rename = "graceSeconds")]
    pub grace_seconds: Option<i64>,
}

fn status_name(status: KeyStatus) -> &'static str {
    match status {
        KeyStatus::Active => "active",
        KeyStatus::Retiring => "retiring",
        KeyStatus::Revoked => "revoked",
    }
}

fn key_info(record: &SigningKeyRecord) -> KeyInfo {
    KeyInfo {
        kid: record.kid.clone(),
        alg: record.alg.clone(),
        status: status_name(record.status).to_string(),
        created_at: record.created_at,
        activated_at: record.activated_at,
        retired_at: record.retired_at,
    }
}

#[utoipa::path(
    get,
    path = "/v2/admin/tenants/{tenant_id}/keys",
    tag = "admin",
    params(("tenant_id" = String, Path, description = "Tenant slug or id")),
    responses((status = 200, description = "Key metadata, never key material", body = KeyListResponse))
)]
pub(crate) async fn list_keys(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path(tenant_id): Path<String>,
) -> Result<Json<KeyListResponse>, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    let items = match state.store.keys(&tenant.slug) {
        Ok(keys) => keys.value.keys.iter().map(key_info).collect(),
        Err(StoreError::NotFound(_)) => Vec::new(),
        Err(err) => return Err(err.into()),
    };
    Ok(Json(KeyListResponse { items }))
}

#[utoipa::path(
    post,
    path = "/v2/admin/tenants/{tenant_id}/keys/rotate",
    tag = "admin",
    params(
        ("tenant_id" = String, Path, description = "Tenant slug or id"),
        ("graceSeconds" = Option<i64>, Query, description = "How long the previous key keeps verifying; default 3600")
    ),
    responses((status = 200, description = "New active key", body = RotateKeyResponse))
)]
pub(crate) async fn rotate_keys(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path(tenant_id): Path<String>,
    Query(query): Query<RotateQuery>,
) -> Result<Json<RotateKeyResponse>, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    let grace_seconds = query.grace_seconds.unwrap_or(DEFAULT_GRACE_SECONDS).max(0);
    let kid = state
        .control
        .rotate_keys(&tenant.slug, grace_seconds, &state.signing_sealer)
        .await?;
    state.keys.invalidate(&tenant.slug);
    tracing::info!(tenant = %tenant.slug, kid = %kid, grace_seconds, admin_id = %principal.id, "keys rotated");
    Ok(Json(RotateKeyResponse { kid, grace_seconds }))
}

#[utoipa::path(
    delete,
    path = "/v2/admin/tenants/{tenant_id}/keys/{kid}",
    tag = "admin",
    params(
        ("tenant_id" = String, Path, description = "Tenant slug or id"),
        ("kid" = String, Path, description = "Key id")
    ),
    responses(
        (status = 204, description = "Key revoked and dropped from JWKS"),
        (status = 409, description = "The active key cannot be revoked", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn revoke_key(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path((tenant_id, kid)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    state.control.revoke_key(&tenant.slug, &kid).await?;
    state.keys.invalidate(&tenant.slug);
    tracing::warn!(tenant = %tenant.slug, kid = %kid, admin_id = %principal.id, "signing key revoked");
    Ok(StatusCode::NO_CONTENT)
}
