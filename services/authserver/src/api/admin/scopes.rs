//! Scopes and claim definitions.
//!
//! The path names the record; a `name` in the body is overwritten by it.
use super::{if_match, managed_tenant, with_etag};
use crate::api::error::{ApiError, api_conflict, api_validation};
use crate::api::types::{ClaimListResponse, ScopeListResponse};
use crate::app::AppState;
use crate::data::DataError;
use crate::middleware::RequireAdmin;
use crate::model::{ClaimDefinition, Scope};
use crate::store::StoreError;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;

fn created_or_ok(existed: bool) -> StatusCode {
    if existed { StatusCode::OK } else { StatusCode::CREATED }
}

fn exists<T>(lookup: Result<T, StoreError>) -> Result<bool, ApiError> {
    match lookup {
        Ok(_) => Ok(true),
        Err(StoreError::NotFound(_)) => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// A scope stays while any client lists it or any live consent holds it.
async fn ensure_scope_unused(state: &AppState, slug: &str, name: &str) -> Result<(), ApiError> {
    let in_use = || api_conflict("scope_in_use", "scope is still referenced");
    if state
        .store
        .clients(slug)?
        .iter()
        .any(|client| client.allows_scope(name))
    {
        return Err(in_use());
    }
    let db = match state.pool.get(slug).await {
        Ok(db) => db,
        Err(DataError::NoDatabase) => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    if db.consents().scope_in_use(name).await? {
        return Err(in_use());
    }
    Ok(())
}

#[utoipa::path(
    get,
    path = "/v2/admin/tenants/{tenant_id}/scopes",
    tag = "admin",
    params(("tenant_id" = String, Path, description = "Tenant slug or id")),
    responses((status = 200, description = "Scopes", body = ScopeListResponse))
)]
pub(crate) async fn list_scopes(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path(tenant_id): Path<String>,
) -> Result<Json<ScopeListResponse>, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    Ok(Json(ScopeListResponse {
        items: state.store.scopes(&tenant.slug)?,
    }))
}

#[utoipa::path(
    get,
    path = "/v2/admin/tenants/{tenant_id}/scopes/{name}",
    tag = "admin",
    params(
        ("tenant_id" = String, Path, description = "Tenant slug or id"),
        ("name" = String, Path, description = "Scope name")
    ),
    responses((status = 200, description = "Scope", body = Scope))
)]
pub(crate) async fn get_scope(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path((tenant_id, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    let versioned = state.store.scope(&tenant.slug, &name)?;
    Ok(with_etag(StatusCode::OK, Some(&versioned.etag), versioned.value))
}

#[utoipa::path(
    put,
    path = "/v2/admin/tenants/{tenant_id}/scopes/{name}",
    tag = "admin",
    params(
        ("tenant_id" = String, Path, description = "Tenant slug or id"),
        ("name" = String, Path, description = "Scope name")
    ),
    request_body = Scope,
    responses(
        (status = 200, description = "Scope updated", body = Scope),
        (status = 201, description = "Scope created", body = Scope)
    )
)]
pub(crate) async fn put_scope(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path((tenant_id, name)): Path<(String, String)>,
    headers: HeaderMap,
    Json(mut scope): Json<Scope>,
) -> Result<Response, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    scope.name = name;
    scope.validate().map_err(|message| api_validation(&message))?;
    let existed = exists(state.store.scope(&tenant.slug, &scope.name))?;
    let applied = state
        .control
        .upsert_scope(&tenant.slug, &scope, if_match(&headers))
        .await?;
    tracing::info!(tenant = %tenant.slug, scope = %scope.name, "scope saved");
    Ok(with_etag(created_or_ok(existed), applied.etag.as_deref(), scope))
}

#[utoipa::path(
    delete,
    path = "/v2/admin/tenants/{tenant_id}/scopes/{name}",
    tag = "admin",
    params(
        ("tenant_id" = String, Path, description = "Tenant slug or id"),
        ("name" = String, Path, description = "Scope name")
    ),
    responses(
        (status = 204, description = "Scope deleted"),
        (status = 409, description = "Scope is still referenced", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn delete_scope(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path((tenant_id, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    ensure_scope_unused(&state, &tenant.slug, &name).await?;
    state
        .control
        .delete_scope(&tenant.slug, &name, if_match(&headers))
        .await?;
    tracing::info!(tenant = %tenant.slug, scope = %name, "scope deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v2/admin/tenants/{tenant_id}/claims",
    tag = "admin",
    params(("tenant_id" = String, Path, description = "Tenant slug or id")),
    responses((status = 200, description = "Claim definitions", body = ClaimListResponse))
)]
pub(crate) async fn list_claims(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path(tenant_id): Path<String>,
) -> Result<Json<ClaimListResponse>, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    Ok(Json(ClaimListResponse {
        items: state.store.claims(&tenant.slug)?,
    }))
}

#[utoipa::path(
    get,
    path = "/v2/admin/tenants/{tenant_id}/claims/{name}",
    tag = "admin",
    params(
        ("tenant_id" = String, Path, description = "Tenant slug or id"),
        ("name" = String, Path, description = "Claim name")
    ),
    responses((status = 200, description = "Claim definition", body = ClaimDefinition))
)]
pub(crate) async fn get_claim(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path((tenant_id, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    let versioned = state.store.claim(&tenant.slug, &name)?;
    Ok(with_etag(StatusCode::OK, Some(&versioned.etag), versioned.value))
}

#[utoipa::path(
    put,
    path = "/v2/admin/tenants/{tenant_id}/claims/{name}",
    tag = "admin",
    params(
        ("tenant_id" = String, Path, description = "Tenant slug or id"),
        ("name" = String, Path, description = "Claim name")
    ),
    request_body = ClaimDefinition,
    responses(
        (status = 200, description = "Claim updated", body = ClaimDefinition),
        (status = 201, description = "Claim created", body = ClaimDefinition)
    )
)]
pub(crate) async fn put_claim(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path((tenant_id, name)): Path<(String, String)>,
    headers: HeaderMap,
    Json(mut claim): Json<ClaimDefinition>,
) -> Result<Response, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    claim.name = name;
    claim.validate().map_err(|message| api_validation(&message))?;
    let existed = exists(state.store.claim(&tenant.slug, &claim.name))?;
    let applied = state
        .control
        .upsert_claim(&tenant.slug, &claim, if_match(&headers))
        .await?;
    tracing::info!(tenant = %tenant.slug, claim = %claim.name, "claim saved");
    Ok(with_etag(created_or_ok(existed), applied.etag.as_deref(), claim))
}

#[utoipa::path(
    delete,
    path = "/v2/admin/tenants/{tenant_id}/claims/{name}",
    tag = "admin",
    params(
        ("tenant_id" = String, Path, description = "Tenant slug or id"),
        ("name" = String, Path, description = "Claim name")
    ),
    responses((status = 204, description = "Claim deleted"))
)]
pub(crate) async fn delete_claim(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path((tenant_id, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    state
        .control
        .delete_claim(&tenant.slug, &name, if_match(&headers))
        .await?;
    tracing::info!(tenant = %tenant.slug, claim = %name, "claim deleted");
    Ok(StatusCode::NO_CONTENT)
}
