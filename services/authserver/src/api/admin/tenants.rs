//! Tenant lifecycle.
use super::{if_match, managed_tenant, with_etag};
use crate::api::error::{ApiError, api_conflict, api_internal, api_not_found, api_validation};
use crate::api::types::{TenantCreateRequest, TenantListResponse, TenantUpdateRequest, UserStoreRequest};
use crate::app::AppState;
use crate::data::{DataError, TenantDatabase};
use crate::middleware::{RequireAdmin, RequireSysAdmin};
use crate::model::{Tenant, UserStoreSettings};
use crate::store::check_if_match;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use chrono::Utc;
use hellojohn_authz::now_epoch_seconds;
use std::sync::Arc;

fn sealed_user_store(state: &AppState, request: &UserStoreRequest) -> Result<UserStoreSettings, ApiError> {
    if request.driver.trim().is_empty() || request.dsn.trim().is_empty() {
        return Err(api_validation("user_store needs a driver and a dsn"));
    }
    let dsn_sealed = state
        .secretbox
        .seal_str(&request.dsn)
        .map_err(|err| api_internal("could not seal tenant dsn", &err))?;
    Ok(UserStoreSettings {
        driver: request.driver.clone(),
        dsn_sealed,
    })
}

#[utoipa::path(
    get,
    path = "/v2/admin/tenants",
    tag = "admin",
    responses((status = 200, description = "Tenants this admin manages", body = TenantListResponse))
)]
pub(crate) async fn list_tenants(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
) -> Json<TenantListResponse> {
    let items = state
        .store
        .tenants()
        .into_iter()
        .filter(|tenant| principal.ensure_tenant(&tenant.slug).is_ok())
        .collect();
    Json(TenantListResponse { items })
}

#[utoipa::path(
    post,
    path = "/v2/admin/tenants",
    tag = "admin",
    request_body = TenantCreateRequest,
    responses(
        (status = 201, description = "Tenant created with an initial signing key", body = Tenant),
        (status = 409, description = "Slug already taken", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn create_tenant(
    State(state): State<AppState>,
    RequireSysAdmin(principal): RequireSysAdmin,
    Json(body): Json<TenantCreateRequest>,
) -> Result<Response, ApiError> {
    if state.store.find_tenant(&body.slug).is_some() {
        return Err(api_conflict("tenant_exists", "a tenant with this slug already exists"));
    }
    let mut tenant = Tenant::new(body.slug.trim(), body.name.trim(), now_epoch_seconds());
    if let Some(settings) = body.settings {
        tenant.settings = settings;
    }
    if let Some(user_store) = body.user_store.as_ref() {
        tenant.settings.user_store = Some(sealed_user_store(&state, user_store)?);
    }
    tenant.validate().map_err(|message| api_validation(&message))?;

    let applied = state.control.upsert_tenant(&tenant, None).await?;
    state
        .control
        .ensure_initial_key(&tenant.slug, &state.signing_sealer)
        .await?;
    tracing::info!(tenant = %tenant.slug, admin_id = %principal.id, "tenant created");
    Ok(with_etag(StatusCode::CREATED, applied.etag.as_deref(), tenant))
}

#[utoipa::path(
    get,
    path = "/v2/admin/tenants/{tenant_id}",
    tag = "admin",
    params(("tenant_id" = String, Path, description = "Tenant slug or id")),
    responses(
        (status = 200, description = "Tenant", body = Tenant),
        (status = 404, description = "Unknown tenant", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn get_tenant(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path(tenant_id): Path<String>,
) -> Result<Response, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    let versioned = state.store.tenant(&tenant.slug)?;
    Ok(with_etag(StatusCode::OK, Some(&versioned.etag), versioned.value))
}

/// Update a tenant, or create it under the path slug when a system admin
/// names one that does not exist yet.
#[utoipa::path(
    put,
    path = "/v2/admin/tenants/{tenant_id}",
    tag = "admin",
    params(("tenant_id" = String, Path, description = "Tenant slug or id")),
    request_body = TenantUpdateRequest,
    responses(
        (status = 200, description = "Tenant updated", body = Tenant),
        (status = 201, description = "Tenant created", body = Tenant),
        (status = 412, description = "If-Match did not match", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn put_tenant(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<TenantUpdateRequest>,
) -> Result<Response, ApiError> {
    let existing = state.store.find_tenant(&tenant_id);
    let created = existing.is_none();
    let mut tenant = match existing {
        Some(tenant) => {
            principal.ensure_tenant(&tenant.slug)?;
            tenant
        }
        None if principal.is_sys_admin() => {
            let name = body.name.clone().unwrap_or_else(|| tenant_id.clone());
            Tenant::new(tenant_id.as_str(), name, now_epoch_seconds())
        }
        None => return Err(api_not_found("tenant not found")),
    };
    if let Some(name) = body.name {
        tenant.name = name.trim().to_string();
    }
    if let Some(settings) = body.settings {
        let user_store = tenant.settings.user_store.take();
        tenant.settings = settings;
        // A sealed DSN only changes through `user_store`.
        tenant.settings.user_store = user_store;
    }
    if let Some(user_store) = body.user_store.as_ref() {
        tenant.settings.user_store = Some(sealed_user_store(&state, user_store)?);
    }
    tenant.updated_at = now_epoch_seconds();
    tenant.validate().map_err(|message| api_validation(&message))?;

    let applied = state.control.upsert_tenant(&tenant, if_match(&headers)).await?;
    let status = if created {
        state
            .control
            .ensure_initial_key(&tenant.slug, &state.signing_sealer)
            .await?;
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    tracing::info!(tenant = %tenant.slug, admin_id = %principal.id, created, "tenant saved");
    Ok(with_etag(status, applied.etag.as_deref(), tenant))
}

/// A private connection to the tenant's database, if it has one. Opened
/// before the delete applies, while the tenant still resolves, and outside
/// the pool, which drops the tenant's handle on apply.
async fn tenant_database(
    state: &AppState,
    slug: &str,
) -> Result<Option<Arc<dyn TenantDatabase>>, ApiError> {
    match state.pool.open_detached(slug).await {
        Ok(db) => Ok(Some(db)),
        Err(DataError::NoDatabase) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Revoke the tenant's refresh tokens and sessions and drop its consents.
async fn cascade_tenant_data(db: &dyn TenantDatabase, slug: &str) -> Result<(), DataError> {
    let now = Utc::now();
    let tokens = db.refresh_tokens().revoke_all(now).await?;
    let mut sessions = 0;
    for user in db.users().list().await? {
        sessions += db.sessions().revoke_all_by_user(user.id, "admin", now).await?;
    }
    let consents = db.consents().delete_all().await?;
    tracing::info!(tenant = slug, tokens, sessions, consents, "tenant data cascaded");
    Ok(())
}

#[utoipa::path(
    delete,
    path = "/v2/admin/tenants/{tenant_id}",
    tag = "admin",
    params(("tenant_id" = String, Path, description = "Tenant slug or id")),
    responses(
        (status = 204, description = "Tenant deleted"),
        (status = 404, description = "Unknown tenant", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn delete_tenant(
    State(state): State<AppState>,
    RequireSysAdmin(principal): RequireSysAdmin,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    if tenant.slug == state.config.default_tenant {
        return Err(api_conflict("default_tenant", "the default tenant cannot be deleted"));
    }
    let if_match = if_match(&headers);
    // Fail a stale precondition before touching anything.
    let current = state.store.tenant(&tenant.slug)?;
    check_if_match(Some(&current.etag), if_match.as_deref())?;
    let db = tenant_database(&state, &tenant.slug).await?;

    // Tenant data is only cascaded once the delete has applied.
    let deleted = state.control.delete_tenant(&tenant.slug, if_match).await;
    if let Some(db) = db {
        if deleted.is_ok()
            && let Err(err) = cascade_tenant_data(db.as_ref(), &tenant.slug).await
        {
            tracing::warn!(tenant = %tenant.slug, error = %err, "tenant data cascade incomplete");
        }
        db.close().await;
    }
    deleted?;
    tracing::info!(tenant = %tenant.slug, admin_id = %principal.id, "tenant deleted");
    Ok(StatusCode::NO_CONTENT)
}
