//! Roles, their permissions and user role assignments in the tenant store.
use super::managed_tenant;
use crate::api::error::{ApiError, api_not_found, api_validation};
use crate::api::types::{RoleEntry, RoleListResponse, RolePermissionsRequest, UserRolesRequest, UserRolesResponse};
use crate::app::AppState;
use crate::data::normalize_scopes;
use crate::middleware::{RequireAdmin, tenant_db};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use hellojohn_authz::RolePermission;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Group flat grants into one entry per role, permissions sorted.
fn group_roles(grants: Vec<RolePermission>) -> Vec<RoleEntry> {
    let mut roles: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for grant in grants {
        roles.entry(grant.role).or_default().push(grant.permission);
    }
    roles
        .into_iter()
        .map(|(role, permissions)| RoleEntry {
            role,
            permissions: normalize_scopes(permissions.iter().map(String::as_str)),
        })
        .collect()
}

fn parse_user_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| api_validation("user_id must be a UUID"))
}

#[utoipa::path(
    get,
    path = "/v2/admin/tenants/{tenant_id}/rbac/roles",
    tag = "admin",
    params(("tenant_id" = String, Path, description = "Tenant slug or id")),
    responses((status = 200, description = "Roles with their permissions", body = RoleListResponse))
)]
pub(crate) async fn list_roles(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path(tenant_id): Path<String>,
) -> Result<Json<RoleListResponse>, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    let db = tenant_db(&state, &tenant.slug).await?;
    let items = group_roles(db.rbac().role_permissions().await?);
    Ok(Json(RoleListResponse { items }))
}

#[utoipa::path(
    put,
    path = "/v2/admin/tenants/{tenant_id}/rbac/roles/{role}",
    tag = "admin",
    params(
        ("tenant_id" = String, Path, description = "Tenant slug or id"),
        ("role" = String, Path, description = "Role name")
    ),
    request_body = RolePermissionsRequest,
    responses((status = 200, description = "Role permissions replaced", body = RoleEntry))
)]
pub(crate) async fn put_role(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path((tenant_id, role)): Path<(String, String)>,
    Json(body): Json<RolePermissionsRequest>,
) -> Result<Json<RoleEntry>, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    if role.trim().is_empty() {
        return Err(api_validation("role must not be empty"));
    }
    let permissions = normalize_scopes(body.permissions.iter().map(|p| p.trim()));
    let db = tenant_db(&state, &tenant.slug).await?;
    db.rbac().set_role_permissions(&role, &permissions).await?;
    tracing::info!(tenant = %tenant.slug, role = %role, count = permissions.len(), "role permissions set");
    Ok(Json(RoleEntry { role, permissions }))
}

#[utoipa::path(
    delete,
    path = "/v2/admin/tenants/{tenant_id}/rbac/roles/{role}",
    tag = "admin",
    params(
        ("tenant_id" = String, Path, description = "Tenant slug or id"),
        ("role" = String, Path, description = "Role name")
    ),
    responses(
        (status = 204, description = "Role deleted"),
        (status = 404, description = "Unknown role", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn delete_role(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path((tenant_id, role)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    let db = tenant_db(&state, &tenant.slug).await?;
    if !db.rbac().delete_role(&role).await? {
        return Err(api_not_found("role not found"));
    }
    tracing::info!(tenant = %tenant.slug, role = %role, "role deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v2/admin/tenants/{tenant_id}/rbac/users/{user_id}/roles",
    tag = "admin",
    params(
        ("tenant_id" = String, Path, description = "Tenant slug or id"),
        ("user_id" = String, Path, description = "User id")
    ),
    responses((status = 200, description = "Roles assigned to the user", body = UserRolesResponse))
)]
pub(crate) async fn get_user_roles(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path((tenant_id, user_id)): Path<(String, String)>,
) -> Result<Json<UserRolesResponse>, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    let user_id = parse_user_id(&user_id)?;
    let db = tenant_db(&state, &tenant.slug).await?;
    let roles = db.rbac().user_roles(user_id).await?;
    Ok(Json(UserRolesResponse { user_id, roles }))
}

#[utoipa::path(
    put,
    path = "/v2/admin/tenants/{tenant_id}/rbac/users/{user_id}/roles",
    tag = "admin",
    params(
        ("tenant_id" = String, Path, description = "Tenant slug or id"),
        ("user_id" = String, Path, description = "User id")
    ),
    request_body = UserRolesRequest,
    responses(
        (status = 200, description = "Role assignments replaced", body = UserRolesResponse),
        (status = 404, description = "Unknown user", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn put_user_roles(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path((tenant_id, user_id)): Path<(String, String)>,
    Json(body): Json<UserRolesRequest>,
) -> Result<Json<UserRolesResponse>, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    let user_id = parse_user_id(&user_id)?;
    let db = tenant_db(&state, &tenant.slug).await?;
    db.users().get(user_id).await?;
    let roles = normalize_scopes(body.roles.iter().map(|r| r.trim()));
    db.rbac().set_user_roles(user_id, &roles).await?;
    tracing::info!(tenant = %tenant.slug, user_id = %user_id, roles = ?roles, "user roles set");
    Ok(Json(UserRolesResponse { user_id, roles }))
}
