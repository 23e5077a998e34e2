//! Tenant user-store administration: users, consents, bulk token and
//! session revocation.
use super::managed_tenant;
use crate::api::error::{ApiError, api_internal, api_validation};
use crate::api::types::{
    ConsentListResponse, DisableUserRequest, RevokeSessionsRequest, RevokeTokensRequest,
    RevokedCount, UserCreateRequest, UserListResponse,
};
use crate::app::AppState;
use crate::data::User;
use crate::middleware::{RequireAdmin, tenant_db};
use crate::model::UserFieldDefinition;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::Utc;
use hellojohn_crypto::hash_password;
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

fn parse_user_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| api_validation("user_id must be a UUID"))
}

/// Every field the tenant marks required must be present and non-null.
fn check_required_fields(
    fields: &[UserFieldDefinition],
    values: &Map<String, Value>,
) -> Result<(), ApiError> {
    match fields
        .iter()
        .filter(|field| field.required)
        .find(|field| values.get(&field.name).is_none_or(Value::is_null))
    {
        Some(missing) => Err(api_validation(&format!("custom field {} is required", missing.name))),
        None => Ok(()),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ConsentQuery {
    pub user_id: Option<Uuid>,
}

#[utoipa::path(
    get,
    path = "/v2/admin/tenants/{tenant_id}/consents",
    tag = "admin",
    params(
        ("tenant_id" = String, Path, description = "Tenant slug or id"),
        ("user_id" = Option<String>, Query, description = "Only this user's consents")
    ),
    responses((status = 200, description = "Consents", body = ConsentListResponse))
)]
pub(crate) async fn list_consents(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path(tenant_id): Path<String>,
    Query(query): Query<ConsentQuery>,
) -> Result<Json<ConsentListResponse>, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    let db = tenant_db(&state, &tenant.slug).await?;
    let items = db.consents().list(query.user_id).await?;
    Ok(Json(ConsentListResponse { items }))
}

#[utoipa::path(
    delete,
    path = "/v2/admin/tenants/{tenant_id}/consents/{user_id}/{client_id}",
    tag = "admin",
    params(
        ("tenant_id" = String, Path, description = "Tenant slug or id"),
        ("user_id" = String, Path, description = "User id"),
        ("client_id" = String, Path, description = "Client id")
    ),
    responses((status = 204, description = "Consent revoked, or there was none"))
)]
pub(crate) async fn revoke_consent(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path((tenant_id, user_id, client_id)): Path<(String, String, String)>,
) -> Result<StatusCode, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    let user_id = parse_user_id(&user_id)?;
    let db = tenant_db(&state, &tenant.slug).await?;
    let revoked = db.consents().revoke(user_id, &client_id, Utc::now()).await?;
    tracing::info!(tenant = %tenant.slug, user_id = %user_id, client_id = %client_id, revoked, "consent revoked");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v2/admin/tenants/{tenant_id}/users",
    tag = "admin",
    params(("tenant_id" = String, Path, description = "Tenant slug or id")),
    responses(
        (status = 200, description = "Users", body = UserListResponse),
        (status = 501, description = "Tenant has no user store", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn list_users(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path(tenant_id): Path<String>,
) -> Result<Json<UserListResponse>, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    let db = tenant_db(&state, &tenant.slug).await?;
    Ok(Json(UserListResponse {
        items: db.users().list().await?,
    }))
}

#[utoipa::path(
    post,
    path = "/v2/admin/tenants/{tenant_id}/users",
    tag = "admin",
    params(("tenant_id" = String, Path, description = "Tenant slug or id")),
    request_body = UserCreateRequest,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 409, description = "Email already registered", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn create_user(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path(tenant_id): Path<String>,
    Json(body): Json<UserCreateRequest>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    let email = body.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(api_validation("email is invalid"));
    }
    check_required_fields(&tenant.settings.user_fields, &body.custom_fields)?;
    let password_hash = match body.password.as_deref() {
        Some(password) if password.is_empty() => return Err(api_validation("password must not be empty")),
        Some(password) => Some(hash_password(password).map_err(|err| api_internal("could not hash password", &err))?),
        None => None,
    };
    let mut user = User::new(email, password_hash, Utc::now());
    user.name = body.name;
    user.email_verified = body.email_verified;
    user.custom_fields = body.custom_fields;

    let db = tenant_db(&state, &tenant.slug).await?;
    let user = db.users().create(user).await?;
    tracing::info!(tenant = %tenant.slug, user_id = %user.id, admin_id = %principal.id, "user created");
    Ok((StatusCode::CREATED, Json(user)))
}

#[utoipa::path(
    get,
    path = "/v2/admin/tenants/{tenant_id}/users/{user_id}",
    tag = "admin",
    params(
        ("tenant_id" = String, Path, description = "Tenant slug or id"),
        ("user_id" = String, Path, description = "User id")
    ),
    responses(
        (status = 200, description = "User", body = User),
        (status = 404, description = "Unknown user", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn get_user(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path((tenant_id, user_id)): Path<(String, String)>,
) -> Result<Json<User>, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    let user_id = parse_user_id(&user_id)?;
    let db = tenant_db(&state, &tenant.slug).await?;
    Ok(Json(db.users().get(user_id).await?))
}

/// Delete a user after revoking everything it still holds.
#[utoipa::path(
    delete,
    path = "/v2/admin/tenants/{tenant_id}/users/{user_id}",
    tag = "admin",
    params(
        ("tenant_id" = String, Path, description = "Tenant slug or id"),
        ("user_id" = String, Path, description = "User id")
    ),
    responses((status = 204, description = "User deleted"))
)]
pub(crate) async fn delete_user(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path((tenant_id, user_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    let user_id = parse_user_id(&user_id)?;
    let db = tenant_db(&state, &tenant.slug).await?;
    let now = Utc::now();
    db.refresh_tokens()
        .revoke_all_by_user(&user_id.to_string(), now)
        .await?;
    db.sessions().revoke_all_by_user(user_id, "admin", now).await?;
    db.users().delete(user_id).await?;
    tracing::info!(tenant = %tenant.slug, user_id = %user_id, admin_id = %principal.id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Disable until a point in time, or re-enable with `until: null`.
/// Disabling also revokes the user's refresh tokens and sessions.
#[utoipa::path(
    post,
    path = "/v2/admin/tenants/{tenant_id}/users/{user_id}/disable",
    tag = "admin",
    params(
        ("tenant_id" = String, Path, description = "Tenant slug or id"),
        ("user_id" = String, Path, description = "User id")
    ),
    request_body = DisableUserRequest,
    responses((status = 200, description = "Updated user", body = User))
)]
pub(crate) async fn disable_user(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path((tenant_id, user_id)): Path<(String, String)>,
    Json(body): Json<DisableUserRequest>,
) -> Result<Json<User>, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    let user_id = parse_user_id(&user_id)?;
    let db = tenant_db(&state, &tenant.slug).await?;
    let now = Utc::now();
    let user = db.users().set_disabled_until(user_id, body.until).await?;
    if user.is_disabled(now) {
        let tokens = db
            .refresh_tokens()
            .revoke_all_by_user(&user_id.to_string(), now)
            .await?;
        let sessions = db.sessions().revoke_all_by_user(user_id, "admin", now).await?;
        tracing::info!(tenant = %tenant.slug, user_id = %user_id, tokens, sessions, "user disabled");
    } else {
        tracing::info!(tenant = %tenant.slug, user_id = %user_id, "user enabled");
    }
    Ok(Json(user))
}

#[utoipa::path(
    post,
    path = "/v2/admin/tenants/{tenant_id}/tokens/revoke",
    tag = "admin",
    params(("tenant_id" = String, Path, description = "Tenant slug or id")),
    request_body = RevokeTokensRequest,
    responses(
        (status = 200, description = "Refresh tokens revoked", body = RevokedCount),
        (status = 400, description = "No selector given", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn revoke_tokens(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path(tenant_id): Path<String>,
    Json(body): Json<RevokeTokensRequest>,
) -> Result<Json<RevokedCount>, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    let db = tenant_db(&state, &tenant.slug).await?;
    let now = Utc::now();
    let repo = db.refresh_tokens();
    let revoked = match (body.user_id.as_deref(), body.client_id.as_deref(), body.all) {
        (Some(user_id), _, _) => repo.revoke_all_by_user(user_id, now).await?,
        (None, Some(client_id), _) => repo.revoke_all_by_client(client_id, now).await?,
        (None, None, true) => repo.revoke_all(now).await?,
        (None, None, false) => {
            return Err(api_validation("name a user_id, a client_id, or set all"));
        }
    };
    tracing::info!(tenant = %tenant.slug, revoked, admin_id = %principal.id, "refresh tokens revoked");
    Ok(Json(RevokedCount { revoked }))
}

#[utoipa::path(
    post,
    path = "/v2/admin/tenants/{tenant_id}/sessions/revoke",
    tag = "admin",
    params(("tenant_id" = String, Path, description = "Tenant slug or id")),
    request_body = RevokeSessionsRequest,
    responses((status = 200, description = "Sessions revoked", body = RevokedCount))
)]
pub(crate) async fn revoke_sessions(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path(tenant_id): Path<String>,
    Json(body): Json<RevokeSessionsRequest>,
) -> Result<Json<RevokedCount>, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    let db = tenant_db(&state, &tenant.slug).await?;
    let revoked = db
        .sessions()
        .revoke_all_by_user(body.user_id, "admin", Utc::now())
        .await?;
    tracing::info!(tenant = %tenant.slug, user_id = %body.user_id, revoked, "sessions revoked");
    Ok(Json(RevokedCount { revoked }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(name: &str, required: bool) -> UserFieldDefinition {
        UserFieldDefinition {
            name: name.to_string(),
            field_type: "string".to_string(),
            required,
        }
    }

    #[test]
    fn required_custom_fields_must_be_present() {
        let fields = vec![field("department", true), field("nickname", false)];
        let mut values = Map::new();
        assert!(check_required_fields(&fields, &values).is_err());
        values.insert("department".to_string(), Value::Null);
        assert!(check_required_fields(&fields, &values).is_err());
        values.insert("department".to_string(), json!("sales"));
        assert!(check_required_fields(&fields, &values).is_ok());
    }
}
