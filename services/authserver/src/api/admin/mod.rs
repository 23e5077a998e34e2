//! Admin API.
//!
//! # Purpose
//! Tenant-scoped management under `/v2/admin/tenants/{tenant_id}/...`
//! (aliased at `/v1/admin`), plus admin login and refresh.
//!
//! # Key invariants and assumptions
//! - Control-plane mutations go through `ControlPlane` and therefore the
//!   cluster log; handlers never write the store.
//! - `{tenant_id}` accepts a slug or a tenant UUID.
//! - A tenant admin only reaches the tenants listed in its token; anything
//!   else is `403`.
//! - Reads return an `ETag`; mutations honor `If-Match`.
pub mod clients;
pub mod keys;
pub mod rbac;
pub mod scopes;
pub mod session;
pub mod tenants;
pub mod users;

use crate::api::error::{ApiError, api_not_found};
use crate::app::AppState;
use crate::middleware::{AdminPrincipal, leader_gate, rate_limit};
use crate::model::Tenant;
use axum::Json;
use axum::Router;
use axum::http::header::{ETAG, IF_MATCH};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use serde::Serialize;

/// Tenant named by the path, after the caller's tenant scope is checked.
pub(crate) fn managed_tenant(
    state: &AppState,
    principal: &AdminPrincipal,
    tenant_id: &str,
) -> Result<Tenant, ApiError> {
    let tenant = state
        .store
        .find_tenant(tenant_id)
        .ok_or_else(|| api_not_found("tenant not found"))?;
    principal.ensure_tenant(&tenant.slug)?;
    Ok(tenant)
}

pub(crate) fn if_match(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IF_MATCH)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// JSON body with a quoted `ETag` header when one is known.
pub(crate) fn with_etag<T: Serialize>(status: StatusCode, etag: Option<&str>, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    if let Some(etag) = etag
        && let Ok(value) = HeaderValue::from_str(&format!("\"{etag}\""))
    {
        response.headers_mut().insert(ETAG, value);
    }
    response
}

/// Control-plane routes. Mutations are gated on leadership.
fn tenant_routes() -> Router<AppState> {
    Router::new()
        .route("/tenants", get(tenants::list_tenants).post(tenants::create_tenant))
        .route(
            "/tenants/:tenant_id",
            get(tenants::get_tenant)
                .put(tenants::put_tenant)
                .post(tenants::put_tenant)
                .delete(tenants::delete_tenant),
        )
        .route("/tenants/:tenant_id/clients", get(clients::list_clients))
        .route(
            "/tenants/:tenant_id/clients/:client_id",
            get(clients::get_client)
                .put(clients::put_client)
                .delete(clients::delete_client),
        )
        .route("/tenants/:tenant_id/scopes", get(scopes::list_scopes))
        .route(
            "/tenants/:tenant_id/scopes/:name",
            get(scopes::get_scope)
                .put(scopes::put_scope)
                .delete(scopes::delete_scope),
        )
        .route("/tenants/:tenant_id/claims", get(scopes::list_claims))
        .route(
            "/tenants/:tenant_id/claims/:name",
            get(scopes::get_claim)
                .put(scopes::put_claim)
                .delete(scopes::delete_claim),
        )
        .route("/tenants/:tenant_id/keys", get(keys::list_keys))
        .route("/tenants/:tenant_id/keys/rotate", post(keys::rotate_keys))
        .route("/tenants/:tenant_id/keys/:kid", delete(keys::revoke_key))
}

/// Tenant user-store management. These write the tenant database, not the
/// control plane, so any node may serve them.
fn data_routes() -> Router<AppState> {
    Router::new()
        .route("/tenants/:tenant_id/rbac/roles", get(rbac::list_roles))
        .route(
            "/tenants/:tenant_id/rbac/roles/:role",
            put(rbac::put_role).delete(rbac::delete_role),
        )
        .route(
            "/tenants/:tenant_id/rbac/users/:user_id/roles",
            get(rbac::get_user_roles).put(rbac::put_user_roles),
        )
        .route("/tenants/:tenant_id/consents", get(users::list_consents))
        .route(
            "/tenants/:tenant_id/consents/:user_id/:client_id",
            delete(users::revoke_consent),
        )
        .route(
            "/tenants/:tenant_id/users",
            get(users::list_users).post(users::create_user),
        )
        .route(
            "/tenants/:tenant_id/users/:user_id",
            get(users::get_user).delete(users::delete_user),
        )
        .route("/tenants/:tenant_id/users/:user_id/disable", post(users::disable_user))
        .route("/tenants/:tenant_id/tokens/revoke", post(users::revoke_tokens))
        .route("/tenants/:tenant_id/sessions/revoke", post(users::revoke_sessions))
}

/// The admin surface, to be nested at `/v2/admin` and `/v1/admin`.
pub fn router(state: AppState) -> Router<AppState> {
    let credentials = Router::new()
        .route("/login", post(session::admin_login))
        .route("/refresh", post(session::admin_refresh))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), rate_limit));
    let gated = tenant_routes()
        .route_layer(axum::middleware::from_fn_with_state(state, leader_gate));
    credentials
        .merge(gated)
        .merge(data_routes())
}
