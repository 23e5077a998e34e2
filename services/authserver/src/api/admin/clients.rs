//! OAuth client registry.
//!
//! Secrets are sealed before they reach the cluster log and are returned in
//! plaintext only by the request that set them. Every other response is
//! redacted.
use super::{if_match, managed_tenant, with_etag};
use crate::api::error::{ApiError, api_internal, api_validation};
use crate::api::types::{ClientListResponse, ClientResponse, ClientUpsertRequest};
use crate::app::AppState;
use crate::middleware::RequireAdmin;
use crate::model::{Client, ClientType, validate_key};
use crate::store::StoreError;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use hellojohn_crypto::opaque_token;

const GENERATED_SECRET_BYTES: usize = 32;

/// Secret handling for an upsert: `Some(plain)` when a new secret must be
/// sealed, `None` to keep whatever is stored.
fn secret_to_set(
    body: &ClientUpsertRequest,
    existing_sealed: Option<&str>,
) -> Result<Option<String>, ApiError> {
    match (body.client_type, body.client_secret.as_deref()) {
        (ClientType::Public, Some(_)) => Err(api_validation("public clients cannot hold a secret")),
        (ClientType::Public, None) => Ok(None),
        (ClientType::Confidential, Some(secret)) if secret.trim().is_empty() => {
            Err(api_validation("client_secret must not be empty"))
        }
        (ClientType::Confidential, Some(secret)) => Ok(Some(secret.to_string())),
        (ClientType::Confidential, None) if existing_sealed.is_some() => Ok(None),
        (ClientType::Confidential, None) => Ok(Some(opaque_token(GENERATED_SECRET_BYTES))),
    }
}

#[utoipa::path(
    get,
    path = "/v2/admin/tenants/{tenant_id}/clients",
    tag = "admin",
    params(("tenant_id" = String, Path, description = "Tenant slug or id")),
    responses((status = 200, description = "Clients, secrets redacted", body = ClientListResponse))
)]
pub(crate) async fn list_clients(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path(tenant_id): Path<String>,
) -> Result<Json<ClientListResponse>, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    let items = state
        .store
        .clients(&tenant.slug)?
        .iter()
        .map(Client::redacted)
        .collect();
    Ok(Json(ClientListResponse { items }))
}

#[utoipa::path(
    get,
    path = "/v2/admin/tenants/{tenant_id}/clients/{client_id}",
    tag = "admin",
    params(
        ("tenant_id" = String, Path, description = "Tenant slug or id"),
        ("client_id" = String, Path, description = "Client id")
    ),
    responses(
        (status = 200, description = "Client, secret redacted", body = ClientResponse),
        (status = 404, description = "Unknown client", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn get_client(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path((tenant_id, client_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    let versioned = state.store.client(&tenant.slug, &client_id)?;
    let body = ClientResponse {
        client: versioned.value.redacted(),
        client_secret: None,
    };
    Ok(with_etag(StatusCode::OK, Some(&versioned.etag), body))
}

#[utoipa::path(
    put,
    path = "/v2/admin/tenants/{tenant_id}/clients/{client_id}",
    tag = "admin",
    params(
        ("tenant_id" = String, Path, description = "Tenant slug or id"),
        ("client_id" = String, Path, description = "Client id")
    ),
    request_body = ClientUpsertRequest,
    responses(
        (status = 200, description = "Client updated", body = ClientResponse),
        (status = 201, description = "Client created; a generated secret is returned once", body = ClientResponse),
        (status = 412, description = "If-Match did not match", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn put_client(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path((tenant_id, client_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<ClientUpsertRequest>,
) -> Result<Response, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    validate_key("client_id", &client_id).map_err(|message| api_validation(&message))?;
    let existing = match state.store.client(&tenant.slug, &client_id) {
        Ok(versioned) => Some(versioned.value),
        Err(StoreError::NotFound(_)) => None,
        Err(err) => return Err(err.into()),
    };
    let existing_sealed = existing
        .as_ref()
        .filter(|client| client.is_confidential())
        .and_then(|client| client.secret_sealed.clone());

    let new_secret = secret_to_set(&body, existing_sealed.as_deref())?;
    let secret_sealed = match new_secret.as_deref() {
        Some(plain) => Some(
            state
                .secretbox
                .seal_str(plain)
                .map_err(|err| api_internal("could not seal client secret", &err))?,
        ),
        None => existing_sealed,
    };
    let client = Client {
        client_id: client_id.clone(),
        name: body.name,
        client_type: body.client_type,
        redirect_uris: body.redirect_uris,
        allowed_origins: body.allowed_origins,
        grant_types: body.grant_types,
        scopes: body.scopes,
        secret_sealed,
        access_ttl_seconds: body.access_ttl_seconds,
        refresh_ttl_seconds: body.refresh_ttl_seconds,
        id_ttl_seconds: body.id_ttl_seconds,
        enabled: body.enabled.unwrap_or(true),
    };
    client.validate().map_err(|message| api_validation(&message))?;

    let applied = state
        .control
        .upsert_client(&tenant.slug, &client, if_match(&headers))
        .await?;
    let status = if existing.is_some() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    tracing::info!(tenant = %tenant.slug, client_id = %client_id, admin_id = %principal.id, "client saved");
    let body = ClientResponse {
        client: client.redacted(),
        client_secret: new_secret,
    };
    Ok(with_etag(status, applied.etag.as_deref(), body))
}

#[utoipa::path(
    delete,
    path = "/v2/admin/tenants/{tenant_id}/clients/{client_id}",
    tag = "admin",
    params(
        ("tenant_id" = String, Path, description = "Tenant slug or id"),
        ("client_id" = String, Path, description = "Client id")
    ),
    responses((status = 204, description = "Client deleted"))
)]
pub(crate) async fn delete_client(
    State(state): State<AppState>,
    RequireAdmin(principal): RequireAdmin,
    Path((tenant_id, client_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let tenant = managed_tenant(&state, &principal, &tenant_id)?;
    state
        .control
        .delete_client(&tenant.slug, &client_id, if_match(&headers))
        .await?;
    tracing::info!(tenant = %tenant.slug, client_id = %client_id, admin_id = %principal.id, "client deleted");
    Ok(StatusCode::NO_CONTENT)
}
