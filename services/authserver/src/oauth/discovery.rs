//! OpenID provider metadata and JWKS publication.
use crate::api::error::{ApiError, api_not_found};
use crate::app::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderValue;
use axum::http::header::CACHE_CONTROL;
use axum::response::{IntoResponse, Response};
use hellojohn_authz::Jwks;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

const JWKS_CACHE_CONTROL: &str = "public, max-age=15";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub jwks_uri: String,
    pub revocation_endpoint: String,
    pub introspection_endpoint: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub claims_supported: Vec<String>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

/// Metadata rooted at `base`; endpoints are always served from `base`.
pub fn provider_metadata(base: &str, issuer: String, jwks_uri: String, scopes: Vec<String>) -> ProviderMetadata {
    ProviderMetadata {
        issuer,
        authorization_endpoint: format!("{base}/oauth2/authorize"),
        token_endpoint: format!("{base}/oauth2/token"),
        userinfo_endpoint: format!("{base}/userinfo"),
        jwks_uri,
        revocation_endpoint: format!("{base}/oauth2/revoke"),
        introspection_endpoint: format!("{base}/oauth2/introspect"),
        response_types_supported: strings(&["code"]),
        grant_types_supported: strings(&["authorization_code", "refresh_token", "client_credentials"]),
        subject_types_supported: strings(&["public"]),
        id_token_signing_alg_values_supported: strings(&["EdDSA"]),
        token_endpoint_auth_methods_supported: strings(&[
            "client_secret_basic",
            "client_secret_post",
            "none",
        ]),
        code_challenge_methods_supported: strings(&["S256"]),
        scopes_supported: scopes,
        claims_supported: strings(&[
            "sub",
            "iss",
            "aud",
            "exp",
            "iat",
            "tid",
            "amr",
            "acr",
            "email",
            "email_verified",
            "name",
            "given_name",
            "family_name",
            "picture",
            "locale",
        ]),
    }
}

fn base(state: &AppState) -> &str {
    state.keys.issuer_base().trim_end_matches('/')
}

#[utoipa::path(
    get,
    path = "/.well-known/openid-configuration",
    tag = "oidc",
    responses((status = 200, description = "Provider metadata for the global issuer", body = ProviderMetadata))
)]
pub async fn global_discovery(State(state): State<AppState>) -> Json<ProviderMetadata> {
    let base = base(&state);
    Json(provider_metadata(
        base,
        base.to_string(),
        format!("{base}/.well-known/jwks.json"),
        strings(&["openid", "profile", "email", "offline_access"]),
    ))
}

#[utoipa::path(
    get,
    path = "/t/{slug}/.well-known/openid-configuration",
    tag = "oidc",
    params(("slug" = String, Path, description = "Tenant slug")),
    responses(
        (status = 200, description = "Provider metadata for the tenant issuer", body = ProviderMetadata),
        (status = 404, description = "Unknown tenant", body = crate::api::types::ErrorResponse)
    )
)]
pub async fn tenant_discovery(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<ProviderMetadata>, ApiError> {
    let tenant = state
        .store
        .find_tenant(&slug)
        .ok_or_else(|| api_not_found(&format!("unknown tenant {slug}")))?;
    let base = base(&state);
    let mut scopes = strings(&["openid", "profile", "email", "offline_access"]);
    for scope in state.store.scopes(&tenant.slug).unwrap_or_default() {
        if !scopes.contains(&scope.name) {
            scopes.push(scope.name);
        }
    }
    Ok(Json(provider_metadata(
        base,
        format!("{base}/t/{}", tenant.slug),
        format!("{base}/.well-known/jwks/{}.json", tenant.slug),
        scopes,
    )))
}

fn jwks_response(jwks: Jwks) -> Response {
    let mut response = Json(jwks).into_response();
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static(JWKS_CACHE_CONTROL));
    response
}

/// Union of every tenant's published keys.
pub async fn global_jwks(State(state): State<AppState>) -> Response {
    jwks_response(state.keys.all_jwks())
}

/// `/.well-known/jwks/{slug}.json`
pub async fn tenant_jwks(State(state): State<AppState>, Path(file): Path<String>) -> Response {
    let slug = file.strip_suffix(".json").unwrap_or(&file);
    let Some(tenant) = state.store.find_tenant(slug) else {
        return api_not_found(&format!("unknown tenant {slug}")).into_response();
    };
    match state.keys.jwks(&tenant.slug) {
        Some(jwks) => jwks_response(jwks),
        None => api_not_found(&format!("tenant {slug} has no keys")).into_response(),
    }
}
