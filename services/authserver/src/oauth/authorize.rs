//! Authorization endpoint and the consent-to-code pipeline.
//!
//! Authorization codes and consent challenges are opaque handles. Their
//! payloads live in the handle cache under `code:<sha256(handle)>` and
//! `consent:<sha256(handle)>`, tagged with the tenant slug, and are consumed
//! with a single atomic `take`.
use super::OAuthError;
use crate::api::error::{ApiError, api_validation};
use crate::app::AppState;
use crate::data::TenantDatabase;
use crate::middleware::{resolve_tenant, session_user, tenant::hint_from, tenant_db};
use crate::model::client::GRANT_AUTHORIZATION_CODE;
use crate::model::Client;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::header::{CACHE_CONTROL, LOCATION};
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use hellojohn_authz::now_epoch_seconds;
use hellojohn_crypto::{opaque_token, sha256_b64url};
use hellojohn_storage::{get_json, put_json, take_json};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

pub const CODE_TTL: Duration = Duration::from_secs(600);
pub const CONSENT_TTL: Duration = Duration::from_secs(600);
const HANDLE_BYTES: usize = 32;

/// Payload behind an authorization code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthCodePayload {
    pub user_id: Uuid,
    pub client_id: String,
    /// Tenant slug.
    pub tenant: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    #[serde(default)]
    pub nonce: Option<String>,
    pub code_challenge: String,
    pub code_challenge_method: String,
    #[serde(default)]
    pub amr: Vec<String>,
    pub expires_at: i64,
}

/// A pending authorize request awaiting the user's decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentChallenge {
    pub user_id: Uuid,
    pub client_id: String,
    pub tenant: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    #[serde(default)]
    pub nonce: Option<String>,
    pub code_challenge: String,
    pub code_challenge_method: String,
    #[serde(default)]
    pub amr: Vec<String>,
    #[serde(default)]
    pub state: Option<String>,
}

impl ConsentChallenge {
    fn into_code_payload(self) -> AuthCodePayload {
        AuthCodePayload {
            user_id: self.user_id,
            client_id: self.client_id,
            tenant: self.tenant,
            redirect_uri: self.redirect_uri,
            scopes: self.scopes,
            nonce: self.nonce,
            code_challenge: self.code_challenge,
            code_challenge_method: self.code_challenge_method,
            amr: self.amr,
            expires_at: now_epoch_seconds() + CODE_TTL.as_secs() as i64,
        }
    }
}

pub fn code_key(code: &str) -> String {
    format!("code:{}", sha256_b64url(code))
}

/// Key used by codes minted before handles were hashed.
pub fn legacy_code_key(code: &str) -> String {
    format!("code:{code}")
}

fn consent_key(token: &str) -> String {
    format!("consent:{}", sha256_b64url(token))
}

pub async fn mint_code(state: &AppState, payload: &AuthCodePayload) -> Result<String, OAuthError> {
    let code = opaque_token(HANDLE_BYTES);
    put_json(state.cache.as_ref(), &code_key(&code), &payload.tenant, payload, CODE_TTL)
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "authorization code store failed");
            OAuthError::server_error("could not create authorization code")
        })?;
    Ok(code)
}

/// One-shot lookup of a code payload, hashed key first.
pub async fn take_code(state: &AppState, code: &str) -> Result<Option<AuthCodePayload>, OAuthError> {
    let cache = state.cache.as_ref();
    let fail = |err: hellojohn_storage::StorageError| {
        tracing::error!(error = %err, "authorization code lookup failed");
        OAuthError::server_error("internal error")
    };
    if let Some(payload) = take_json(cache, &code_key(code)).await.map_err(fail)? {
        return Ok(Some(payload));
    }
    take_json(cache, &legacy_code_key(code)).await.map_err(fail)
}

#[derive(Debug, Default, Deserialize)]
pub struct AuthorizeQuery {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConsentRequired {
    pub consent_required: bool,
    pub consent_token: String,
    pub client_id: String,
    pub client_name: String,
    pub scopes: Vec<String>,
}

/// `Location` response for the client's redirect URI plus query parameters.
fn redirect_to(redirect_uri: &str, params: &[(&str, Option<&str>)]) -> Response {
    let Ok(mut url) = Url::parse(redirect_uri) else {
        return OAuthError::invalid_redirect_uri("redirect_uri is not absolute").into_response();
    };
    {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in params {
            if let Some(value) = value {
                pairs.append_pair(name, value);
            }
        }
    }
    match HeaderValue::from_str(url.as_str()) {
        Ok(location) => (
            StatusCode::FOUND,
            [(LOCATION, location), (CACHE_CONTROL, HeaderValue::from_static("no-store"))],
        )
            .into_response(),
        Err(_) => OAuthError::invalid_redirect_uri("redirect_uri is not a valid header").into_response(),
    }
}

fn redirect_error(redirect_uri: &str, error: &str, state: Option<&str>) -> Response {
    redirect_to(redirect_uri, &[("error", Some(error)), ("state", state)])
}

pub async fn authorize(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<AuthorizeQuery>,
) -> Response {
    let tenant = match resolve_tenant(&state, hint_from(&uri, &headers).as_deref()) {
        Ok(tenant) => tenant,
        Err(err) => return err.into_response(),
    };
    let Some(client_id) = query.client_id.as_deref().filter(|id| !id.is_empty()) else {
        return OAuthError::invalid_request("client_id is required").into_response();
    };
    let client = match state.store.client(&tenant.slug, client_id) {
        Ok(client) if client.value.enabled => client.value,
        _ => {
            return OAuthError::invalid_client("unknown client")
                .with_status(StatusCode::BAD_REQUEST)
                .into_response();
        }
    };
    let redirect_uri = match query.redirect_uri.as_deref() {
        Some(uri) if client.allows_redirect(uri) => uri.to_string(),
        _ => {
            return OAuthError::invalid_redirect_uri("redirect_uri is not registered for this client")
                .into_response();
        }
    };
    let client_state = query.state.as_deref();

    if query.response_type.as_deref() != Some("code") {
        return redirect_error(&redirect_uri, "unsupported_response_type", client_state);
    }
    if !client.allows_grant(GRANT_AUTHORIZATION_CODE) {
        return redirect_error(&redirect_uri, "unauthorized_client", client_state);
    }
    let challenge = query.code_challenge.as_deref().unwrap_or_default();
    if challenge.is_empty() || query.code_challenge_method.as_deref() != Some("S256") {
        return redirect_error(&redirect_uri, "invalid_request", client_state);
    }
    let scopes = crate::data::normalize_scopes(
        query.scope.as_deref().unwrap_or_default().split_whitespace(),
    );
    if !scopes.iter().any(|scope| scope == "openid")
        || scopes.iter().any(|scope| !client.allows_scope(scope))
    {
        return redirect_error(&redirect_uri, "invalid_scope", client_state);
    }

    let db = match tenant_db(&state, &tenant.slug).await {
        Ok(db) => db,
        Err(err) => return err.into_response(),
    };
    let user = match session_user(db.as_ref(), &headers).await {
        Ok(Some(user)) => user,
        Ok(None) => return redirect_error(&redirect_uri, "login_required", client_state),
        Err(err) => {
            tracing::warn!(tenant = %tenant.slug, error = %err, "session lookup failed");
            return redirect_error(&redirect_uri, "server_error", client_state);
        }
    };

    let pending = ConsentChallenge {
        user_id: user.user_id,
        client_id: client.client_id.clone(),
        tenant: tenant.slug.clone(),
        redirect_uri: redirect_uri.clone(),
        scopes,
        nonce: query.nonce.clone(),
        code_challenge: challenge.to_string(),
        code_challenge_method: "S256".to_string(),
        amr: vec!["pwd".to_string()],
        state: query.state.clone(),
    };

    match already_consented(db.as_ref(), &pending).await {
        Ok(true) => {
            let payload = pending.into_code_payload();
            match mint_code(&state, &payload).await {
                Ok(code) => redirect_to(&redirect_uri, &[("code", Some(&code)), ("state", client_state)]),
                Err(_) => redirect_error(&redirect_uri, "server_error", client_state),
            }
        }
        Ok(false) => match issue_consent_challenge(&state, &client, pending).await {
            Ok(body) => (StatusCode::OK, [(CACHE_CONTROL, "no-store")], Json(body)).into_response(),
            Err(_) => redirect_error(&redirect_uri, "server_error", client_state),
        },
        Err(err) => {
            tracing::warn!(tenant = %tenant.slug, error = %err, "consent lookup failed");
            redirect_error(&redirect_uri, "server_error", client_state)
        }
    }
}

async fn already_consented(
    db: &dyn TenantDatabase,
    pending: &ConsentChallenge,
) -> crate::data::DataResult<bool> {
    let consent = db.consents().get(pending.user_id, &pending.client_id).await?;
    Ok(consent.is_some_and(|consent| consent.covers(pending.scopes.iter().map(String::as_str))))
}

async fn issue_consent_challenge(
    state: &AppState,
    client: &Client,
    pending: ConsentChallenge,
) -> Result<ConsentRequired, OAuthError> {
    let token = opaque_token(HANDLE_BYTES);
    put_json(
        state.cache.as_ref(),
        &consent_key(&token),
        &pending.tenant,
        &pending,
        CONSENT_TTL,
    )
    .await
    .map_err(|err| {
        tracing::error!(error = %err, "consent challenge store failed");
        OAuthError::server_error("could not create consent challenge")
    })?;
    Ok(ConsentRequired {
        consent_required: true,
        consent_token: token,
        client_id: client.client_id.clone(),
        client_name: client.name.clone(),
        scopes: pending.scopes,
    })
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConsentDecision {
    pub consent_token: String,
    #[serde(default)]
    pub approve: bool,
}

fn invalid_consent_token() -> ApiError {
    api_validation("invalid or expired consent_token")
}

/// Consume a consent challenge and send the user agent back to the client.
pub async fn consent_accept(
    State(state): State<AppState>,
    Json(decision): Json<ConsentDecision>,
) -> Response {
    let taken: Option<ConsentChallenge> =
        match take_json(state.cache.as_ref(), &consent_key(&decision.consent_token)).await {
            Ok(taken) => taken,
            Err(err) => {
                tracing::error!(error = %err, "consent challenge lookup failed");
                return OAuthError::server_error("internal error").into_response();
            }
        };
    let Some(pending) = taken else {
        return invalid_consent_token().into_response();
    };
    let redirect_uri = pending.redirect_uri.clone();
    let client_state = pending.state.clone();

    if !decision.approve {
        tracing::info!(tenant = %pending.tenant, client_id = %pending.client_id, "consent rejected");
        return redirect_error(&redirect_uri, "access_denied", client_state.as_deref());
    }

    let db = match tenant_db(&state, &pending.tenant).await {
        Ok(db) => db,
        Err(err) => return err.into_response(),
    };
    if let Err(err) = db
        .consents()
        .upsert(pending.user_id, &pending.client_id, &pending.scopes, Utc::now())
        .await
    {
        tracing::warn!(tenant = %pending.tenant, error = %err, "consent persist failed");
        return redirect_error(&redirect_uri, "server_error", client_state.as_deref());
    }
    let payload = pending.into_code_payload();
    match mint_code(&state, &payload).await {
        Ok(code) => redirect_to(
            &redirect_uri,
            &[("code", Some(&code)), ("state", client_state.as_deref())],
        ),
        Err(_) => redirect_error(&redirect_uri, "server_error", client_state.as_deref()),
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConsentScope {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConsentInfo {
    pub client_id: String,
    pub client_name: String,
    pub redirect_uri: String,
    pub scopes: Vec<ConsentScope>,
}

/// Describe a pending challenge for the consent UI without consuming it.
pub async fn consent_info(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<ConsentInfo>, ApiError> {
    let pending: ConsentChallenge = get_json(state.cache.as_ref(), &consent_key(&token))
        .await
        .ok()
        .flatten()
        .ok_or_else(invalid_consent_token)?;
    let client_name = state
        .store
        .client(&pending.tenant, &pending.client_id)
        .map(|client| client.value.name)
        .unwrap_or_else(|_| pending.client_id.clone());
    let scopes = pending
        .scopes
        .iter()
        .map(|name| ConsentScope {
            name: name.clone(),
            description: state
                .store
                .scope(&pending.tenant, name)
                .map(|scope| scope.value.description)
                .unwrap_or_default(),
        })
        .collect();
    Ok(Json(ConsentInfo {
        client_id: pending.client_id,
        client_name,
        redirect_uri: pending.redirect_uri,
        scopes,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_keys_hash_the_handle() {
        let key = code_key("abc");
        assert!(key.starts_with("code:"));
        assert!(!key.contains("abc"));
        assert_eq!(legacy_code_key("abc"), "code:abc");
    }

    #[test]
    fn redirects_append_encoded_parameters() {
        let response = redirect_to(
            "http://localhost:3000/callback?keep=1",
            &[("code", Some("a b")), ("state", None)],
        );
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(LOCATION).unwrap(),
            "http://localhost:3000/callback?keep=1&code=a+b"
        );
    }

    #[test]
    fn challenge_becomes_short_lived_code_payload() {
        let challenge = ConsentChallenge {
            user_id: Uuid::new_v4(),
            client_id: "web".to_string(),
            tenant: "local".to_string(),
            redirect_uri: "http://localhost:3000/callback".to_string(),
            scopes: vec!["openid".to_string()],
            nonce: Some("n".to_string()),
            code_challenge: "c".to_string(),
            code_challenge_method: "S256".to_string(),
            amr: vec!["pwd".to_string()],
            state: Some("s".to_string()),
        };
        let payload = challenge.clone().into_code_payload();
        assert_eq!(payload.client_id, challenge.client_id);
        assert!(payload.expires_at <= now_epoch_seconds() + 600);
        assert!(payload.expires_at > now_epoch_seconds());
    }
}
