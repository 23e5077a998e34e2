//! Token minting shared by the grant handlers and the password login.
use super::OAuthError;
use crate::app::AppState;
use crate::data::{RefreshTokenRecord, TenantDatabase, User};
use crate::model::{ClaimSource, Client};
use axum::Json;
use axum::http::HeaderValue;
use axum::http::header::{CACHE_CONTROL, PRAGMA};
use axum::response::{IntoResponse, Response};
use chrono::{Duration, Utc};
use hellojohn_authz::{
    SYS_CLAIM, TenantId, TokenClaims, TokenUse, acr_for_amr, effective_permissions,
    now_epoch_seconds,
};
use hellojohn_crypto::{at_hash, opaque_token, sha256_b64url};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;

/// Raw refresh tokens carry 32 random bytes.
pub const REFRESH_TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl IntoResponse for TokenResponse {
    fn into_response(self) -> Response {
        let mut response = Json(self).into_response();
        let headers = response.headers_mut();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        response
    }
}

pub fn access_ttl(state: &AppState, client: &Client) -> i64 {
    client.access_ttl_seconds.unwrap_or(state.config.access_ttl_seconds)
}

pub fn refresh_ttl(state: &AppState, client: &Client) -> i64 {
    client.refresh_ttl_seconds.unwrap_or(state.config.refresh_ttl_seconds)
}

pub fn id_ttl(state: &AppState, client: &Client) -> i64 {
    client.id_ttl_seconds.unwrap_or(state.config.id_ttl_seconds)
}

pub fn count_issued(grant: &'static str) {
    metrics::counter!("hellojohn_tokens_issued_total", "grant" => grant).increment(1);
}

/// Everything needed to mint tokens for an end user.
pub struct UserGrant<'a> {
    pub tenant: &'a str,
    pub client: &'a Client,
    pub user: &'a User,
    pub scopes: Vec<String>,
    pub amr: Vec<String>,
    /// Continue an existing rotation chain, or start a new one.
    pub family_id: Option<Uuid>,
    /// Present only for the authorization-code grant.
    pub nonce: Option<String>,
    pub with_id_token: bool,
}

/// Mint an access token, a rotated refresh token and optionally an ID token.
pub async fn issue_user_tokens(
    state: &AppState,
    db: &dyn TenantDatabase,
    grant: UserGrant<'_>,
) -> Result<TokenResponse, OAuthError> {
    let tenant = TenantId::new(grant.tenant);
    let now = now_epoch_seconds();
    let access_ttl = access_ttl(state, grant.client);
    let acr = acr_for_amr(&grant.amr).to_string();

    let mut access_claims = TokenClaims {
        sub: grant.user.id.to_string(),
        aud: grant.client.client_id.clone(),
        exp: now + access_ttl,
        iat: now,
        jti: Uuid::new_v4().to_string(),
        amr: grant.amr.clone(),
        acr: acr.clone(),
        ..TokenClaims::default()
    }
    .with_scopes(grant.scopes.iter().cloned());
    if let Some(sys) = sys_claim(db, grant.tenant, grant.user.id).await {
        access_claims = access_claims.with_claim(SYS_CLAIM, sys);
    }
    let access_token = state.issuer.mint(&tenant, TokenUse::Access, access_claims)?;

    let refresh_token = opaque_token(REFRESH_TOKEN_BYTES);
    let issued_at = Utc::now();
    db.refresh_tokens()
        .insert(RefreshTokenRecord {
            id: Uuid::new_v4(),
            client_id: grant.client.client_id.clone(),
            user_id: grant.user.id.to_string(),
            token_hash: sha256_b64url(&refresh_token),
            family_id: grant.family_id.unwrap_or_else(Uuid::new_v4),
            scope: grant.scopes.join(" "),
            amr: grant.amr.clone(),
            issued_at,
            expires_at: issued_at + Duration::seconds(refresh_ttl(state, grant.client)),
            revoked_at: None,
        })
        .await?;

    let id_token = if grant.with_id_token {
        let mut id_claims = TokenClaims {
            sub: grant.user.id.to_string(),
            aud: grant.client.client_id.clone(),
            exp: now + id_ttl(state, grant.client),
            iat: now,
            amr: grant.amr.clone(),
            acr,
            ..TokenClaims::default()
        }
        .with_claim("azp", Value::String(grant.client.client_id.clone()))
        .with_claim("at_hash", Value::String(at_hash(&access_token)));
        if let Some(nonce) = grant.nonce.filter(|nonce| !nonce.is_empty()) {
            id_claims = id_claims.with_claim("nonce", Value::String(nonce));
        }
        for (name, value) in user_claims(state, grant.tenant, grant.user, &grant.scopes) {
            id_claims.extra.entry(name).or_insert(value);
        }
        Some(state.issuer.mint(&tenant, TokenUse::Id, id_claims)?)
    } else {
        None
    };

    Ok(TokenResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: access_ttl,
        refresh_token: Some(refresh_token),
        id_token,
        scope: (!grant.scopes.is_empty()).then(|| grant.scopes.join(" ")),
    })
}

/// `{roles, perms}` for users holding at least one role.
async fn sys_claim(db: &dyn TenantDatabase, tenant: &str, user_id: Uuid) -> Option<Value> {
    let roles = match db.rbac().user_roles(user_id).await {
        Ok(roles) if !roles.is_empty() => roles,
        Ok(_) => return None,
        Err(err) => {
            tracing::warn!(tenant, error = %err, "role lookup failed");
            return None;
        }
    };
    let grants = db.rbac().role_permissions().await.unwrap_or_default();
    let perms = effective_permissions(&grants, &user_id.to_string(), &roles, tenant)
        .await
        .unwrap_or_else(|err| {
            tracing::warn!(tenant, error = %err, "permission expansion failed");
            Vec::new()
        });
    Some(json!({ "roles": roles, "perms": perms }))
}

/// Claims released by `scopes`: standard OIDC profile and email claims, then
/// tenant-defined claims mapped from scopes.
pub fn user_claims(state: &AppState, tenant: &str, user: &User, scopes: &[String]) -> Map<String, Value> {
    let granted = |name: &str| scopes.iter().any(|scope| scope == name);
    let mut claims = Map::new();
    if granted("email") {
        claims.insert("email".to_string(), Value::String(user.email.clone()));
        claims.insert("email_verified".to_string(), Value::Bool(user.email_verified));
    }
    if granted("profile") {
        for field in ["name", "given_name", "family_name", "picture", "locale"] {
            if let Some(value) = user.field(field) {
                claims.insert(field.to_string(), value);
            }
        }
    }

    let definitions: BTreeMap<String, _> = state
        .store
        .claims(tenant)
        .unwrap_or_default()
        .into_iter()
        .filter(|claim| claim.enabled)
        .map(|claim| (claim.name.clone(), claim))
        .collect();
    if definitions.is_empty() {
        return claims;
    }
    for scope in state.store.scopes(tenant).unwrap_or_default() {
        if !granted(&scope.name) {
            continue;
        }
        for name in &scope.claims {
            let Some(definition) = definitions.get(name) else {
                continue;
            };
            let value = match definition.source {
                ClaimSource::UserField => user.field(definition.source_field()),
                ClaimSource::CustomAttribute => user
                    .custom_fields
                    .get(definition.source_field())
                    .or_else(|| user.metadata.get(definition.source_field()))
                    .cloned(),
                ClaimSource::Computed => computed_claim(definition.source_field(), tenant, user),
            };
            if let Some(value) = value {
                claims.entry(name.clone()).or_insert(value);
            }
        }
    }
    claims
}

fn computed_claim(expression: &str, tenant: &str, user: &User) -> Option<Value> {
    match expression {
        "tenant" => Some(Value::String(tenant.to_string())),
        "email_domain" => user
            .email
            .rsplit_once('@')
            .map(|(_, domain)| Value::String(domain.to_ascii_lowercase())),
        "created_at" => Some(Value::from(user.created_at.timestamp())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computed_claims() {
        let user = User::new("Alice@Example.COM", None, Utc::now());
        assert_eq!(
            computed_claim("email_domain", "acme", &user),
            Some(Value::String("example.com".to_string()))
        );
        assert_eq!(
            computed_claim("tenant", "acme", &user),
            Some(Value::String("acme".to_string()))
        );
        assert_eq!(computed_claim("unknown", "acme", &user), None);
    }

    #[test]
    fn token_response_omits_absent_fields() {
        let response = TokenResponse {
            access_token: "a".to_string(),
            token_type: "Bearer".to_string(),
            expires_in: 60,
            refresh_token: None,
            id_token: None,
            scope: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json, json!({"access_token": "a", "token_type": "Bearer", "expires_in": 60}));
    }
}
