//! `POST /oauth2/token`.
//!
//! The grant types form a closed set. [`Grant::parse`] picks the variant from
//! `grant_type` and [`Grant::exchange`] runs it; anything else is
//! `unsupported_grant_type`.
use super::authorize::take_code;
use super::client_auth::{PresentedClient, authenticate_client, lookup_client, presented_client};
use super::tokens::{TokenResponse, UserGrant, access_ttl, count_issued, issue_user_tokens};
use super::OAuthError;
use crate::app::AppState;
use crate::data::TenantDatabase;
use crate::middleware::{resolve_tenant, tenant::hint_from};
use crate::model::Client;
use crate::model::client::{GRANT_AUTHORIZATION_CODE, GRANT_CLIENT_CREDENTIALS, GRANT_REFRESH_TOKEN};
use axum::Form;
use axum::extract::State;
use axum::http::{HeaderMap, Uri};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use hellojohn_authz::{TenantId, TokenClaims, TokenUse, now_epoch_seconds};
use hellojohn_crypto::{sha256_b64url, verify_pkce_s256};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct TokenForm {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    AuthorizationCode {
        code: String,
        redirect_uri: String,
        code_verifier: String,
    },
    RefreshToken {
        refresh_token: String,
    },
    ClientCredentials {
        scope: Option<String>,
    },
}

fn required(value: Option<String>, name: &str) -> Result<String, OAuthError> {
    value
        .filter(|value| !value.is_empty())
        .ok_or_else(|| OAuthError::invalid_request(format!("{name} is required")))
}

impl Grant {
    pub fn parse(form: &mut TokenForm) -> Result<Self, OAuthError> {
        match form.grant_type.as_deref() {
            Some(GRANT_AUTHORIZATION_CODE) => Ok(Grant::AuthorizationCode {
                code: required(form.code.take(), "code")?,
                redirect_uri: required(form.redirect_uri.take(), "redirect_uri")?,
                code_verifier: required(form.code_verifier.take(), "code_verifier")?,
            }),
            Some(GRANT_REFRESH_TOKEN) => Ok(Grant::RefreshToken {
                refresh_token: required(form.refresh_token.take(), "refresh_token")?,
            }),
            Some(GRANT_CLIENT_CREDENTIALS) => Ok(Grant::ClientCredentials {
                scope: form.scope.take(),
            }),
            Some("") | None => Err(OAuthError::invalid_request("grant_type is required")),
            Some(other) => Err(OAuthError::unsupported_grant_type(format!(
                "grant_type {other} is not supported"
            ))),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Grant::AuthorizationCode { .. } => GRANT_AUTHORIZATION_CODE,
            Grant::RefreshToken { .. } => GRANT_REFRESH_TOKEN,
            Grant::ClientCredentials { .. } => GRANT_CLIENT_CREDENTIALS,
        }
    }

    pub async fn exchange(
        self,
        state: &AppState,
        tenant: &str,
        presented: &PresentedClient,
    ) -> Result<TokenResponse, OAuthError> {
        let grant = self.name();
        let response = match self {
            Grant::AuthorizationCode {
                code,
                redirect_uri,
                code_verifier,
            } => {
                let client = code_client(state, tenant, presented)?;
                exchange_code(state, tenant, &client, &code, &redirect_uri, &code_verifier).await?
            }
            Grant::RefreshToken { refresh_token } => {
                let client = authenticate_client(state, tenant, presented)?;
                ensure_grant(&client, GRANT_REFRESH_TOKEN)?;
                let db = state.pool.get(tenant).await?;
                rotate_refresh(state, db.as_ref(), tenant, &client, &refresh_token).await?
            }
            Grant::ClientCredentials { scope } => {
                client_credentials(state, tenant, presented, scope.as_deref())?
            }
        };
        count_issued(grant);
        Ok(response)
    }
}

fn ensure_grant(client: &Client, grant: &str) -> Result<(), OAuthError> {
    if client.allows_grant(grant) {
        Ok(())
    } else {
        Err(OAuthError::unauthorized_client(format!(
            "client is not allowed to use {grant}"
        )))
    }
}

/// Public clients prove possession through PKCE alone; a confidential client
/// that sends a secret must send the right one.
fn code_client(state: &AppState, tenant: &str, presented: &PresentedClient) -> Result<Client, OAuthError> {
    let client = lookup_client(state, tenant, &presented.client_id)?;
    if client.is_confidential() && presented.secret.is_some() {
        authenticate_client(state, tenant, presented)?;
    }
    ensure_grant(&client, GRANT_AUTHORIZATION_CODE)?;
    Ok(client)
}

async fn exchange_code(
    state: &AppState,
    tenant: &str,
    client: &Client,
    code: &str,
    redirect_uri: &str,
    code_verifier: &str,
) -> Result<TokenResponse, OAuthError> {
    let payload = take_code(state, code)
        .await?
        .ok_or_else(|| OAuthError::invalid_grant("invalid or expired code"))?;
    if payload.expires_at <= now_epoch_seconds()
        || payload.client_id != client.client_id
        || payload.redirect_uri != redirect_uri
        || payload.tenant != tenant
    {
        return Err(OAuthError::invalid_grant("invalid or expired code"));
    }
    if payload.code_challenge_method != "S256"
        || !verify_pkce_s256(code_verifier, &payload.code_challenge)
    {
        return Err(OAuthError::invalid_grant("PKCE verification failed"));
    }

    let db = state.pool.get(tenant).await?;
    let user = db
        .users()
        .get(payload.user_id)
        .await
        .map_err(|_| OAuthError::invalid_grant("user no longer exists"))?;
    if user.is_disabled(Utc::now()) {
        return Err(OAuthError::invalid_grant("user is disabled"));
    }
    let with_id_token = payload.scopes.iter().any(|scope| scope == "openid");
    issue_user_tokens(
        state,
        db.as_ref(),
        UserGrant {
            tenant,
            client,
            user: &user,
            scopes: payload.scopes,
            amr: payload.amr,
            family_id: None,
            nonce: payload.nonce,
            with_id_token,
        },
    )
    .await
}

/// Rotate `raw`: revoke it and mint a successor in the same family. A
/// revoked token coming back revokes the whole family.
pub async fn rotate_refresh(
    state: &AppState,
    db: &dyn TenantDatabase,
    tenant: &str,
    client: &Client,
    raw: &str,
) -> Result<TokenResponse, OAuthError> {
    let now = Utc::now();
    let record = db
        .refresh_tokens()
        .get_by_hash(&sha256_b64url(raw))
        .await?
        .ok_or_else(|| OAuthError::invalid_grant("invalid refresh token"))?;

    if record.revoked_at.is_some() {
        let revoked = db.refresh_tokens().revoke_family(record.family_id, now).await?;
        metrics::counter!("hellojohn_refresh_reuse_total").increment(1);
        tracing::warn!(
            tenant,
            client_id = %client.client_id,
            family_id = %record.family_id,
            revoked,
            "refresh token reuse detected"
        );
        return Err(OAuthError::invalid_grant("refresh token has been revoked"));
    }
    if record.expires_at <= now {
        return Err(OAuthError::invalid_grant("refresh token expired"));
    }
    if !record.client_id.is_empty() && record.client_id != client.client_id {
        return Err(OAuthError::invalid_grant("refresh token was issued to another client"));
    }
    if !db.refresh_tokens().revoke(record.id, now).await? {
        return Err(OAuthError::invalid_grant("refresh token has been revoked"));
    }

    let user_id = Uuid::parse_str(&record.user_id)
        .map_err(|_| OAuthError::invalid_grant("invalid refresh token"))?;
    let user = db
        .users()
        .get(user_id)
        .await
        .map_err(|_| OAuthError::invalid_grant("user no longer exists"))?;
    if user.is_disabled(now) {
        return Err(OAuthError::invalid_grant("user is disabled"));
    }
    issue_user_tokens(
        state,
        db,
        UserGrant {
            tenant,
            client,
            user: &user,
            scopes: record.scope.split_whitespace().map(str::to_string).collect(),
            amr: vec!["refresh".to_string()],
            family_id: Some(record.family_id),
            nonce: None,
            with_id_token: false,
        },
    )
    .await
}

fn client_credentials(
    state: &AppState,
    tenant: &str,
    presented: &PresentedClient,
    scope: Option<&str>,
) -> Result<TokenResponse, OAuthError> {
    let client = lookup_client(state, tenant, &presented.client_id)?;
    if !client.is_confidential() || client.secret_sealed.is_none() {
        return Err(OAuthError::invalid_client(
            "client_credentials requires a confidential client",
        ));
    }
    authenticate_client(state, tenant, presented)?;
    ensure_grant(&client, GRANT_CLIENT_CREDENTIALS)?;

    let requested: Vec<String> = scope
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if let Some(denied) = requested.iter().find(|scope| !client.allows_scope(scope)) {
        return Err(OAuthError::invalid_scope(format!("scope {denied} is not allowed")));
    }
    let scopes = if requested.is_empty() {
        client.scopes.clone()
    } else {
        requested
    };

    let now = now_epoch_seconds();
    let ttl = access_ttl(state, &client);
    let claims = TokenClaims {
        sub: client.client_id.clone(),
        aud: client.client_id.clone(),
        exp: now + ttl,
        iat: now,
        jti: Uuid::new_v4().to_string(),
        amr: vec!["client".to_string()],
        acr: hellojohn_authz::ACR_LOA_1.to_string(),
        ..TokenClaims::default()
    }
    .with_scopes(scopes.iter().cloned());
    let access_token = state
        .issuer
        .mint(&TenantId::new(tenant), TokenUse::Access, claims)?;
    Ok(TokenResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: ttl,
        refresh_token: None,
        id_token: None,
        scope: (!scopes.is_empty()).then(|| scopes.join(" ")),
    })
}

pub async fn token(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    Form(mut form): Form<TokenForm>,
) -> Response {
    let tenant = match resolve_tenant(&state, hint_from(&uri, &headers).as_deref()) {
        Ok(tenant) => tenant,
        Err(_) => return OAuthError::invalid_request("unknown tenant").into_response(),
    };
    let grant = match Grant::parse(&mut form) {
        Ok(grant) => grant,
        Err(err) => return err.into_response(),
    };
    let Some(presented) = presented_client(
        &headers,
        form.client_id.as_deref(),
        form.client_secret.as_deref(),
    ) else {
        return OAuthError::invalid_request("client_id is required").into_response();
    };
    let grant_name = grant.name();
    match grant.exchange(&state, &tenant.slug, &presented).await {
        Ok(response) => response.into_response(),
        Err(err) => {
            tracing::info!(
                tenant = %tenant.slug,
                client_id = %presented.client_id,
                grant = grant_name,
                error = err.error(),
                "token request rejected"
            );
            err.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(pairs: &[(&str, &str)]) -> TokenForm {
        let mut form = TokenForm::default();
        for (key, value) in pairs {
            let value = Some(value.to_string());
            match *key {
                "grant_type" => form.grant_type = value,
                "code" => form.code = value,
                "redirect_uri" => form.redirect_uri = value,
                "code_verifier" => form.code_verifier = value,
                "refresh_token" => form.refresh_token = value,
                "scope" => form.scope = value,
                _ => {}
            }
        }
        form
    }

    #[test]
    fn grant_type_selects_variant() {
        let grant = Grant::parse(&mut form(&[
            ("grant_type", "authorization_code"),
            ("code", "c"),
            ("redirect_uri", "http://localhost/cb"),
            ("code_verifier", "v"),
        ]))
        .unwrap();
        assert_eq!(grant.name(), GRANT_AUTHORIZATION_CODE);

        let grant = Grant::parse(&mut form(&[("grant_type", "client_credentials")])).unwrap();
        assert_eq!(grant, Grant::ClientCredentials { scope: None });
    }

    #[test]
    fn unknown_grant_is_unsupported() {
        let err = Grant::parse(&mut form(&[("grant_type", "password")])).unwrap_err();
        assert_eq!(err.error(), "unsupported_grant_type");
        let err = Grant::parse(&mut form(&[])).unwrap_err();
        assert_eq!(err.error(), "invalid_request");
    }

    #[test]
    fn missing_parameters_are_invalid_requests() {
        let err = Grant::parse(&mut form(&[("grant_type", "authorization_code"), ("code", "c")]))
            .unwrap_err();
        assert_eq!(err.error(), "invalid_request");
        let err = Grant::parse(&mut form(&[("grant_type", "refresh_token")])).unwrap_err();
        assert_eq!(err.error(), "invalid_request");
    }
}
