//! Client lookup and authentication.
use super::OAuthError;
use crate::app::AppState;
use crate::model::Client;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hellojohn_crypto::constant_time_eq;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentedClient {
    pub client_id: String,
    pub secret: Option<String>,
}

/// Credentials from HTTP Basic, else from the form fields.
pub fn presented_client(
    headers: &HeaderMap,
    form_client_id: Option<&str>,
    form_secret: Option<&str>,
) -> Option<PresentedClient> {
    if let Some((client_id, secret)) = basic_credentials(headers) {
        return Some(PresentedClient {
            client_id,
            secret: Some(secret),
        });
    }
    let client_id = form_client_id.filter(|id| !id.is_empty())?;
    Some(PresentedClient {
        client_id: client_id.to_string(),
        secret: form_secret.filter(|secret| !secret.is_empty()).map(str::to_string),
    })
}

pub fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (client_id, secret) = decoded.split_once(':')?;
    if client_id.is_empty() {
        return None;
    }
    Some((client_id.to_string(), secret.to_string()))
}

/// Enabled client of `tenant`, or `invalid_client`.
pub fn lookup_client(state: &AppState, tenant: &str, client_id: &str) -> Result<Client, OAuthError> {
    let client = state
        .store
        .client(tenant, client_id)
        .map_err(|_| OAuthError::invalid_client("unknown client"))?
        .value;
    if !client.enabled {
        return Err(OAuthError::invalid_client("client is disabled"));
    }
    Ok(client)
}

/// Constant-time comparison of `provided` with the client's sealed secret.
pub fn verify_client_secret(
    state: &AppState,
    client: &Client,
    provided: Option<&str>,
) -> Result<(), OAuthError> {
    let (Some(sealed), Some(provided)) = (client.secret_sealed.as_deref(), provided) else {
        return Err(OAuthError::invalid_client("client authentication failed"));
    };
    let stored = state.secretbox.open_str(sealed).map_err(|err| {
        tracing::error!(client_id = %client.client_id, error = %err, "client secret unseal failed");
        OAuthError::server_error("internal error")
    })?;
    if constant_time_eq(stored.as_bytes(), provided.as_bytes()) {
        Ok(())
    } else {
        Err(OAuthError::invalid_client("client authentication failed"))
    }
}

/// Resolve the presenting client and check its secret. Confidential clients
/// must authenticate; a public client presenting a secret is refused.
pub fn authenticate_client(
    state: &AppState,
    tenant: &str,
    presented: &PresentedClient,
) -> Result<Client, OAuthError> {
    let client = lookup_client(state, tenant, &presented.client_id)?;
    if client.is_confidential() {
        verify_client_secret(state, &client, presented.secret.as_deref())?;
    } else if presented.secret.is_some() {
        return Err(OAuthError::invalid_client("public clients have no secret"));
    }
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_wins_over_form() {
        let mut headers = HeaderMap::new();
        let encoded = STANDARD.encode("svc:s3cret");
        headers.insert(AUTHORIZATION, format!("Basic {encoded}").parse().unwrap());
        let presented = presented_client(&headers, Some("web"), None).unwrap();
        assert_eq!(presented.client_id, "svc");
        assert_eq!(presented.secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn form_fields_are_used_without_basic() {
        let presented = presented_client(&HeaderMap::new(), Some("web"), Some("")).unwrap();
        assert_eq!(presented.client_id, "web");
        assert_eq!(presented.secret, None);
        assert!(presented_client(&HeaderMap::new(), None, Some("x")).is_none());
    }

    #[test]
    fn malformed_basic_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Basic !!!".parse().unwrap());
        assert!(basic_credentials(&headers).is_none());
        let encoded = STANDARD.encode(":secret");
        headers.insert(AUTHORIZATION, format!("Basic {encoded}").parse().unwrap());
        assert!(basic_credentials(&headers).is_none());
    }
}
