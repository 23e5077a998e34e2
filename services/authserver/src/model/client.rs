use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";
pub const GRANT_CLIENT_CREDENTIALS: &str = "client_credentials";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Public,
    Confidential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Client {
    pub client_id: String,
    pub name: String,
    pub client_type: ClientType,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub grant_types: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Client secret sealed under the secretbox key. Never rendered by the API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_sealed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_ttl_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_ttl_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_ttl_seconds: Option<i64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Client {
    pub fn allows_grant(&self, grant: &str) -> bool {
        self.grant_types.iter().any(|allowed| allowed == grant)
    }

    pub fn allows_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|allowed| allowed == scope)
    }

    /// Exact string match against the registered list.
    pub fn allows_redirect(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|uri| uri == redirect_uri)
    }

    pub fn is_confidential(&self) -> bool {
        self.client_type == ClientType::Confidential
    }

    /// Copy safe to return from the admin API.
    pub fn redacted(&self) -> Self {
        Self {
            secret_sealed: None,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        super::validate_key("client_id", &self.client_id)?;
        if self.name.trim().is_empty() {
            return Err("name is required".to_string());
        }
        for uri in &self.redirect_uris {
            if uri.contains('#') {
                return Err(format!("redirect uri {uri} must not contain a fragment"));
            }
            if !(uri.starts_with("https://") || uri.starts_with("http://")) {
                return Err(format!("redirect uri {uri} must be absolute"));
            }
        }
        for grant in &self.grant_types {
            if !matches!(
                grant.as_str(),
                GRANT_AUTHORIZATION_CODE | GRANT_REFRESH_TOKEN | GRANT_CLIENT_CREDENTIALS
            ) {
                return Err(format!("unsupported grant type {grant}"));
            }
        }
        if self.allows_grant(GRANT_CLIENT_CREDENTIALS) && !self.is_confidential() {
            return Err("client_credentials requires a confidential client".to_string());
        }
        if self.is_confidential() && self.secret_sealed.is_none() {
            return Err("confidential clients require a secret".to_string());
        }
        if !self.is_confidential() && self.secret_sealed.is_some() {
            return Err("public clients cannot hold a secret".to_string());
        }
        for ttl in [
            self.access_ttl_seconds,
            self.refresh_ttl_seconds,
            self.id_ttl_seconds,
        ]
        .into_iter()
        .flatten()
        {
            if ttl <= 0 {
                return Err("token lifetimes must be positive".to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn public_client() -> Client {
        Client {
            client_id: "web".to_string(),
            name: "Web".to_string(),
            client_type: ClientType::Public,
            redirect_uris: vec!["http://localhost:3000/callback".to_string()],
            allowed_origins: vec![],
            grant_types: vec![GRANT_AUTHORIZATION_CODE.to_string()],
            scopes: vec!["openid".to_string()],
            secret_sealed: None,
            access_ttl_seconds: None,
            refresh_ttl_seconds: None,
            id_ttl_seconds: None,
            enabled: true,
        }
    }

    #[test]
    fn redirect_uris_match_exactly() {
        let client = public_client();
        assert!(client.allows_redirect("http://localhost:3000/callback"));
        assert!(!client.allows_redirect("http://localhost:3000/callback/"));
        assert!(!client.allows_redirect("http://localhost:3000/callback?x=1"));
    }

    #[test]
    fn fragments_are_rejected() {
        let mut client = public_client();
        client.redirect_uris = vec!["http://localhost:3000/cb#frag".to_string()];
        assert!(client.validate().is_err());
    }

    #[test]
    fn client_credentials_need_a_confidential_client() {
        let mut client = public_client();
        client.grant_types.push(GRANT_CLIENT_CREDENTIALS.to_string());
        assert!(client.validate().is_err());

        client.client_type = ClientType::Confidential;
        client.secret_sealed = Some("sealed".to_string());
        assert!(client.validate().is_ok());
        assert!(client.redacted().secret_sealed.is_none());
    }
}
