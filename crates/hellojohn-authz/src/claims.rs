//! JWT claim set shared by access and ID tokens.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const ACR_LOA_1: &str = "urn:hellojohn:loa:1";
pub const ACR_LOA_2: &str = "urn:hellojohn:loa:2";

/// Namespaced claim carrying `{roles, perms}` for the subject.
pub const SYS_CLAIM: &str = "urn:hellojohn:sys";
/// Namespaced claim carrying `{role, tenants}` on admin tokens.
pub const ADMIN_CLAIM: &str = "urn:hellojohn:admin";

/// Which token a claim set is minted as. Rendered in the JOSE `typ` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenUse {
    Access,
    Id,
}

impl TokenUse {
    pub fn header_typ(self) -> &'static str {
        match self {
            TokenUse::Access => "at+jwt",
            TokenUse::Id => "JWT",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(default)]
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default)]
    pub tid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub jti: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scope: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scp: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub amr: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub acr: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenClaims {
    /// Set `scope` and its array mirror `scp` together.
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scp = scopes.into_iter().map(Into::into).collect();
        self.scope = self.scp.join(" ");
        self
    }

    pub fn with_claim(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extra.insert(name.into(), value);
        self
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.extra.get(name)
    }

    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scope.split_whitespace()
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes().any(|candidate| candidate == scope)
    }
}

/// `acr` for an authentication method list.
pub fn acr_for_amr(amr: &[String]) -> &'static str {
    if amr.iter().any(|method| method == "mfa") {
        ACR_LOA_2
    } else {
        ACR_LOA_1
    }
}

pub fn now_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs() as i64
}
