//! Strongly typed identifiers.
use serde::{Deserialize, Serialize};

/// Tenant slug as carried in the `tid` claim and cached payloads.
///
/// # Example
/// ```rust
/// use hellojohn_authz::TenantId;
///
/// let tenant = TenantId::new("acme");
/// assert_eq!(tenant.as_str(), "acme");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_id_serializes_as_plain_string() {
        let tenant = TenantId::new("acme");
        assert_eq!(serde_json::to_string(&tenant).expect("json"), "\"acme\"");
        assert_eq!(tenant.to_string(), "acme");
    }
}
