use hellojohn_authz::IssuerSettings;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Tenant {
    pub id: Uuid,
    /// Short immutable name used in URLs, issuers and token `tid`.
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub settings: TenantSettings,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TenantSettings {
    #[serde(default)]
    #[schema(value_type = Object)]
    pub issuer: IssuerSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_store: Option<UserStoreSettings>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_fields: Vec<UserFieldDefinition>,
}

/// Tenant-specific user database. The DSN is sealed under the secretbox key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserStoreSettings {
    pub driver: String,
    pub dsn_sealed: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserFieldDefinition {
    pub name: String,
    #[serde(default = "default_field_type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
}

fn default_field_type() -> String {
    "string".to_string()
}

impl Tenant {
    pub fn new(slug: impl Into<String>, name: impl Into<String>, now: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            slug: slug.into(),
            name: name.into(),
            settings: TenantSettings::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let slug = &self.slug;
        if slug.is_empty() || slug.len() > 63 {
            return Err("slug must be 1-63 characters".to_string());
        }
        if !slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            || slug.starts_with('-')
        {
            return Err("slug must be lower-case letters, digits and '-'".to_string());
        }
        if self.name.trim().is_empty() {
            return Err("name is required".to_string());
        }
        Ok(())
    }

    /// Whether `value` names this tenant by slug or id.
    pub fn matches(&self, value: &str) -> bool {
        self.slug == value || self.id.to_string().eq_ignore_ascii_case(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_are_lowercase_dns_labels() {
        assert!(Tenant::new("acme", "Acme", 0).validate().is_ok());
        assert!(Tenant::new("Acme", "Acme", 0).validate().is_err());
        assert!(Tenant::new("-acme", "Acme", 0).validate().is_err());
        assert!(Tenant::new("acme", " ", 0).validate().is_err());
    }

    #[test]
    fn tenant_matches_slug_or_id() {
        let tenant = Tenant::new("acme", "Acme", 0);
        assert!(tenant.matches("acme"));
        assert!(tenant.matches(&tenant.id.to_string().to_uppercase()));
        assert!(!tenant.matches("other"));
    }
}
