use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Scope {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub display_name: String,
    /// Claim names released when the scope is granted.
    #[serde(default)]
    pub claims: Vec<String>,
}

impl Scope {
    /// Lower-case tokens separated by single colons, e.g. `read:orders`.
    pub fn validate(&self) -> Result<(), String> {
        super::validate_key("scope", &self.name)?;
        let valid = self.name.split(':').all(|token| {
            !token.is_empty()
                && token
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.'))
        });
        if !valid {
            return Err(format!("scope {} must be lower-case colon-delimited tokens", self.name));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ClaimSource {
    UserField,
    CustomAttribute,
    Computed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ClaimType {
    #[default]
    String,
    Boolean,
    Number,
    Array,
    Object,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ClaimDefinition {
    #[serde(default)]
    pub name: String,
    pub source: ClaimSource,
    #[serde(default)]
    pub value_type: ClaimType,
    /// User field, custom attribute key, or computed expression name.
    /// Defaults to the claim name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ClaimDefinition {
    pub fn validate(&self) -> Result<(), String> {
        super::validate_key("claim", &self.name)?;
        if matches!(
            self.name.as_str(),
            "iss" | "sub" | "aud" | "exp" | "iat" | "nbf" | "jti" | "tid" | "scope" | "scp"
        ) {
            return Err(format!("{} is a reserved claim", self.name));
        }
        Ok(())
    }

    pub fn source_field(&self) -> &str {
        self.field.as_deref().unwrap_or(&self.name)
    }
}
