use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AdminRole {
    SysAdmin,
    TenantAdmin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AdminRecord {
    pub id: Uuid,
    pub email: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password_hash: String,
    pub role: AdminRole,
    /// Tenant slugs a tenant admin may manage. Ignored for system admins.
    #[serde(default)]
    pub tenants: Vec<String>,
    #[serde(default)]
    pub disabled: bool,
    pub created_at: i64,
}

impl AdminRecord {
    pub fn can_manage(&self, tenant: &str) -> bool {
        match self.role {
            AdminRole::SysAdmin => true,
            AdminRole::TenantAdmin => self.tenants.iter().any(|slug| slug == tenant),
        }
    }

    pub fn without_secret(&self) -> Self {
        Self {
            password_hash: String::new(),
            ..self.clone()
        }
    }
}
