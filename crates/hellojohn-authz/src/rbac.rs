//! Role-to-permission expansion for the `urn:hellojohn:sys` claim.
use crate::casbin_model::casbin_model;
use crate::{AuthzError, AuthzResult};
use casbin::{CoreApi, Enforcer, MemoryAdapter, MgmtApi, RbacApi};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermission {
    pub role: String,
    pub permission: String,
}

/// Flatten a user's roles into the sorted, de-duplicated permission list.
///
/// Role grants and the user's role assignments are loaded into an in-memory
/// enforcer scoped to `tenant`; grants for other roles never leak in.
pub async fn effective_permissions(
    grants: &[RolePermission],
    user: &str,
    roles: &[String],
    tenant: &str,
) -> AuthzResult<Vec<String>> {
    if roles.is_empty() {
        return Ok(Vec::new());
    }
    let model = casbin_model().await?;
    let mut enforcer = Enforcer::new(model, MemoryAdapter::default())
        .await
        .map_err(policy_error)?;

    for grant in grants {
        enforcer
            .add_policy(vec![
                grant.role.clone(),
                tenant.to_string(),
                grant.permission.clone(),
            ])
            .await
            .map_err(policy_error)?;
    }
    for role in roles {
        enforcer
            .add_grouping_policy(vec![user.to_string(), role.clone(), tenant.to_string()])
            .await
            .map_err(policy_error)?;
    }
    enforcer.build_role_links().map_err(policy_error)?;

    let rules = enforcer.get_implicit_permissions_for_user(user, Some(tenant));
    let perms: BTreeSet<String> = rules
        .into_iter()
        .filter_map(|rule| rule.get(2).cloned())
        .collect();
    Ok(perms.into_iter().collect())
}

fn policy_error(err: casbin::Error) -> AuthzError {
    AuthzError::Policy(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(role: &str, permission: &str) -> RolePermission {
        RolePermission {
            role: role.to_string(),
            permission: permission.to_string(),
        }
    }

    #[tokio::test]
    async fn expands_assigned_roles_only() {
        let grants = vec![
            grant("viewer", "users:read"),
            grant("editor", "users:write"),
            grant("editor", "users:read"),
            grant("auditor", "audit:read"),
        ];
        let perms = effective_permissions(
            &grants,
            "u1",
            &["viewer".to_string(), "editor".to_string()],
            "acme",
        )
        .await
        .expect("perms");
        assert_eq!(perms, vec!["users:read", "users:write"]);
    }

    #[tokio::test]
    async fn no_roles_means_no_permissions() {
        let perms = effective_permissions(&[grant("viewer", "users:read")], "u1", &[], "acme")
            .await
            .expect("perms");
        assert!(perms.is_empty());
    }
}
