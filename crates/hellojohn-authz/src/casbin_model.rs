use crate::{AuthzError, AuthzResult};
use casbin::prelude::DefaultModel;

// Tenant-scoped RBAC: users hold roles per tenant, roles grant permission
// patterns such as `users:read` or `reports:*`.
const MODEL: &str = r#"
[request_definition]
r = sub, dom, obj

[policy_definition]
p = sub, dom, obj

[role_definition]
g = _, _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub, r.dom) && r.dom == p.dom && keyMatch(r.obj, p.obj)
"#;

pub fn casbin_model_string() -> &'static str {
    MODEL
}

pub async fn casbin_model() -> AuthzResult<DefaultModel> {
    DefaultModel::from_str(MODEL)
        .await
        .map_err(|err| AuthzError::Policy(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use casbin::Model;

    #[test]
    fn model_string_is_domain_scoped() {
        let model = casbin_model_string();
        assert!(model.contains("r.dom == p.dom"));
        assert!(model.contains("keyMatch"));
    }

    #[tokio::test]
    async fn model_builds() {
        let model = casbin_model().await.expect("model");
        let data = model.get_model();
        assert!(data.contains_key("r"));
        assert!(data.contains_key("p"));
        assert!(data.contains_key("g"));
    }
}
