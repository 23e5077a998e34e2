//! Bearer and session authentication.
//!
//! - [`RequireAuth`]: any valid access token.
//! - [`RequireAdmin`]: an admin token (`aud = hellojohn-admin`) whose subject
//!   is still an enabled administrator.
//! - [`RequireSysAdmin`]: an admin token with the system-admin role.
//! - [`session_user`]: the user behind the `sid` cookie, if any.
use super::access_log::AccessRecord;
use super::csrf::{SESSION_COOKIE, cookie};
use crate::api::error::{ApiError, api_forbidden, api_unauthorized};
use crate::app::AppState;
use crate::data::{DataResult, TenantDatabase};
use crate::model::AdminRole;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::Utc;
use hellojohn_authz::{ADMIN_CLAIM, TokenClaims, TokenUse};
use hellojohn_crypto::sha256_b64url;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ADMIN_AUDIENCE: &str = "hellojohn-admin";

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

fn record_subject(parts: &Parts, claims: &TokenClaims) {
    if let Some(record) = parts.extensions.get::<AccessRecord>() {
        record.set_subject(&claims.sub);
        record.set_tenant(&claims.tid);
    }
}

/// Claims of a verified access token.
pub struct RequireAuth(pub TokenClaims);

#[async_trait]
impl FromRequestParts<AppState> for RequireAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or_else(|| api_unauthorized("missing bearer token"))?;
        let claims = state.verifier.verify(token, TokenUse::Access).map_err(|err| {
            tracing::debug!(error = %err, "bearer token rejected");
            api_unauthorized("invalid token")
        })?;
        record_subject(parts, &claims);
        Ok(RequireAuth(claims))
    }
}

/// Body of the namespaced admin claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminClaim {
    pub role: AdminRole,
    #[serde(default)]
    pub tenants: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AdminPrincipal {
    pub id: String,
    pub role: AdminRole,
    pub tenants: Vec<String>,
}

impl AdminPrincipal {
    /// 403 unless this admin may manage `slug`.
    pub fn ensure_tenant(&self, slug: &str) -> Result<(), ApiError> {
        match self.role {
            AdminRole::SysAdmin => Ok(()),
            AdminRole::TenantAdmin if self.tenants.iter().any(|allowed| allowed == slug) => Ok(()),
            AdminRole::TenantAdmin => Err(api_forbidden("tenant is outside this admin's scope")),
        }
    }

    pub fn is_sys_admin(&self) -> bool {
        self.role == AdminRole::SysAdmin
    }
}

pub struct RequireAdmin(pub AdminPrincipal);

#[async_trait]
impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let RequireAuth(claims) = RequireAuth::from_request_parts(parts, state).await?;
        if claims.aud != ADMIN_AUDIENCE {
            return Err(api_forbidden("not an admin token"));
        }
        let claim: AdminClaim = claims
            .claim(ADMIN_CLAIM)
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
            .ok_or_else(|| api_forbidden("admin claim missing"))?;
        let record = state
            .store
            .admin(&claims.sub)
            .map_err(|_| api_unauthorized("admin no longer exists"))?
            .value;
        if record.disabled {
            return Err(api_unauthorized("admin is disabled"));
        }
        Ok(RequireAdmin(AdminPrincipal {
            id: claims.sub,
            role: claim.role,
            tenants: claim.tenants,
        }))
    }
}

pub struct RequireSysAdmin(pub AdminPrincipal);

#[async_trait]
impl FromRequestParts<AppState> for RequireSysAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let RequireAdmin(principal) = RequireAdmin::from_request_parts(parts, state).await?;
        if !principal.is_sys_admin() {
            return Err(api_forbidden("system admin role required"));
        }
        Ok(RequireSysAdmin(principal))
    }
}

/// Authenticated browser session.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub user_id: Uuid,
    pub id_hash: String,
}

/// Resolve the `sid` cookie against the tenant's session store and bump its
/// activity timestamp. `None` when there is no live session.
pub async fn session_user(
    db: &dyn TenantDatabase,
    headers: &HeaderMap,
) -> DataResult<Option<SessionUser>> {
    let Some(raw) = cookie(headers, SESSION_COOKIE) else {
        return Ok(None);
    };
    let id_hash = sha256_b64url(&raw);
    let now = Utc::now();
    let Some(session) = db.sessions().get(&id_hash).await? else {
        return Ok(None);
    };
    if !session.is_active(now) {
        return Ok(None);
    }
    db.sessions().update_activity(&id_hash, now).await?;
    Ok(Some(SessionUser {
        user_id: session.user_id,
        id_hash,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc"));
        headers.insert(AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
        headers.insert(AUTHORIZATION, "Bearer ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn tenant_admins_are_scoped() {
        let principal = AdminPrincipal {
            id: "a".to_string(),
            role: AdminRole::TenantAdmin,
            tenants: vec!["acme".to_string()],
        };
        assert!(principal.ensure_tenant("acme").is_ok());
        assert_eq!(
            principal.ensure_tenant("beta").unwrap_err().status,
            axum::http::StatusCode::FORBIDDEN
        );
        let sys = AdminPrincipal {
            role: AdminRole::SysAdmin,
            tenants: vec![],
            ..principal
        };
        assert!(sys.ensure_tenant("beta").is_ok());
    }
}
