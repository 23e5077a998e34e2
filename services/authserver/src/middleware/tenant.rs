//! Tenant resolution.
//!
//! The tenant for a request comes from, in order: a `/t/{slug}/` path
//! prefix, the `X-Tenant-Slug` header, the `X-Tenant-ID` header, or a
//! `tenant` query parameter. Endpoints without a hint fall back to the
//! configured default tenant.
use crate::api::error::{ApiError, api_tenant_db_missing};
use crate::app::AppState;
use crate::data::{DataError, TenantDatabase};
use crate::model::Tenant;
use axum::async_trait;
use axum::extract::{FromRequestParts, Request};
use axum::http::header::HeaderName;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;

pub const X_TENANT_SLUG: HeaderName = HeaderName::from_static("x-tenant-slug");
pub const X_TENANT_ID: HeaderName = HeaderName::from_static("x-tenant-id");

/// Raw tenant hint as sent by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantHint(pub Option<String>);

pub async fn tenant_hint(mut request: Request, next: Next) -> Response {
    let hint = hint_from(request.uri(), request.headers());
    request.extensions_mut().insert(TenantHint(hint));
    next.run(request).await
}

pub fn hint_from(uri: &Uri, headers: &HeaderMap) -> Option<String> {
    let header = |name: &HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    path_slug(uri.path())
        .or_else(|| header(&X_TENANT_SLUG))
        .or_else(|| header(&X_TENANT_ID))
        .or_else(|| {
            url::form_urlencoded::parse(uri.query().unwrap_or_default().as_bytes())
                .find(|(key, value)| key == "tenant" && !value.is_empty())
                .map(|(_, value)| value.into_owned())
        })
}

fn path_slug(path: &str) -> Option<String> {
    let rest = path.strip_prefix("/t/")?;
    let slug = rest.split('/').next()?;
    (!slug.is_empty()).then(|| slug.to_string())
}

/// Look the hint (or the default tenant) up in the local control-plane copy.
pub fn resolve_tenant(state: &AppState, hint: Option<&str>) -> Result<Tenant, ApiError> {
    let wanted = hint.unwrap_or(&state.config.default_tenant);
    state.store.find_tenant(wanted).ok_or_else(|| {
        ApiError::new(
            StatusCode::NOT_FOUND,
            "tenant_not_found",
            format!("unknown tenant {wanted}"),
        )
    })
}

fn hint_of(parts: &Parts) -> Option<String> {
    parts
        .extensions
        .get::<TenantHint>()
        .and_then(|hint| hint.0.clone())
        .or_else(|| hint_from(&parts.uri, &parts.headers))
}

/// The request's tenant; 404 when the hint names no tenant.
pub struct RequireTenant(pub Tenant);

#[async_trait]
impl FromRequestParts<AppState> for RequireTenant {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let hint = hint_of(parts);
        let tenant = resolve_tenant(state, hint.as_deref())?;
        if let Some(record) = parts.extensions.get::<super::access_log::AccessRecord>() {
            record.set_tenant(&tenant.slug);
        }
        Ok(RequireTenant(tenant))
    }
}

/// The request's tenant together with its user store; 501
/// `tenant_db_missing` when the tenant has none.
pub struct RequireTenantDb {
    pub tenant: Tenant,
    pub db: Arc<dyn TenantDatabase>,
}

#[async_trait]
impl FromRequestParts<AppState> for RequireTenantDb {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let RequireTenant(tenant) = RequireTenant::from_request_parts(parts, state).await?;
        let db = tenant_db(state, &tenant.slug).await?;
        Ok(RequireTenantDb { tenant, db })
    }
}

pub async fn tenant_db(state: &AppState, slug: &str) -> Result<Arc<dyn TenantDatabase>, ApiError> {
    match state.pool.get(slug).await {
        Ok(db) => Ok(db),
        Err(DataError::NoDatabase) => Err(api_tenant_db_missing()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, value.parse().unwrap());
        }
        map
    }

    #[test]
    fn path_prefix_wins() {
        let uri: Uri = "/t/acme/.well-known/openid-configuration?tenant=other".parse().unwrap();
        let hint = hint_from(&uri, &headers(&[("x-tenant-slug", "beta")]));
        assert_eq!(hint.as_deref(), Some("acme"));
    }

    #[test]
    fn headers_then_query() {
        let uri: Uri = "/oauth2/token?tenant=gamma".parse().unwrap();
        assert_eq!(
            hint_from(&uri, &headers(&[("x-tenant-id", "beta")])).as_deref(),
            Some("beta")
        );
        assert_eq!(
            hint_from(&uri, &headers(&[("x-tenant-slug", "acme"), ("x-tenant-id", "beta")]))
                .as_deref(),
            Some("acme")
        );
        assert_eq!(hint_from(&uri, &HeaderMap::new()).as_deref(), Some("gamma"));
    }

    #[test]
    fn no_hint_is_none() {
        let uri: Uri = "/oauth2/token".parse().unwrap();
        assert_eq!(hint_from(&uri, &headers(&[("x-tenant-slug", " ")])), None);
        let uri: Uri = "/t//x".parse().unwrap();
        assert_eq!(hint_from(&uri, &HeaderMap::new()), None);
    }
}
