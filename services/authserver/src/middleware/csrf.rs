//! Cookie helpers and double-submit CSRF protection.
use crate::api::error::ApiError;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, COOKIE, HeaderName};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Method, StatusCode};
use hellojohn_crypto::constant_time_eq;

pub const CSRF_COOKIE: &str = "csrf_token";
pub const SESSION_COOKIE: &str = "sid";
pub const X_CSRF_TOKEN: HeaderName = HeaderName::from_static("x-csrf-token");

/// Value of the named cookie, across all `Cookie` headers.
pub fn cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

pub struct CookieOptions<'a> {
    pub max_age: i64,
    pub http_only: bool,
    pub secure: bool,
    pub path: &'a str,
}

pub fn set_cookie(name: &str, value: &str, options: &CookieOptions<'_>) -> String {
    let mut cookie = format!(
        "{name}={value}; Path={}; Max-Age={}; SameSite=Lax",
        options.path, options.max_age
    );
    if options.http_only {
        cookie.push_str("; HttpOnly");
    }
    if options.secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn clear_cookie(name: &str, path: &str) -> String {
    format!("{name}=; Path={path}; Max-Age=0; SameSite=Lax")
}

/// Verify the double-submit pair for unsafe methods on cookie-authenticated
/// requests. Bearer-authenticated requests are exempt.
pub fn check_csrf(method: &Method, headers: &HeaderMap) -> Result<(), ApiError> {
    if matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS) {
        return Ok(());
    }
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("Bearer "));
    if bearer {
        return Ok(());
    }
    let header = headers
        .get(&X_CSRF_TOKEN)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let cookie = cookie(headers, CSRF_COOKIE).unwrap_or_default();
    if header.is_empty() || cookie.is_empty() || !constant_time_eq(header.as_bytes(), cookie.as_bytes()) {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "INVALID_CSRF_TOKEN",
            "missing or mismatched csrf token",
        ));
    }
    Ok(())
}

/// Extractor form of [`check_csrf`].
pub struct CsrfGuard;

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CsrfGuard {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        check_csrf(&parts.method, &parts.headers)?;
        Ok(CsrfGuard)
    }
}
