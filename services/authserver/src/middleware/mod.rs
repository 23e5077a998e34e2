//! Request admission pipeline.
//!
//! # Purpose
//! Layers and extractors every request passes through before a handler
//! runs. Outer to inner:
//! 1. request id (`X-Request-ID`, task-local for error bodies)
//! 2. panic recovery (`500 server_error`)
//! 3. `http.request` trace span with W3C parent context
//! 4. access log
//! 5. security headers
//! 6. tenant hint
//! 7. rate limit and leader gate, on the route groups that need them
//!
//! Authentication, tenant enforcement and CSRF are extractors so each route
//! opts in by naming them in its signature.
pub mod access_log;
pub mod auth;
pub mod csrf;
pub mod leader;
pub mod rate_limit;
pub mod request_id;
pub mod tenant;

pub use access_log::{AccessRecord, access_log};
pub use auth::{
    ADMIN_AUDIENCE, AdminClaim, AdminPrincipal, RequireAdmin, RequireAuth, RequireSysAdmin,
    SessionUser, bearer_token, session_user,
};
pub use csrf::{CsrfGuard, check_csrf, cookie};
pub use leader::leader_gate;
pub use rate_limit::{RateLimiter, rate_limit};
pub use request_id::{current_request_id, request_id};
pub use tenant::{RequireTenant, RequireTenantDb, TenantHint, resolve_tenant, tenant_db, tenant_hint};

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{CONTENT_TYPE, HeaderName};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use std::any::Any;

pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    for (name, value) in [
        ("x-content-type-options", "nosniff"),
        ("x-frame-options", "DENY"),
        ("referrer-policy", "no-referrer"),
    ] {
        headers
            .entry(HeaderName::from_static(name))
            .or_insert(HeaderValue::from_static(value));
    }
    response
}

/// Body for `tower_http::catch_panic`: an OAuth-style `server_error` that
/// keeps the request id.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = detail, "handler panicked");
    let body = serde_json::json!({
        "error": "server_error",
        "error_description": "internal error",
        "request_id": current_request_id(),
    });
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::get;
    use tower::ServiceExt;
    use tower_http::catch_panic::CatchPanicLayer;

    #[tokio::test]
    async fn panics_become_server_errors_with_request_id() {
        let app = Router::new()
            .route(
                "/boom",
                get(|| async {
                    if true {
                        panic!("boom");
                    }
                    "unreachable"
                }),
            )
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(axum::middleware::from_fn(request_id));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/boom")
                    .header("x-request-id", "req-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers().get("x-request-id").unwrap(), "req-1");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "server_error");
        assert_eq!(json["request_id"], "req-1");
    }

    #[tokio::test]
    async fn security_headers_are_added() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(axum::middleware::from_fn(security_headers));
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
    }
}
