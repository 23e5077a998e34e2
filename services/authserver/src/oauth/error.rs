//! RFC 6749 error responses.
use crate::data::DataError;
use axum::Json;
use axum::http::header::{CACHE_CONTROL, PRAGMA, WWW_AUTHENTICATE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use hellojohn_authz::AuthzError;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct OAuthErrorBody {
    pub error: &'static str,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error_description: String,
}

#[derive(Debug, Clone)]
pub struct OAuthError {
    pub status: StatusCode,
    pub body: OAuthErrorBody,
}

impl OAuthError {
    fn new(status: StatusCode, error: &'static str, description: impl Into<String>) -> Self {
        Self {
            status,
            body: OAuthErrorBody {
                error,
                error_description: description.into(),
            },
        }
    }

    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request", description)
    }

    pub fn invalid_client(description: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "invalid_client", description)
    }

    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_grant", description)
    }

    pub fn unauthorized_client(description: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized_client", description)
    }

    pub fn unsupported_grant_type(description: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "unsupported_grant_type", description)
    }

    pub fn invalid_scope(description: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_scope", description)
    }

    /// Never redirected: the redirect target itself is untrusted.
    pub fn invalid_redirect_uri(description: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_redirect_uri", description)
    }

    pub fn server_error(description: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "server_error", description)
    }

    pub fn no_database() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "server_error",
            "tenant has no user store configured",
        )
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn error(&self) -> &'static str {
        self.body.error
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let invalid_client = self.body.error == "invalid_client";
        let mut response = (self.status, Json(self.body)).into_response();
        let headers = response.headers_mut();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
        if invalid_client {
            headers.insert(
                WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"hellojohn\""),
            );
        }
        response
    }
}

impl From<DataError> for OAuthError {
    fn from(err: DataError) -> Self {
        match err {
            DataError::NoDatabase => OAuthError::no_database(),
            DataError::Unavailable(message) => {
                tracing::warn!(error = %message, "tenant store unavailable");
                OAuthError::server_error("tenant store unavailable")
                    .with_status(StatusCode::SERVICE_UNAVAILABLE)
            }
            other => {
                tracing::error!(error = %other, "tenant store failure");
                OAuthError::server_error("internal error")
            }
        }
    }
}

impl From<AuthzError> for OAuthError {
    fn from(err: AuthzError) -> Self {
        tracing::error!(error = %err, "token signing failed");
        OAuthError::server_error("could not issue token")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_rfc_mapping() {
        assert_eq!(OAuthError::invalid_request("").status, StatusCode::BAD_REQUEST);
        assert_eq!(OAuthError::invalid_client("").status, StatusCode::UNAUTHORIZED);
        assert_eq!(OAuthError::invalid_grant("").status, StatusCode::BAD_REQUEST);
        assert_eq!(OAuthError::unauthorized_client("").status, StatusCode::UNAUTHORIZED);
        assert_eq!(OAuthError::unsupported_grant_type("").status, StatusCode::BAD_REQUEST);
        assert_eq!(OAuthError::invalid_scope("").status, StatusCode::BAD_REQUEST);
        assert_eq!(OAuthError::server_error("").status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            OAuthError::from(DataError::NoDatabase).status,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn responses_are_not_cacheable_and_challenge_basic() {
        let response = OAuthError::invalid_client("bad secret").into_response();
        assert_eq!(response.headers().get(CACHE_CONTROL).unwrap(), "no-store");
        assert_eq!(response.headers().get(PRAGMA).unwrap(), "no-cache");
        assert_eq!(
            response.headers().get(WWW_AUTHENTICATE).unwrap(),
            "Basic realm=\"hellojohn\""
        );
        let response = OAuthError::invalid_grant("x").into_response();
        assert!(response.headers().get(WWW_AUTHENTICATE).is_none());
    }
}
