//! API error types and helpers.
//!
//! # Purpose and responsibility
//! Centralizes admin and session error responses so every endpoint returns
//! `{"code", "message", "request_id"}` with a status that matches the code.
//!
//! # Key invariants and assumptions
//! - The request id is filled from the current request scope when the
//!   handler did not set one.
//! - Internal failures are logged server-side; the response carries a
//!   generic message only.
use crate::api::types::ErrorResponse;
use crate::cluster::ClusterError;
use crate::data::DataError;
use crate::middleware::request_id::current_request_id;
use crate::oauth::OAuthError;
use crate::store::StoreError;
use axum::Json;
use axum::http::header::{HeaderName, WWW_AUTHENTICATE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::IntoResponse;
use hellojohn_consensus::RejectReason;

pub const X_LEADER: HeaderName = HeaderName::from_static("x-leader");

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
    pub headers: Vec<(HeaderName, HeaderValue)>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                code: code.to_string(),
                message: message.into(),
                request_id: None,
            },
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.push((name, value));
        self
    }

    pub fn code(&self) -> &str {
        &self.body.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let mut body = self.body;
        if body.request_id.is_none() {
            body.request_id = current_request_id();
        }
        let mut response = (self.status, Json(body)).into_response();
        for (name, value) in self.headers {
            response.headers_mut().insert(name, value);
        }
        response
    }
}

pub fn api_not_found(message: &str) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "not_found", message)
}

pub fn api_conflict(code: &str, message: &str) -> ApiError {
    ApiError::new(StatusCode::CONFLICT, code, message)
}

pub fn api_validation(message: &str) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "validation_error", message)
}

pub fn api_precondition_failed(message: &str) -> ApiError {
    ApiError::new(StatusCode::PRECONDITION_FAILED, "precondition_failed", message)
}

/// 401 for a missing or unverifiable bearer token.
pub fn api_unauthorized(message: &str) -> ApiError {
    ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized", message).with_header(
        WWW_AUTHENTICATE,
        HeaderValue::from_static("Bearer error=\"invalid_token\""),
    )
}

/// 401 for bad credentials on login endpoints.
pub fn api_invalid_credentials() -> ApiError {
    ApiError::new(
        StatusCode::UNAUTHORIZED,
        "invalid_credentials",
        "invalid email or password",
    )
}

pub fn api_forbidden(message: &str) -> ApiError {
    ApiError::new(StatusCode::FORBIDDEN, "forbidden", message)
}

pub fn api_unavailable(message: &str) -> ApiError {
    ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "unavailable", message)
}

pub fn api_tenant_db_missing() -> ApiError {
    ApiError::new(
        StatusCode::NOT_IMPLEMENTED,
        "tenant_db_missing",
        "tenant has no user store configured",
    )
}

pub fn api_internal(message: &str, err: &dyn std::fmt::Display) -> ApiError {
    tracing::error!(error = %err, "{message}");
    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

/// 409 naming the current leader, or 503 when no leader is known.
pub fn api_not_leader(leader_id: Option<u64>) -> ApiError {
    match leader_id {
        Some(leader) => {
            let err = api_conflict("not_leader", "writes must be sent to the leader");
            match HeaderValue::from_str(&leader.to_string()) {
                Ok(value) => err.with_header(X_LEADER, value),
                Err(_) => err,
            }
        }
        None => ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "no_leader",
            "cluster has no leader",
        ),
    }
}

impl From<ClusterError> for ApiError {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::NotLeader { leader_id, .. } => api_not_leader(leader_id),
            ClusterError::Unavailable(message) => {
                tracing::warn!(error = %message, "cluster submit failed");
                api_unavailable("control plane unavailable")
            }
            ClusterError::Rejected { reason, message } => match reason {
                RejectReason::NotFound => api_not_found(&message),
                RejectReason::Conflict => api_conflict("conflict", &message),
                RejectReason::PreconditionFailed => api_precondition_failed(&message),
                RejectReason::Invalid => api_validation(&message),
                RejectReason::Degraded => api_unavailable(&message),
            },
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(message) => api_not_found(&message),
            StoreError::Conflict(message) => api_conflict("conflict", &message),
            StoreError::PreconditionFailed(message) => api_precondition_failed(&message),
            StoreError::Invalid(message) => api_validation(&message),
            StoreError::Degraded(message) => api_unavailable(&message),
            StoreError::Unexpected(err) => api_internal("control plane read failed", &err),
        }
    }
}

impl From<DataError> for ApiError {
    fn from(err: DataError) -> Self {
        match err {
            DataError::NoDatabase => api_tenant_db_missing(),
            DataError::NotFound(message) => api_not_found(&message),
            DataError::Conflict(message) => api_conflict("conflict", &message),
            DataError::Unavailable(message) => {
                tracing::warn!(error = %message, "tenant store unavailable");
                api_unavailable("tenant store unavailable")
            }
            DataError::Unexpected(err) => api_internal("tenant store failure", &err),
        }
    }
}

/// Re-shape an OAuth error for the JSON login endpoints. `invalid_grant`
/// becomes `401` there: the caller's credential is no longer valid.
impl From<OAuthError> for ApiError {
    fn from(err: OAuthError) -> Self {
        let status = if err.error() == "invalid_grant" {
            StatusCode::UNAUTHORIZED
        } else {
            err.status
        };
        ApiError::new(status, err.error(), err.body.error_description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_leader_carries_leader_header() {
        let err: ApiError = ClusterError::NotLeader {
            leader_id: Some(2),
            leader_addr: None,
        }
        .into();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert!(
            err.headers
                .iter()
                .any(|(name, value)| name == X_LEADER && value == "2")
        );
    }

    #[test]
    fn unknown_leader_is_unavailable() {
        let err = api_not_leader(None);
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code(), "no_leader");
    }

    #[test]
    fn rejections_map_to_statuses() {
        let cases = [
            (RejectReason::NotFound, StatusCode::NOT_FOUND),
            (RejectReason::Conflict, StatusCode::CONFLICT),
            (RejectReason::PreconditionFailed, StatusCode::PRECONDITION_FAILED),
            (RejectReason::Invalid, StatusCode::BAD_REQUEST),
            (RejectReason::Degraded, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (reason, status) in cases {
            let err: ApiError = ClusterError::Rejected {
                reason,
                message: "x".to_string(),
            }
            .into();
            assert_eq!(err.status, status);
        }
    }

    #[test]
    fn missing_tenant_db_is_not_implemented() {
        let err: ApiError = DataError::NoDatabase.into();
        assert_eq!(err.status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(err.code(), "tenant_db_missing");
    }
}
