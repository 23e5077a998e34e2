//! Access log.
//!
//! One `tracing` event per request on the `access` target. Extractors deeper
//! in the stack fill in the tenant and subject through the shared
//! [`AccessRecord`] placed in the request extensions.
use super::request_id::RequestId;
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Default)]
struct AccessFields {
    tenant: Option<String>,
    subject: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AccessRecord(Arc<Mutex<AccessFields>>);

impl AccessRecord {
    pub fn set_tenant(&self, tenant: &str) {
        self.0.lock().tenant = Some(tenant.to_string());
    }

    pub fn set_subject(&self, subject: &str) {
        self.0.lock().subject = Some(subject.to_string());
    }

    fn snapshot(&self) -> (Option<String>, Option<String>) {
        let fields = self.0.lock();
        (fields.tenant.clone(), fields.subject.clone())
    }
}

pub async fn access_log(mut request: Request, next: Next) -> Response {
    let started = Instant::now();
    let record = AccessRecord::default();
    request.extensions_mut().insert(record.clone());
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();

    let response = next.run(request).await;

    let (tenant, subject) = record.snapshot();
    let status = response.status().as_u16();
    tracing::info!(
        target: "access",
        request_id = %request_id,
        method = %method,
        path = %path,
        status,
        latency_ms = started.elapsed().as_millis() as u64,
        tenant = tenant.as_deref().unwrap_or("-"),
        user = subject.as_deref().unwrap_or("-"),
        "request completed"
    );
    response
}
