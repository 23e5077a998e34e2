//! Leader gate for control-plane writes.
//!
//! Safe methods pass on every node. Other methods pass only on the leader;
//! followers answer `409` with `X-Leader`, or `307` to the leader's public
//! base URL when the caller sent `X-Leader-Redirect: 1` and that URL's host is
//! allowlisted.
use crate::api::error::api_not_leader;
use crate::app::AppState;
use crate::config::ClusterConfig;
use axum::extract::{OriginalUri, Request, State};
use axum::http::header::{HeaderName, LOCATION};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use url::Url;

pub const X_LEADER_REDIRECT: HeaderName = HeaderName::from_static("x-leader-redirect");
pub const X_LEADER_URL: HeaderName = HeaderName::from_static("x-leader-url");

pub async fn leader_gate(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if is_safe(request.method()) || state.log.is_leader() {
        return next.run(request).await;
    }
    let leader = state.log.leader_id();
    let wants_redirect = request
        .headers()
        .get(&X_LEADER_REDIRECT)
        .is_some_and(|value| value.as_bytes() == b"1");
    if wants_redirect
        && let Some(leader) = leader
        && let Some(base) = redirect_base(&state.config.cluster, leader)
    {
        // Nested routers see a stripped path; the original one is what the
        // leader serves.
        let uri = request
            .extensions()
            .get::<OriginalUri>()
            .map(|original| &original.0)
            .unwrap_or(request.uri());
        let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let location = format!("{base}{path}");
        tracing::debug!(leader, location = %location, "redirecting write to leader");
        if let (Ok(location), Ok(base)) =
            (HeaderValue::from_str(&location), HeaderValue::from_str(&base))
        {
            return (
                StatusCode::TEMPORARY_REDIRECT,
                [(LOCATION, location), (X_LEADER_URL, base)],
            )
                .into_response();
        }
    }
    tracing::debug!(leader = ?leader, path = %request.uri().path(), "write refused on follower");
    api_not_leader(leader).into_response()
}

fn is_safe(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Leader's public base URL, if one is configured and its host is allowed.
pub fn redirect_base(cluster: &ClusterConfig, leader: u64) -> Option<String> {
    let base = cluster.leader_redirects.get(&leader)?;
    let url = Url::parse(base).ok()?;
    let host = url.host_str()?;
    let with_port = url.port().map(|port| format!("{host}:{port}"));
    let allowed = cluster.redirect_allowed_hosts.iter().any(|allowed| {
        allowed.eq_ignore_ascii_case(host)
            || with_port
                .as_deref()
                .is_some_and(|hp| allowed.eq_ignore_ascii_case(hp))
    });
    allowed.then(|| base.trim_end_matches('/').to_string())
}
