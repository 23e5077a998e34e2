//! System/health API handlers.
//!
//! # Purpose and responsibility
//! Liveness, readiness with raft indexes, cluster status and the Prometheus
//! scrape endpoint.
//!
//! # Key invariants and assumptions
//! - Probes never touch tenant stores; they read in-memory cluster state.
//! - `/readyz` answers `503` while the filesystem store is degraded so load
//!   balancers drain the node.
use crate::api::error::api_not_found;
use crate::api::types::{
    ClusterReadiness, ClusterStatusResponse, HealthStatus, RaftIndexes, ReadyStatus,
};
use crate::app::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use hellojohn_consensus::{ClusterStatus, NodeRole};

pub fn role_name(role: NodeRole) -> &'static str {
    match role {
        NodeRole::Leader => "leader",
        NodeRole::Follower => "follower",
        NodeRole::Candidate => "candidate",
        NodeRole::Learner => "learner",
        NodeRole::Shutdown => "shutdown",
    }
}

fn readiness(status: &ClusterStatus) -> ClusterReadiness {
    ClusterReadiness {
        role: role_name(status.role).to_string(),
        leader_id: status.leader_id,
        raft: RaftIndexes {
            commit_index: status.commit_index,
            last_log_index: status.last_log_index,
        },
    }
}

#[utoipa::path(
    get,
    path = "/healthz",
    tag = "system",
    responses(
        (status = 200, description = "Process is alive", body = HealthStatus)
    )
)]
pub(crate) async fn healthz() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/readyz",
    tag = "system",
    responses(
        (status = 200, description = "Node is ready", body = ReadyStatus),
        (status = 503, description = "Filesystem store is degraded", body = ReadyStatus)
    )
)]
pub(crate) async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<ReadyStatus>) {
    let fs_degraded = state.store.is_degraded();
    let body = ReadyStatus {
        cluster: readiness(&state.log.status()),
        fs_degraded,
    };
    let status = if fs_degraded {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(body))
}

#[utoipa::path(
    get,
    path = "/v2/cluster/status",
    tag = "system",
    responses(
        (status = 200, description = "Raft state and membership as seen by this node", body = ClusterStatusResponse)
    )
)]
pub(crate) async fn cluster_status(State(state): State<AppState>) -> Json<ClusterStatusResponse> {
    let status = state.log.status();
    Json(ClusterStatusResponse {
        node_id: status.node_id,
        cluster: readiness(&status),
        term: status.term,
        last_applied: status.last_applied,
        members: status.members,
        fs_degraded: state.store.is_degraded(),
    })
}

/// Prometheus text exposition.
pub(crate) async fn metrics(State(state): State<AppState>) -> Response {
    let Some(handle) = state.metrics.as_ref() else {
        return api_not_found("metrics are disabled").into_response();
    };
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
        .into_response()
}
