mod common;
mod http_helpers;

use async_trait::async_trait;
use authserver::app::{build_router, build_state};
use authserver::cluster::{Applied, ClusterError, ControlPlaneLog};
use authserver::store::FsStore;
use axum::http::StatusCode;
use common::{read_json, test_config};
use hellojohn_consensus::{ClusterStatus, Command, NodeId, NodeRole};
use http_helpers::{get, json_request};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower::ServiceExt;

/// A node that never leads and knows who does.
struct FollowerLog {
    leader: Option<NodeId>,
}

#[async_trait]
impl ControlPlaneLog for FollowerLog {
    async fn submit(&self, _command: Command) -> Result<Applied, ClusterError> {
        Err(ClusterError::NotLeader {
            leader_id: self.leader,
            leader_addr: None,
        })
    }

    fn is_leader(&self) -> bool {
        false
    }

    fn leader_id(&self) -> Option<NodeId> {
        self.leader
    }

    fn status(&self) -> ClusterStatus {
        ClusterStatus {
            node_id: 3,
            role: NodeRole::Follower,
            leader_id: self.leader,
            term: 4,
            commit_index: 10,
            last_log_index: 10,
            last_applied: 10,
            members: BTreeMap::new(),
        }
    }
}

fn follower_app(dir: &tempfile::TempDir, leader: Option<NodeId>) -> axum::Router {
    let mut config = test_config(dir);
    config.cluster.node_id = 3;
    config.cluster.leader_redirects =
        BTreeMap::from([(2, "http://node2.example.com:8080/".to_string())]);
    config.cluster.redirect_allowed_hosts = vec!["node2.example.com".to_string()];
    let store = FsStore::open(dir.path()).expect("store");
    let state = build_state(config, store, Arc::new(FollowerLog { leader }), None);
    build_router(state)
}

#[tokio::test]
async fn follower_refuses_control_plane_writes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = follower_app(&dir, Some(2)).into_service();

    let create = || {
        json_request(
            "POST",
            "/v2/admin/tenants?source=test",
            serde_json::json!({ "slug": "acme", "name": "Acme" }),
        )
    };

    let response = app.clone().oneshot(create()).await.expect("write");
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(response.headers().get("x-leader").unwrap(), "2");
    assert_eq!(read_json(response).await["code"], "not_leader");

    let mut redirected = create();
    redirected
        .headers_mut()
        .insert("x-leader-redirect", "1".parse().expect("header"));
    let response = app.clone().oneshot(redirected).await.expect("redirect");
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers().get("location").unwrap(),
        "http://node2.example.com:8080/v2/admin/tenants?source=test"
    );
    assert_eq!(
        response.headers().get("x-leader-url").unwrap(),
        "http://node2.example.com:8080"
    );

    // Reads and tenant-data routes are served locally.
    let response = app.clone().oneshot(get("/readyz")).await.expect("readyz");
    assert_eq!(response.status(), StatusCode::OK);
    let ready = read_json(response).await;
    assert_eq!(ready["cluster"]["role"], "follower");
    assert_eq!(ready["cluster"]["leader_id"], 2);

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v2/admin/tenants/local/users",
            serde_json::json!({ "email": "x@example.com" }),
        ))
        .await
        .expect("data route");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn follower_without_leader_is_unavailable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = follower_app(&dir, None).into_service();

    let response = app
        .oneshot(json_request(
            "DELETE",
            "/v2/admin/tenants/acme",
            serde_json::json!({}),
        ))
        .await
        .expect("write");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(read_json(response).await["code"], "no_leader");
}
