mod common;
mod http_helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{read_json, spawn_app};
use http_helpers::get;
use tower::ServiceExt;

#[tokio::test]
async fn discovery_documents_and_jwks() {
    let test = spawn_app().await;
    let app = test.router.clone().into_service();

    let response = app
        .clone()
        .oneshot(get("/.well-known/openid-configuration"))
        .await
        .expect("discovery");
    assert_eq!(response.status(), StatusCode::OK);
    let global = read_json(response).await;
    assert_eq!(global["issuer"], "http://localhost:8080");
    assert_eq!(global["jwks_uri"], "http://localhost:8080/.well-known/jwks.json");
    assert_eq!(global["token_endpoint"], "http://localhost:8080/oauth2/token");
    assert!(
        global["code_challenge_methods_supported"]
            .as_array()
            .expect("methods")
            .contains(&serde_json::json!("S256"))
    );

    let response = app
        .clone()
        .oneshot(get("/t/local/.well-known/openid-configuration"))
        .await
        .expect("tenant discovery");
    assert_eq!(response.status(), StatusCode::OK);
    let tenant = read_json(response).await;
    assert_eq!(tenant["issuer"], "http://localhost:8080/t/local");
    assert_eq!(
        tenant["jwks_uri"],
        "http://localhost:8080/.well-known/jwks/local.json"
    );

    let response = app
        .clone()
        .oneshot(get("/.well-known/jwks/local.json"))
        .await
        .expect("tenant jwks");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("cache-control").is_some());
    let jwks = read_json(response).await;
    let keys = jwks["keys"].as_array().expect("keys");
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["kty"], "OKP");
    assert_eq!(keys[0]["crv"], "Ed25519");
    assert!(keys[0].get("d").is_none(), "private material must never be published");

    let response = app
        .clone()
        .oneshot(get("/.well-known/jwks.json"))
        .await
        .expect("global jwks");
    assert_eq!(response.status(), StatusCode::OK);
    let global_keys = read_json(response).await;
    assert_eq!(global_keys["keys"], jwks["keys"]);

    let response = app
        .clone()
        .oneshot(get("/.well-known/jwks/ghost.json"))
        .await
        .expect("unknown tenant jwks");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn system_endpoints_and_common_headers() {
    let test = spawn_app().await;
    let app = test.router.clone().into_service();

    let response = app.clone().oneshot(get("/healthz")).await.expect("healthz");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    assert!(response.headers().get("x-request-id").is_some());
    assert_eq!(read_json(response).await["status"], "ok");

    let response = app.clone().oneshot(get("/readyz")).await.expect("readyz");
    assert_eq!(response.status(), StatusCode::OK);
    let ready = read_json(response).await;
    assert_eq!(ready["cluster"]["role"], "leader");
    assert_eq!(ready["fs_degraded"], false);

    let response = app
        .clone()
        .oneshot(get("/v2/cluster/status"))
        .await
        .expect("cluster status");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["node_id"], 1);

    let response = app
        .clone()
        .oneshot(get("/v2/openapi.json"))
        .await
        .expect("openapi");
    assert_eq!(response.status(), StatusCode::OK);
    let doc = read_json(response).await;
    assert!(doc["paths"]["/v1/auth/login"].is_object());

    // Metrics were not installed for this state.
    let response = app.clone().oneshot(get("/metrics")).await.expect("metrics");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let request = Request::builder()
        .uri("/t/ghost/.well-known/openid-configuration")
        .header("x-request-id", "req-123")
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("unknown tenant");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers().get("x-request-id").unwrap(), "req-123");
    let body = read_json(response).await;
    assert_eq!(body["code"], "not_found");
    assert_eq!(body["request_id"], "req-123");
}

#[tokio::test]
async fn signing_key_cache_expires_within_jwks_window() {
    let test = spawn_app().await;
    assert!(test.state.keys.cache_ttl() <= std::time::Duration::from_secs(35));
    assert_eq!(test.state.keys.cache_ttl(), hellojohn_authz::KEY_CACHE_TTL);
}
