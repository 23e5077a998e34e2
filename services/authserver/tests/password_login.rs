mod common;
mod http_helpers;

use axum::extract::ConnectInfo;
use axum::http::StatusCode;
use common::{USER_EMAIL, USER_PASSWORD, read_json, spawn_app, spawn_app_with};
use std::net::{IpAddr, SocketAddr};
use http_helpers::{authed_request, json_request};
use tower::ServiceExt;

fn login_body(password: &str) -> serde_json::Value {
    serde_json::json!({
        "client_id": "web",
        "email": USER_EMAIL,
        "password": password,
    })
}

#[tokio::test]
async fn password_login_refresh_and_reuse_detection() {
    let test = spawn_app().await;
    let app = test.router.clone().into_service();

    let response = app
        .clone()
        .oneshot(json_request("POST", "/v1/auth/login", login_body(USER_PASSWORD)))
        .await
        .expect("login");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("cache-control").unwrap(), "no-store");
    let tokens = read_json(response).await;
    assert_eq!(tokens["token_type"], "Bearer");
    assert_eq!(tokens["scope"], "email openid profile");
    assert!(tokens.get("id_token").is_none());
    let access = tokens["access_token"].as_str().expect("access").to_string();
    let first_refresh = tokens["refresh_token"].as_str().expect("refresh").to_string();

    let response = app
        .clone()
        .oneshot(authed_request("GET", "/userinfo", &access))
        .await
        .expect("userinfo");
    assert_eq!(response.status(), StatusCode::OK);
    let profile = read_json(response).await;
    assert_eq!(profile["sub"], test.user_id.to_string());
    assert_eq!(profile["email"], USER_EMAIL);
    assert_eq!(profile["name"], "Alice");

    let refresh = |token: &str| {
        json_request(
            "POST",
            "/v1/auth/refresh",
            serde_json::json!({ "client_id": "web", "refresh_token": token }),
        )
    };
    let response = app
        .clone()
        .oneshot(refresh(&first_refresh))
        .await
        .expect("refresh");
    assert_eq!(response.status(), StatusCode::OK);
    let rotated = read_json(response).await;
    let second_refresh = rotated["refresh_token"].as_str().expect("refresh").to_string();
    assert_ne!(first_refresh, second_refresh);

    // Presenting the rotated-out token again burns the whole family.
    let response = app
        .clone()
        .oneshot(refresh(&first_refresh))
        .await
        .expect("reuse");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(read_json(response).await["code"], "invalid_grant");

    let response = app
        .clone()
        .oneshot(refresh(&second_refresh))
        .await
        .expect("family revoked");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn bad_credentials_share_one_answer() {
    let test = spawn_app().await;
    let app = test.router.clone().into_service();

    let response = app
        .clone()
        .oneshot(json_request("POST", "/v1/auth/login", login_body("wrong")))
        .await
        .expect("login");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let wrong_password = read_json(response).await;
    assert_eq!(wrong_password["code"], "invalid_credentials");

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/auth/login",
            serde_json::json!({
                "client_id": "web",
                "email": "nobody@example.com",
                "password": USER_PASSWORD,
            }),
        ))
        .await
        .expect("login");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let unknown = read_json(response).await;
    assert_eq!(unknown["code"], wrong_password["code"]);
    assert_eq!(unknown["message"], wrong_password["message"]);
}

#[tokio::test]
async fn logout_revokes_and_is_idempotent() {
    let test = spawn_app().await;
    let app = test.router.clone().into_service();

    let response = app
        .clone()
        .oneshot(json_request("POST", "/v1/auth/login", login_body(USER_PASSWORD)))
        .await
        .expect("login");
    let refresh_token = read_json(response).await["refresh_token"]
        .as_str()
        .expect("refresh")
        .to_string();

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/v1/auth/logout",
                serde_json::json!({ "refresh_token": refresh_token }),
            ))
            .await
            .expect("logout");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/auth/refresh",
            serde_json::json!({ "client_id": "web", "refresh_token": refresh_token }),
        ))
        .await
        .expect("refresh");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_tenant_hint_is_not_found() {
    let test = spawn_app().await;
    let app = test.router.clone().into_service();

    let mut request = json_request("POST", "/v1/auth/login", login_body(USER_PASSWORD));
    request
        .headers_mut()
        .insert("x-tenant-slug", "nope".parse().expect("header"));
    let response = app.oneshot(request).await.expect("login");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

fn login_from(peer: [u8; 4], forwarded: &str) -> axum::http::Request<axum::body::Body> {
    let mut request = json_request("POST", "/v1/auth/login", login_body("wrong-password"));
    request
        .headers_mut()
        .insert("x-forwarded-for", forwarded.parse().expect("header"));
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from((peer, 51_000))));
    request
}

#[tokio::test]
async fn rotating_forwarded_for_does_not_escape_the_limit() {
    let test = spawn_app_with(|config| {
        config.rate_limit_per_minute = 1;
        config.rate_limit_burst = 1;
    })
    .await;
    let app = test.router.clone().into_service();

    let mut statuses = Vec::new();
    for n in 1..=4 {
        let response = app
            .clone()
            .oneshot(login_from([203, 0, 113, 7], &format!("198.51.100.{n}")))
            .await
            .expect("login");
        statuses.push(response.status());
    }
    assert_eq!(
        statuses,
        vec![
            StatusCode::UNAUTHORIZED,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::TOO_MANY_REQUESTS,
        ]
    );
}

#[tokio::test]
async fn trusted_proxy_forwards_distinct_clients() {
    let test = spawn_app_with(|config| {
        config.rate_limit_per_minute = 1;
        config.rate_limit_burst = 1;
        config.trusted_proxies = vec![IpAddr::from([10, 0, 0, 1])];
    })
    .await;
    let app = test.router.clone().into_service();

    for forwarded in ["198.51.100.1", "198.51.100.2"] {
        let response = app
            .clone()
            .oneshot(login_from([10, 0, 0, 1], forwarded))
            .await
            .expect("login");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
    let response = app
        .clone()
        .oneshot(login_from([10, 0, 0, 1], "198.51.100.1"))
        .await
        .expect("login");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
}
