//! End-to-end tests through the HTTP router against a fake device cloud.

mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;
use std::time::Duration;
use switchgate_gateway::DeviceState;

use common::{call, login, router, test_config, FakeCloud};

#[tokio::test]
async fn login_list_toggle_scenario() {
    let cloud = FakeCloud::new();
    cloud.add_user("a", "p", "acct-a");
    cloud.add_device("acct-a", "d1", DeviceState::Unknown);
    let app = router(cloud.clone(), test_config());

    let token = login(&app, "a", "p").await;

    let (status, body) = call(&app, Method::GET, "/devices", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["devices"][0]["device_id"], "d1");
    assert_eq!(body["devices"][0]["last_known_state"], "unknown");
    assert_eq!(cloud.lists(), 1);

    let (status, body) = call(
        &app,
        Method::POST,
        "/devices/d1/toggle",
        Some(&token),
        Some(json!({ "state": "on" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["device_id"], "d1");
    assert_eq!(body["last_known_state"], "on");

    let (status, body) = call(&app, Method::GET, "/devices", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["devices"][0]["last_known_state"], "on");
    assert_eq!(cloud.lists(), 1, "second list must come from cache");
}

#[tokio::test]
async fn cached_list_is_identical() {
    let cloud = FakeCloud::new();
    cloud.add_user("a", "p", "acct-a");
    cloud.add_device("acct-a", "d2", DeviceState::Off);
    cloud.add_device("acct-a", "d1", DeviceState::On);
    let app = router(cloud.clone(), test_config());
    let token = login(&app, "a", "p").await;

    let (_, first) = call(&app, Method::GET, "/devices", Some(&token), None).await;
    let (_, second) = call(&app, Method::GET, "/devices", Some(&token), None).await;
    assert_eq!(first.to_string(), second.to_string());
    assert_eq!(first["devices"][0]["device_id"], "d2");
    assert_eq!(cloud.lists(), 1);

    call(&app, Method::GET, "/devices?refresh=true", Some(&token), None).await;
    assert_eq!(cloud.lists(), 2);
}

#[tokio::test]
async fn bad_password_and_bad_token_are_distinct() {
    let cloud = FakeCloud::new();
    cloud.add_user("a", "p", "acct-a");
    let app = router(cloud, test_config());

    let (status, body) = call(
        &app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "email": "a", "password": "nope" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_credentials");

    let (status, body) = call(&app, Method::GET, "/auth/check", Some("bogus"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_token");

    let (status, body) = call(&app, Method::GET, "/devices", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_token");
}

#[tokio::test]
async fn malformed_login_body_is_bad_request() {
    let app = router(FakeCloud::new(), test_config());
    let (status, body) = call(
        &app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({ "user": "a" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn check_reports_expired_after_ttl() {
    let cloud = FakeCloud::new();
    cloud.add_user("a", "p", "acct-a");
    let config = test_config().with_session_ttl(Duration::from_secs(1));
    let app = router(cloud, config);
    let token = login(&app, "a", "p").await;

    let (status, body) = call(&app, Method::GET, "/auth/check", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["account_id"], "acct-a");
    assert_eq!(body["status"], "active");
    assert!(body.get("token").is_none());

    tokio::time::sleep(Duration::from_millis(1100)).await;

    for _ in 0..2 {
        let (status, body) = call(&app, Method::GET, "/auth/check", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "session_expired");
    }
}

#[tokio::test]
async fn logout_is_idempotent() {
    let cloud = FakeCloud::new();
    cloud.add_user("a", "p", "acct-a");
    let app = router(cloud, test_config());
    let token = login(&app, "a", "p").await;

    for _ in 0..2 {
        let (status, body) = call(&app, Method::POST, "/auth/logout", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }
    let (status, _) = call(&app, Method::POST, "/auth/logout", Some("unknown"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, Method::POST, "/auth/logout", None, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, Method::GET, "/devices", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_token");
}

#[tokio::test]
async fn concurrent_toggle_gets_conflict() {
    let cloud = FakeCloud::new();
    cloud.add_user("a", "p", "acct-a");
    cloud.add_device("acct-a", "d1", DeviceState::Off);
    let app = router(cloud.clone(), test_config());
    let token = login(&app, "a", "p").await;
    call(&app, Method::GET, "/devices", Some(&token), None).await;

    cloud.hold_commands(true);
    let first = {
        let app = app.clone();
        let token = token.clone();
        tokio::spawn(async move {
            call(
                &app,
                Method::POST,
                "/devices/d1/toggle",
                Some(&token),
                Some(json!({ "state": "on" })),
            )
            .await
        })
    };
    cloud.entered.notified().await;

    let (status, body) = call(
        &app,
        Method::POST,
        "/devices/d1/toggle",
        Some(&token),
        Some(json!({ "state": "off" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    cloud.gate.notify_one();
    let (status, body) = first.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["last_known_state"], "on");
    assert_eq!(cloud.commands(), 1);
}

#[tokio::test]
async fn offline_toggle_keeps_state() {
    let cloud = FakeCloud::new();
    cloud.add_user("a", "p", "acct-a");
    cloud.add_device("acct-a", "d1", DeviceState::Off);
    cloud.set_offline("d1");
    let app = router(cloud.clone(), test_config());
    let token = login(&app, "a", "p").await;

    let (status, body) = call(
        &app,
        Method::POST,
        "/devices/d1/toggle",
        Some(&token),
        Some(json!({ "state": "on" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "device_offline");

    let (_, body) = call(&app, Method::GET, "/devices", Some(&token), None).await;
    assert_eq!(body["devices"][0]["last_known_state"], "off");
}

#[tokio::test]
async fn toggle_rejects_foreign_and_unknown_devices() {
    let cloud = FakeCloud::new();
    cloud.add_user("a", "p", "acct-a");
    cloud.add_user("b", "p", "acct-b");
    cloud.add_device("acct-a", "d1", DeviceState::Off);
    let app = router(cloud.clone(), test_config());
    let token_a = login(&app, "a", "p").await;
    let token_b = login(&app, "b", "p").await;
    call(&app, Method::GET, "/devices", Some(&token_a), None).await;

    let (status, body) = call(
        &app,
        Method::POST,
        "/devices/d1/toggle",
        Some(&token_b),
        Some(json!({ "state": "on" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, _) = call(
        &app,
        Method::POST,
        "/devices/nope/toggle",
        Some(&token_a),
        Some(json!({ "state": "on" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(cloud.commands(), 0);
}

#[tokio::test]
async fn toggle_rejects_unknown_state() {
    let cloud = FakeCloud::new();
    cloud.add_user("a", "p", "acct-a");
    cloud.add_device("acct-a", "d1", DeviceState::Off);
    let app = router(cloud.clone(), test_config());
    let token = login(&app, "a", "p").await;

    let (status, _) = call(
        &app,
        Method::POST,
        "/devices/d1/toggle",
        Some(&token),
        Some(json!({ "state": "unknown" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(cloud.commands(), 0);
}

#[tokio::test]
async fn list_fails_without_cache_when_cloud_down() {
    let cloud = FakeCloud::new();
    cloud.add_user("a", "p", "acct-a");
    cloud
        .list_fails
        .store(true, std::sync::atomic::Ordering::SeqCst);
    let app = router(cloud, test_config());
    let token = login(&app, "a", "p").await;

    let (status, body) = call(&app, Method::GET, "/devices", Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "backend_error");
}

#[tokio::test]
async fn login_is_throttled() {
    let cloud = FakeCloud::new();
    cloud.add_user("a", "p", "acct-a");
    let mut config = test_config();
    config.security.login_attempts_per_minute = 2;
    let app = router(cloud, config);

    let bad = json!({ "email": "a", "password": "x" });
    for _ in 0..2 {
        let (status, _) = call(&app, Method::POST, "/auth/login", None, Some(bad.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let (status, body) = call(&app, Method::POST, "/auth/login", None, Some(bad)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "rate_limited");
}

#[tokio::test]
async fn health_and_status() {
    let cloud = FakeCloud::new();
    cloud.add_user("a", "p", "acct-a");
    let app = router(cloud, test_config());
    login(&app, "a", "p").await;

    let (status, body) = call(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = call(&app, Method::GET, "/status", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active_sessions"], 1);
    assert_eq!(body["commands_in_flight"], 0);
}

#[tokio::test]
async fn malformed_list_query_is_json_bad_request() {
    let cloud = FakeCloud::new();
    cloud.add_user("a", "p", "acct-a");
    let app = router(cloud.clone(), test_config());
    let token = login(&app, "a", "p").await;

    let (status, body) = call(&app, Method::GET, "/devices?refresh=yes", Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
    assert_eq!(cloud.lists(), 0);
}
