//! HTTP surface smoke tests through the full router.

mod common;

use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use common::{ScriptedGateway, services};
use notifeed::api::{ApiServer, ApiServerConfig, AppState};

async fn app() -> axum::Router {
    let services = services(Arc::new(ScriptedGateway::new())).await;
    ApiServer::new(ApiServerConfig::default(), AppState::new(services)).build_router()
}

async fn call(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn device_token_lifecycle() {
    let app = app().await;

    let (status, _) = call(&app, "GET", "/api/users/alice/device-token", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(
        &app,
        "PUT",
        "/api/users/alice/device-token",
        Some(json!({ "token": "tok-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token"], "tok-1");

    let (status, body) = call(&app, "DELETE", "/api/users/alice/device-token", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], true);

    let (status, body) = call(
        &app,
        "PUT",
        "/api/users/alice/device-token",
        Some(json!({ "token": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn notification_shows_up_in_feed_and_is_read_on_open() {
    let app = app().await;

    let (status, body) = call(
        &app,
        "POST",
        "/api/users/alice/notifications",
        Some(json!({
            "from_user": { "id": "bob", "display_name": "Bob" },
            "kind": "comment",
            "entity_id": "status-7",
            "message": "commented on your status"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["outcome"]["status"], "no_token");
    assert_eq!(body["record"]["is_read"], false);

    let (status, body) = call(&app, "GET", "/api/users/alice/feed?limit=10", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["unread_count"], 1);
    assert_eq!(body["records"][0]["from_user_name"], "Bob");

    let (status, body) = call(&app, "POST", "/api/users/alice/feed/opened", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["marked_read"], 1);

    let (_, body) = call(&app, "GET", "/api/users/alice/feed", None).await;
    assert_eq!(body["unread_count"], 0);
}

#[tokio::test]
async fn broadcast_reports_counts() {
    let app = app().await;
    for (user, token) in [("a", "tok-a"), ("b", "dead-b")] {
        call(
            &app,
            "PUT",
            &format!("/api/users/{user}/device-token"),
            Some(json!({ "token": token })),
        )
        .await;
    }

    let (status, body) = call(
        &app,
        "POST",
        "/api/notifications/broadcast",
        Some(json!({ "title": "Hi", "body": "All" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success_count"], 1);
    assert_eq!(body["failure_count"], 1);
    assert_eq!(body["invalidated_count"], 1);
}

#[tokio::test]
async fn health_and_openapi_are_served() {
    let app = app().await;

    let (status, body) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = call(&app, "GET", "/api/openapi.json", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/users/{user_id}/feed"].is_object());

    // No logging config attached in tests.
    let (status, _) = call(&app, "GET", "/api/logging", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
