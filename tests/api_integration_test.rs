//! HTTP surface tests on the in-memory service implementations.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use codecollab::auth::TokenSigner;
use codecollab::config::Config;
use codecollab::hub::Hub;
use codecollab::queue::{JobQueue, MemoryJobQueue};
use codecollab::ratelimit::{MemoryRateLimiter, RateLimiter};
use codecollab::repository::{MemoryRepository, Repository};
use codecollab::sandbox::{ExecutionRequest, Sandbox, SandboxError};
use codecollab::services::AppServices;
use codecollab::{api, models::ExecutionResult};

struct NullSandbox;

#[async_trait::async_trait]
impl Sandbox for NullSandbox {
    async fn execute(&self, _request: ExecutionRequest) -> Result<ExecutionResult, SandboxError> {
        Err(SandboxError::Container("not under test".into()))
    }

    async fn preflight(&self) -> Result<(), SandboxError> {
        Ok(())
    }
}

fn app() -> Router {
    let config = Arc::new(Config::default());
    let repository: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
    let ratelimiter: Arc<dyn RateLimiter> = Arc::new(MemoryRateLimiter::new());
    let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new());
    let sandbox: Arc<dyn Sandbox> = Arc::new(NullSandbox);
    let signer = Arc::new(TokenSigner::new(&config.jwt_secret, config.token_ttl));
    let hub = Hub::new(repository.clone(), queue.clone(), config.clone());

    api::router(AppServices::new(
        config,
        repository,
        ratelimiter,
        queue,
        sandbox,
        hub,
        signer,
    ))
}

fn request(method: &str, path: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let mut request = builder.body(body).unwrap();
    // The router is driven without a real listener, so the peer address
    // extension is installed by hand.
    let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(addr));
    request
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn register(app: &Router, email: &str) -> String {
    let (status, body) = send(
        app,
        request(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({
                "email": email,
                "displayName": "Tester",
                "password": "s3cret-pass",
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "register failed: {body}");
    body["data"]["token"].as_str().unwrap().to_string()
}

async fn create_room(app: &Router, token: &str, body: Value) -> (StatusCode, Value) {
    send(app, request("POST", "/api/rooms", Some(token), Some(body))).await
}

#[tokio::test]
async fn register_login_round_trip() {
    let app = app();
    let _token = register(&app, "alice@example.com").await;

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "Alice@Example.com", "password": "s3cret-pass"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["data"]["token"].is_string());
    assert_eq!(body["data"]["user"]["displayName"], "Tester");
}

#[tokio::test]
async fn login_failure_uses_the_error_envelope() {
    let app = app();
    register(&app, "alice@example.com").await;

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": "alice@example.com", "password": "wrong"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "unauthorized");
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let app = app();
    register(&app, "alice@example.com").await;

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({
                "email": "alice@example.com",
                "displayName": "Imposter",
                "password": "s3cret-pass",
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    let app = app();
    let (status, _) = send(&app, request("GET", "/api/rooms", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, request("GET", "/api/rooms", Some("garbage"), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn room_crud_flow() {
    let app = app();
    let token = register(&app, "owner@example.com").await;

    let (status, body) = create_room(
        &app,
        &token,
        json!({"name": "Algo practice", "language": "python", "maxCapacity": 3}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "create failed: {body}");
    let room_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        request("GET", &format!("/api/rooms/{room_id}"), Some(&token), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Algo practice");
    assert_eq!(body["data"]["members"][0]["role"], "owner");

    let (status, body) = send(
        &app,
        request(
            "PUT",
            &format!("/api/rooms/{room_id}"),
            Some(&token),
            Some(json!({"name": "Renamed room"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Renamed room");

    let (status, body) = send(
        &app,
        request("GET", "/api/rooms", Some(&token), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, _) = send(
        &app,
        request("DELETE", &format!("/api/rooms/{room_id}"), Some(&token), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        request("GET", &format!("/api/rooms/{room_id}"), Some(&token), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn room_validation_rules_are_enforced() {
    let app = app();
    let token = register(&app, "owner@example.com").await;

    // Name too short.
    let (status, body) =
        create_room(&app, &token, json!({"name": "ab", "language": "python"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");

    // Capacity outside 2..=50.
    let (status, _) = create_room(
        &app,
        &token,
        json!({"name": "Big room", "language": "python", "maxCapacity": 51}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Unknown language.
    let (status, _) =
        create_room(&app, &token, json!({"name": "Weird", "language": "cobol"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Private without a password.
    let (status, _) = create_room(
        &app,
        &token,
        json!({"name": "Hidden", "language": "python", "visibility": "private"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn private_room_join_via_http() {
    let app = app();
    let owner = register(&app, "owner@example.com").await;
    let guest = register(&app, "guest@example.com").await;

    let (_, body) = create_room(
        &app,
        &owner,
        json!({
            "name": "Secret room",
            "language": "python",
            "visibility": "private",
            "password": "hunter2",
        }),
    )
    .await;
    let room_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        request(
            "POST",
            &format!("/api/rooms/{room_id}/join"),
            Some(&guest),
            Some(json!({"password": "wrong"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "bad_password");

    let (status, body) = send(
        &app,
        request(
            "POST",
            &format!("/api/rooms/{room_id}/join"),
            Some(&guest),
            Some(json!({"password": "hunter2"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "join failed: {body}");
    assert_eq!(body["data"]["role"], "member");

    // Leaving removes the membership; the private room disappears from the
    // guest's listing.
    let (status, _) = send(
        &app,
        request(
            "POST",
            &format!("/api/rooms/{room_id}/leave"),
            Some(&guest),
            Some(json!({})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(&app, request("GET", "/api/rooms", Some(&guest), None)).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn capacity_is_enforced_on_http_join() {
    let app = app();
    let owner = register(&app, "owner@example.com").await;
    let second = register(&app, "second@example.com").await;
    let third = register(&app, "third@example.com").await;

    let (_, body) = create_room(
        &app,
        &owner,
        json!({"name": "Tiny room", "language": "python", "maxCapacity": 2}),
    )
    .await;
    let room_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        request(
            "POST",
            &format!("/api/rooms/{room_id}/join"),
            Some(&second),
            Some(json!({})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        request(
            "POST",
            &format!("/api/rooms/{room_id}/join"),
            Some(&third),
            Some(json!({})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "full");
}

#[tokio::test]
async fn register_rate_limit_is_enforced_per_ip() {
    let app = app();

    for i in 0..10 {
        register(&app, &format!("user{i}@example.com")).await;
    }

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({
                "email": "one-too-many@example.com",
                "displayName": "Tester",
                "password": "s3cret-pass",
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "rate_limited");
    assert!(body["retryAfterSecs"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn activity_and_languages_endpoints() {
    let app = app();
    let token = register(&app, "owner@example.com").await;
    create_room(
        &app,
        &token,
        json!({"name": "Stats room", "language": "rust"}),
    )
    .await;

    let (status, body) = send(
        &app,
        request("GET", "/api/users/activity", Some(&token), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["roomsOwned"], 1);
    assert_eq!(body["data"]["roomsJoined"], 1);

    let (status, body) = send(&app, request("GET", "/api/languages", Some(&token), None)).await;
    assert_eq!(status, StatusCode::OK);
    let languages = body["data"].as_array().unwrap();
    assert_eq!(languages.len(), 8);
    assert!(languages.iter().any(|l| l["tag"] == "java" && l["compiled"] == true));
}

#[tokio::test]
async fn health_endpoints_answer_without_auth() {
    let app = app();

    let (status, body) = send(&app, request("GET", "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&app, request("GET", "/health/ready", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn execute_requires_membership() {
    let app = app();
    let owner = register(&app, "owner@example.com").await;
    let outsider = register(&app, "outsider@example.com").await;

    let (_, body) = create_room(
        &app,
        &owner,
        json!({"name": "Exec room", "language": "python"}),
    )
    .await;
    let room_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/code/execute",
            Some(&outsider),
            Some(json!({"roomId": room_id})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/code/execute",
            Some(&owner),
            Some(json!({"roomId": room_id})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "execute failed: {body}");
    assert!(body["data"]["executionId"].is_string());
}
