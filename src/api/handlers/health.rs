//! Liveness and readiness probes.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::services::AppServices;

/// `GET /health` — process is up.
pub async fn live() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /health/ready` — dependencies answer.
pub async fn ready(State(services): State<AppServices>) -> impl IntoResponse {
    let repository = services.repository.ping().await.is_ok();
    let sandbox = services.sandbox.preflight().await.is_ok();

    let status = if repository && sandbox {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if status == StatusCode::OK { "ready" } else { "degraded" },
            "repository": repository,
            "sandbox": sandbox,
            "activeRooms": services.hub.active_rooms(),
        })),
    )
}
