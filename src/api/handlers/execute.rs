//! Execution submission and the language catalog.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{ApiResponse, AuthUser};
use crate::error::AppResult;
use crate::ratelimit::Bucket;
use crate::sandbox::languages;
use crate::services::AppServices;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub room_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub execution_id: Uuid,
}

/// `POST /api/code/execute`
///
/// Submits the room's current buffer. The result arrives asynchronously on
/// the room's `code:execution-result` event and in the execution history.
pub async fn execute(
    State(services): State<AppServices>,
    AuthUser(claims): AuthUser,
    Json(body): Json<ExecuteRequest>,
) -> AppResult<ApiResponse<ExecuteResponse>> {
    services
        .ratelimiter
        .acquire(Bucket::Exec, &claims.sub.to_string())
        .await?
        .enforce()?;

    let execution_id = services.hub.request_exec(&body.room_id, claims.sub).await?;
    Ok(ApiResponse::ok(ExecuteResponse { execution_id }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageInfo {
    pub tag: &'static str,
    pub compiled: bool,
    pub default_timeout_ms: u64,
    pub default_memory_bytes: u64,
}

/// `GET /api/languages`
pub async fn list_languages(
    AuthUser(_claims): AuthUser,
) -> AppResult<ApiResponse<Vec<LanguageInfo>>> {
    let catalog = languages::supported_languages()
        .iter()
        .map(|l| LanguageInfo {
            tag: l.tag,
            compiled: l.compile_command.is_some(),
            default_timeout_ms: l.default_timeout.as_millis() as u64,
            default_memory_bytes: l.default_memory_bytes,
        })
        .collect();
    Ok(ApiResponse::ok(catalog))
}
