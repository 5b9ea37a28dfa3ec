//! Aggregate activity counters.

use axum::extract::State;

use crate::api::{ApiResponse, AuthUser};
use crate::error::AppResult;
use crate::repository::ActivityStats;
use crate::services::AppServices;

/// `GET /api/users/activity`
pub async fn activity(
    State(services): State<AppServices>,
    AuthUser(claims): AuthUser,
) -> AppResult<ApiResponse<ActivityStats>> {
    let stats = services.repository.user_activity(claims.sub).await?;
    Ok(ApiResponse::ok(stats))
}
