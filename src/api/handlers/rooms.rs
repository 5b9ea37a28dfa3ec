//! Room CRUD, join/leave, and per-room history.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{ApiResponse, AuthUser};
use crate::auth::{hash_password, verify_password};
use crate::error::{AppError, AppResult};
use crate::models::{
    ChatMessage, ExecutionLog, MemberRole, Membership, NewRoom, Room, RoomUpdate, Visibility,
};
use crate::ratelimit::Bucket;
use crate::repository::RoomMember;
use crate::sandbox::languages;
use crate::services::AppServices;

const HISTORY_DEFAULT_LIMIT: u32 = 50;
const HISTORY_MAX_LIMIT: u32 = 200;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_visibility")]
    pub visibility: Visibility,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_capacity")]
    pub max_capacity: u32,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_visibility() -> Visibility {
    Visibility::Public
}

fn default_capacity() -> u32 {
    10
}

fn default_language() -> String {
    "javascript".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

impl HistoryQuery {
    fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(HISTORY_DEFAULT_LIMIT)
            .min(HISTORY_MAX_LIMIT)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDetail {
    #[serde(flatten)]
    pub room: Room,
    pub members: Vec<RoomMember>,
}

/// Membership gate shared by the read endpoints.
async fn require_membership(
    services: &AppServices,
    room_id: &str,
    user_id: Uuid,
) -> AppResult<Membership> {
    services
        .repository
        .find_membership(room_id, user_id)
        .await?
        .ok_or_else(|| AppError::Forbidden("not a member of this room".into()))
}

/// `GET /api/rooms`
pub async fn list(
    State(services): State<AppServices>,
    AuthUser(claims): AuthUser,
) -> AppResult<ApiResponse<Vec<Room>>> {
    let rooms = services.repository.list_visible_rooms(claims.sub).await?;
    Ok(ApiResponse::ok(rooms))
}

/// `POST /api/rooms`
pub async fn create(
    State(services): State<AppServices>,
    AuthUser(claims): AuthUser,
    Json(body): Json<CreateRoomRequest>,
) -> AppResult<ApiResponse<Room>> {
    services
        .ratelimiter
        .acquire(Bucket::RoomCreate, &claims.sub.to_string())
        .await?
        .enforce()?;

    if !languages::is_supported(&body.language) {
        return Err(AppError::Validation(format!(
            "unsupported language {}",
            body.language
        )));
    }

    let new_room = NewRoom {
        name: body.name,
        description: body.description,
        visibility: body.visibility,
        password: body.password,
        max_capacity: body.max_capacity,
        language: body.language,
        owner_id: claims.sub,
    };
    new_room.validate()?;

    let password_hash = match &new_room.password {
        Some(password) => Some(hash_password(password)?),
        None => None,
    };

    let room = services.repository.create_room(new_room, password_hash).await?;
    tracing::info!(room_id = %room.id, owner = %claims.sub, "room created");
    Ok(ApiResponse::ok(room))
}

/// `GET /api/rooms/:id`
pub async fn get(
    State(services): State<AppServices>,
    AuthUser(claims): AuthUser,
    Path(room_id): Path<String>,
) -> AppResult<ApiResponse<RoomDetail>> {
    let room = services
        .repository
        .find_room(&room_id)
        .await?
        .ok_or(AppError::NotFound("room"))?;

    if room.visibility == Visibility::Private {
        require_membership(&services, &room_id, claims.sub).await?;
    }

    let members = services.repository.list_members(&room_id).await?;
    Ok(ApiResponse::ok(RoomDetail { room, members }))
}

/// `PUT /api/rooms/:id` (owner or admin)
pub async fn update(
    State(services): State<AppServices>,
    AuthUser(claims): AuthUser,
    Path(room_id): Path<String>,
    Json(body): Json<RoomUpdate>,
) -> AppResult<ApiResponse<Room>> {
    let membership = require_membership(&services, &room_id, claims.sub).await?;
    if !membership.role.can_manage() {
        return Err(AppError::Forbidden(
            "only the owner or an admin may update the room".into(),
        ));
    }

    body.validate()?;
    let room = services.repository.update_room(&room_id, body).await?;
    Ok(ApiResponse::ok(room))
}

/// `DELETE /api/rooms/:id` (owner only)
pub async fn delete(
    State(services): State<AppServices>,
    AuthUser(claims): AuthUser,
    Path(room_id): Path<String>,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let membership = require_membership(&services, &room_id, claims.sub).await?;
    if membership.role != MemberRole::Owner {
        return Err(AppError::Forbidden("only the owner may delete the room".into()));
    }

    // Evict any connected sockets before the row disappears.
    services.hub.close_room(&room_id).await;
    services.repository.delete_room(&room_id).await?;

    tracing::info!(room_id, "room deleted");
    Ok(ApiResponse::ok(serde_json::json!({ "deleted": true })))
}

/// `POST /api/rooms/:id/join`
pub async fn join(
    State(services): State<AppServices>,
    AuthUser(claims): AuthUser,
    Path(room_id): Path<String>,
    Json(body): Json<JoinRequest>,
) -> AppResult<ApiResponse<Membership>> {
    let room = services
        .repository
        .find_room(&room_id)
        .await?
        .ok_or(AppError::NotFound("room"))?;

    let already_member = services
        .repository
        .find_membership(&room_id, claims.sub)
        .await?
        .is_some();

    if room.visibility == Visibility::Private && !already_member {
        let verifier = room
            .password_hash
            .as_deref()
            .ok_or_else(|| AppError::internal("private room without verifier"))?;
        let presented = body.password.ok_or(AppError::BadPassword)?;
        if !verify_password(&presented, verifier) {
            return Err(AppError::BadPassword);
        }
    }

    if !already_member {
        let members = services.repository.count_members(&room_id).await?;
        if members >= room.max_capacity {
            return Err(AppError::Full);
        }
    }

    let membership = services
        .repository
        .upsert_membership(&room_id, claims.sub, MemberRole::Member)
        .await?;
    Ok(ApiResponse::ok(membership))
}

/// `POST /api/rooms/:id/leave`
pub async fn leave(
    State(services): State<AppServices>,
    AuthUser(claims): AuthUser,
    Path(room_id): Path<String>,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let membership = require_membership(&services, &room_id, claims.sub).await?;
    if membership.role == MemberRole::Owner {
        return Err(AppError::Conflict(
            "the owner cannot leave; delete the room instead".into(),
        ));
    }

    services
        .repository
        .remove_membership(&room_id, claims.sub)
        .await?;
    Ok(ApiResponse::ok(serde_json::json!({ "left": true })))
}

/// `GET /api/rooms/:id/messages`
pub async fn messages(
    State(services): State<AppServices>,
    AuthUser(claims): AuthUser,
    Path(room_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<ApiResponse<Vec<ChatMessage>>> {
    require_membership(&services, &room_id, claims.sub).await?;
    let messages = services
        .repository
        .list_messages(&room_id, query.limit())
        .await?;
    Ok(ApiResponse::ok(messages))
}

/// `GET /api/rooms/:id/executions`
pub async fn executions(
    State(services): State<AppServices>,
    AuthUser(claims): AuthUser,
    Path(room_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<ApiResponse<Vec<ExecutionLog>>> {
    require_membership(&services, &room_id, claims.sub).await?;
    let executions = services
        .repository
        .list_executions(&room_id, query.limit())
        .await?;
    Ok(ApiResponse::ok(executions))
}
