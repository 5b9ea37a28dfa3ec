//! # Repository
//!
//! Narrow persistence interface for users, rooms, memberships, chat
//! messages, and execution logs. The hub and the API layer depend only on
//! the [`Repository`] capability; concrete backends are the Postgres
//! implementation used in production and an in-memory implementation
//! backing the test suite.

mod memory;
mod postgres;

pub use memory::MemoryRepository;
pub use postgres::PgRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{
    ChatMessage, ExecutionLog, ExecutionResult, MemberRole, Membership, NewChatMessage,
    NewExecution, NewRoom, NewUser, Room, RoomUpdate, User,
};

/// A room member joined with the user's public fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMember {
    pub user_id: Uuid,
    pub display_name: String,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

/// Aggregate activity counters for one user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStats {
    pub rooms_joined: u64,
    pub rooms_owned: u64,
    pub messages_sent: u64,
    pub executions_requested: u64,
}

/// Persistence capability. Single-row reads and writes are
/// non-transactional; room creation runs in a transaction so the room and
/// its owner membership appear together.
#[async_trait]
pub trait Repository: Send + Sync {
    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------
    async fn create_user(&self, user: NewUser) -> AppResult<User>;
    async fn find_user(&self, id: Uuid) -> AppResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>>;

    // ------------------------------------------------------------------
    // Rooms
    // ------------------------------------------------------------------

    /// Create the room row and its owner membership atomically.
    async fn create_room(&self, room: NewRoom, password_hash: Option<String>) -> AppResult<Room>;
    async fn find_room(&self, id: &str) -> AppResult<Option<Room>>;
    /// Public rooms plus private rooms the user belongs to.
    async fn list_visible_rooms(&self, user_id: Uuid) -> AppResult<Vec<Room>>;
    async fn update_room(&self, id: &str, update: RoomUpdate) -> AppResult<Room>;
    /// Delete the room and everything hanging off it.
    async fn delete_room(&self, id: &str) -> AppResult<()>;
    /// Flush the hub's runtime buffers when a room goes idle.
    async fn flush_room_state(
        &self,
        id: &str,
        code: &str,
        language: &str,
        input: &str,
        output: &str,
    ) -> AppResult<()>;

    // ------------------------------------------------------------------
    // Memberships
    // ------------------------------------------------------------------
    async fn upsert_membership(
        &self,
        room_id: &str,
        user_id: Uuid,
        role: MemberRole,
    ) -> AppResult<Membership>;
    async fn remove_membership(&self, room_id: &str, user_id: Uuid) -> AppResult<()>;
    async fn find_membership(&self, room_id: &str, user_id: Uuid)
        -> AppResult<Option<Membership>>;
    async fn list_members(&self, room_id: &str) -> AppResult<Vec<RoomMember>>;
    async fn count_members(&self, room_id: &str) -> AppResult<u32>;

    // ------------------------------------------------------------------
    // Chat
    // ------------------------------------------------------------------
    async fn append_message(&self, message: NewChatMessage) -> AppResult<ChatMessage>;
    /// Most recent messages, oldest first.
    async fn list_messages(&self, room_id: &str, limit: u32) -> AppResult<Vec<ChatMessage>>;

    // ------------------------------------------------------------------
    // Execution logs
    // ------------------------------------------------------------------
    async fn create_execution(&self, execution: NewExecution) -> AppResult<ExecutionLog>;
    async fn mark_execution_running(&self, id: Uuid) -> AppResult<()>;
    async fn finish_execution(&self, id: Uuid, result: &ExecutionResult) -> AppResult<()>;
    async fn list_executions(&self, room_id: &str, limit: u32) -> AppResult<Vec<ExecutionLog>>;

    // ------------------------------------------------------------------
    // Activity
    // ------------------------------------------------------------------
    async fn user_activity(&self, user_id: Uuid) -> AppResult<ActivityStats>;

    /// Backend liveness, used by the readiness probe.
    async fn ping(&self) -> AppResult<()>;
}
