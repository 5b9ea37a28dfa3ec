//! Postgres-backed repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use uuid::Uuid;

use super::{ActivityStats, Repository, RoomMember};
use crate::error::{AppError, AppResult};
use crate::models::{
    ChatMessage, ExecutionLog, ExecutionResult, ExecutionStatus, MemberRole, Membership,
    MessageKind, NewChatMessage, NewExecution, NewRoom, NewUser, Room, RoomUpdate, User,
    Visibility,
};

/// Schema applied at startup. Idempotent.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id UUID PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    password_hash TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS rooms (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    visibility TEXT NOT NULL,
    password_hash TEXT,
    max_capacity INT NOT NULL,
    language TEXT NOT NULL,
    code TEXT NOT NULL DEFAULT '',
    input TEXT NOT NULL DEFAULT '',
    output TEXT NOT NULL DEFAULT '',
    owner_id UUID NOT NULL REFERENCES users(id),
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS memberships (
    user_id UUID NOT NULL REFERENCES users(id),
    room_id TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
    role TEXT NOT NULL,
    joined_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (user_id, room_id)
);

CREATE TABLE IF NOT EXISTS chat_messages (
    id UUID PRIMARY KEY,
    room_id TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
    author_id UUID REFERENCES users(id),
    content TEXT NOT NULL,
    kind TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS chat_messages_room_idx
    ON chat_messages (room_id, created_at);

CREATE TABLE IF NOT EXISTS execution_logs (
    id UUID PRIMARY KEY,
    room_id TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
    user_id UUID REFERENCES users(id),
    language TEXT NOT NULL,
    code TEXT NOT NULL,
    stdin TEXT NOT NULL DEFAULT '',
    stdout TEXT NOT NULL DEFAULT '',
    stderr TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL,
    exit_code INT,
    execution_time_ms BIGINT,
    memory_bytes BIGINT,
    compilation_time_ms BIGINT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS execution_logs_room_idx
    ON execution_logs (room_id, created_at);
"#;

/// Repository backed by a Postgres pool.
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    /// Connect and apply the schema.
    pub async fn connect(database_url: &str) -> AppResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await?;

        let repo = Self { pool };
        repo.ensure_schema().await?;
        Ok(repo)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn ensure_schema(&self) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

// ============================================================================
// Row Types
// ============================================================================

#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    display_name: String,
    password_hash: String,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            email: row.email,
            display_name: row.display_name,
            password_hash: row.password_hash,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct RoomRow {
    id: String,
    name: String,
    description: Option<String>,
    visibility: String,
    password_hash: Option<String>,
    max_capacity: i32,
    language: String,
    code: String,
    input: String,
    output: String,
    owner_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RoomRow> for Room {
    type Error = AppError;

    fn try_from(row: RoomRow) -> Result<Self, Self::Error> {
        Ok(Room {
            id: row.id,
            name: row.name,
            description: row.description,
            visibility: row.visibility.parse::<Visibility>()?,
            password_hash: row.password_hash,
            max_capacity: row.max_capacity as u32,
            language: row.language,
            code: row.code,
            input: row.input,
            output: row.output,
            owner_id: row.owner_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct MembershipRow {
    user_id: Uuid,
    room_id: String,
    role: String,
    joined_at: DateTime<Utc>,
}

impl TryFrom<MembershipRow> for Membership {
    type Error = AppError;

    fn try_from(row: MembershipRow) -> Result<Self, Self::Error> {
        Ok(Membership {
            user_id: row.user_id,
            room_id: row.room_id,
            role: row.role.parse::<MemberRole>()?,
            joined_at: row.joined_at,
        })
    }
}

#[derive(FromRow)]
struct MemberRow {
    user_id: Uuid,
    display_name: String,
    role: String,
    joined_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct MessageRow {
    id: Uuid,
    room_id: String,
    author_id: Option<Uuid>,
    author_name: Option<String>,
    content: String,
    kind: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<MessageRow> for ChatMessage {
    type Error = AppError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(ChatMessage {
            id: row.id,
            room_id: row.room_id,
            author_id: row.author_id,
            author_name: row.author_name,
            content: row.content,
            kind: row.kind.parse::<MessageKind>()?,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct ExecutionRow {
    id: Uuid,
    room_id: String,
    user_id: Option<Uuid>,
    language: String,
    code: String,
    stdin: String,
    stdout: String,
    stderr: String,
    status: String,
    exit_code: Option<i32>,
    execution_time_ms: Option<i64>,
    memory_bytes: Option<i64>,
    compilation_time_ms: Option<i64>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ExecutionRow> for ExecutionLog {
    type Error = AppError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        Ok(ExecutionLog {
            id: row.id,
            room_id: row.room_id,
            user_id: row.user_id,
            language: row.language,
            code: row.code,
            stdin: row.stdin,
            stdout: row.stdout,
            stderr: row.stderr,
            status: row.status.parse::<ExecutionStatus>()?,
            exit_code: row.exit_code,
            execution_time_ms: row.execution_time_ms.map(|v| v as u64),
            memory_bytes: row.memory_bytes.map(|v| v as u64),
            compilation_time_ms: row.compilation_time_ms.map(|v| v as u64),
            created_at: row.created_at,
        })
    }
}

// ============================================================================
// Repository Implementation
// ============================================================================

#[async_trait]
impl Repository for PgRepository {
    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        let existing: Option<UserRow> =
            sqlx::query_as("SELECT * FROM users WHERE email = $1")
                .bind(&user.email)
                .fetch_optional(&self.pool)
                .await?;
        if existing.is_some() {
            return Err(AppError::Conflict("email already registered".into()));
        }

        let row: UserRow = sqlx::query_as(
            "INSERT INTO users (id, email, display_name, password_hash)
             VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(&user.password_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn find_user(&self, id: Uuid) -> AppResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE email = $1")
            .bind(email.to_lowercase())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    async fn create_room(&self, room: NewRoom, password_hash: Option<String>) -> AppResult<Room> {
        let id = crate::models::room::generate_room_code();
        let mut tx = self.pool.begin().await?;

        let row: RoomRow = sqlx::query_as(
            "INSERT INTO rooms
                (id, name, description, visibility, password_hash, max_capacity,
                 language, owner_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
        )
        .bind(&id)
        .bind(room.name.trim())
        .bind(&room.description)
        .bind(room.visibility.as_str())
        .bind(&password_hash)
        .bind(room.max_capacity as i32)
        .bind(&room.language)
        .bind(room.owner_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO memberships (user_id, room_id, role) VALUES ($1, $2, $3)",
        )
        .bind(room.owner_id)
        .bind(&id)
        .bind(MemberRole::Owner.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    async fn find_room(&self, id: &str) -> AppResult<Option<Room>> {
        let row: Option<RoomRow> = sqlx::query_as("SELECT * FROM rooms WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Room::try_from).transpose()
    }

    async fn list_visible_rooms(&self, user_id: Uuid) -> AppResult<Vec<Room>> {
        let rows: Vec<RoomRow> = sqlx::query_as(
            "SELECT DISTINCT r.* FROM rooms r
             LEFT JOIN memberships m ON m.room_id = r.id AND m.user_id = $1
             WHERE r.visibility = 'public' OR m.user_id IS NOT NULL
             ORDER BY r.updated_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Room::try_from).collect()
    }

    async fn update_room(&self, id: &str, update: RoomUpdate) -> AppResult<Room> {
        let row: Option<RoomRow> = sqlx::query_as(
            "UPDATE rooms SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                max_capacity = COALESCE($4, max_capacity),
                updated_at = now()
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(update.name.as_deref().map(str::trim))
        .bind(&update.description)
        .bind(update.max_capacity.map(|c| c as i32))
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(AppError::NotFound("room"))?.try_into()
    }

    async fn delete_room(&self, id: &str) -> AppResult<()> {
        let result = sqlx::query("DELETE FROM rooms WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("room"));
        }
        Ok(())
    }

    async fn flush_room_state(
        &self,
        id: &str,
        code: &str,
        language: &str,
        input: &str,
        output: &str,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE rooms SET code = $2, language = $3, input = $4, output = $5,
             updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(code)
        .bind(language)
        .bind(input)
        .bind(output)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_membership(
        &self,
        room_id: &str,
        user_id: Uuid,
        role: MemberRole,
    ) -> AppResult<Membership> {
        // Re-joining keeps the original role; owners in particular must
        // never be demoted by a repeat join.
        let row: MembershipRow = sqlx::query_as(
            "INSERT INTO memberships (user_id, room_id, role)
             VALUES ($1, $2, $3)
             ON CONFLICT (user_id, room_id) DO UPDATE SET role = memberships.role
             RETURNING *",
        )
        .bind(user_id)
        .bind(room_id)
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn remove_membership(&self, room_id: &str, user_id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM memberships WHERE room_id = $1 AND user_id = $2")
            .bind(room_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_membership(
        &self,
        room_id: &str,
        user_id: Uuid,
    ) -> AppResult<Option<Membership>> {
        let row: Option<MembershipRow> = sqlx::query_as(
            "SELECT * FROM memberships WHERE room_id = $1 AND user_id = $2",
        )
        .bind(room_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Membership::try_from).transpose()
    }

    async fn list_members(&self, room_id: &str) -> AppResult<Vec<RoomMember>> {
        let rows: Vec<MemberRow> = sqlx::query_as(
            "SELECT m.user_id, u.display_name, m.role, m.joined_at
             FROM memberships m JOIN users u ON u.id = m.user_id
             WHERE m.room_id = $1 ORDER BY m.joined_at",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(RoomMember {
                    user_id: row.user_id,
                    display_name: row.display_name,
                    role: row.role.parse::<MemberRole>()?,
                    joined_at: row.joined_at,
                })
            })
            .collect()
    }

    async fn count_members(&self, room_id: &str) -> AppResult<u32> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM memberships WHERE room_id = $1")
                .bind(room_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u32)
    }

    async fn append_message(&self, message: NewChatMessage) -> AppResult<ChatMessage> {
        let row: MessageRow = sqlx::query_as(
            "WITH inserted AS (
                INSERT INTO chat_messages (id, room_id, author_id, content, kind)
                VALUES ($1, $2, $3, $4, $5) RETURNING *
             )
             SELECT i.*, u.display_name AS author_name
             FROM inserted i LEFT JOIN users u ON u.id = i.author_id",
        )
        .bind(Uuid::new_v4())
        .bind(&message.room_id)
        .bind(message.author_id)
        .bind(&message.content)
        .bind(message.kind.as_str())
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn list_messages(&self, room_id: &str, limit: u32) -> AppResult<Vec<ChatMessage>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT * FROM (
                SELECT c.*, u.display_name AS author_name
                FROM chat_messages c LEFT JOIN users u ON u.id = c.author_id
                WHERE c.room_id = $1
                ORDER BY c.created_at DESC LIMIT $2
             ) tail ORDER BY created_at ASC",
        )
        .bind(room_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ChatMessage::try_from).collect()
    }

    async fn create_execution(&self, execution: NewExecution) -> AppResult<ExecutionLog> {
        let row: ExecutionRow = sqlx::query_as(
            "INSERT INTO execution_logs
                (id, room_id, user_id, language, code, stdin, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
        )
        .bind(execution.id)
        .bind(&execution.room_id)
        .bind(execution.user_id)
        .bind(&execution.language)
        .bind(&execution.code)
        .bind(&execution.stdin)
        .bind(ExecutionStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn mark_execution_running(&self, id: Uuid) -> AppResult<()> {
        sqlx::query("UPDATE execution_logs SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(ExecutionStatus::Running.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn finish_execution(&self, id: Uuid, result: &ExecutionResult) -> AppResult<()> {
        sqlx::query(
            "UPDATE execution_logs SET
                status = $2, stdout = $3, stderr = $4, exit_code = $5,
                execution_time_ms = $6, memory_bytes = $7, compilation_time_ms = $8
             WHERE id = $1",
        )
        .bind(id)
        .bind(result.status.as_str())
        .bind(&result.stdout)
        .bind(&result.stderr)
        .bind(result.exit_code)
        .bind(result.execution_time_ms as i64)
        .bind(result.memory_bytes as i64)
        .bind(result.compilation_time_ms.map(|v| v as i64))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_executions(&self, room_id: &str, limit: u32) -> AppResult<Vec<ExecutionLog>> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(
            "SELECT * FROM execution_logs WHERE room_id = $1
             ORDER BY created_at DESC LIMIT $2",
        )
        .bind(room_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ExecutionLog::try_from).collect()
    }

    async fn user_activity(&self, user_id: Uuid) -> AppResult<ActivityStats> {
        let rooms_joined: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM memberships WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        let rooms_owned: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM rooms WHERE owner_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        let messages_sent: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages WHERE author_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        let executions_requested: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM execution_logs WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(ActivityStats {
            rooms_joined: rooms_joined as u64,
            rooms_owned: rooms_owned as u64,
            messages_sent: messages_sent as u64,
            executions_requested: executions_requested as u64,
        })
    }

    async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
