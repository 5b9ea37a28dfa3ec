//! In-memory repository used by tests and single-process development runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{ActivityStats, Repository, RoomMember};
use crate::error::{AppError, AppResult};
use crate::models::{
    ChatMessage, ExecutionLog, ExecutionResult, ExecutionStatus, MemberRole, Membership,
    NewChatMessage, NewExecution, NewRoom, NewUser, Room, RoomUpdate, User,
};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    rooms: HashMap<String, Room>,
    memberships: Vec<Membership>,
    messages: Vec<ChatMessage>,
    executions: Vec<ExecutionLog>,
}

/// Hash-map backed repository with the same semantics as the Postgres
/// implementation.
#[derive(Default)]
pub struct MemoryRepository {
    inner: RwLock<Inner>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        let mut inner = self.inner.write();
        if inner.users.values().any(|u| u.email == user.email) {
            return Err(AppError::Conflict("email already registered".into()));
        }

        let created = User {
            id: Uuid::new_v4(),
            email: user.email,
            display_name: user.display_name,
            password_hash: user.password_hash,
            created_at: Utc::now(),
        };
        inner.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_user(&self, id: Uuid) -> AppResult<Option<User>> {
        Ok(self.inner.read().users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let email = email.to_lowercase();
        Ok(self
            .inner
            .read()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn create_room(&self, room: NewRoom, password_hash: Option<String>) -> AppResult<Room> {
        let mut inner = self.inner.write();
        let now = Utc::now();
        let created = Room {
            id: crate::models::room::generate_room_code(),
            name: room.name.trim().to_string(),
            description: room.description,
            visibility: room.visibility,
            password_hash,
            max_capacity: room.max_capacity,
            language: room.language,
            code: String::new(),
            input: String::new(),
            output: String::new(),
            owner_id: room.owner_id,
            created_at: now,
            updated_at: now,
        };

        inner.rooms.insert(created.id.clone(), created.clone());
        inner.memberships.push(Membership {
            user_id: room.owner_id,
            room_id: created.id.clone(),
            role: MemberRole::Owner,
            joined_at: now,
        });
        Ok(created)
    }

    async fn find_room(&self, id: &str) -> AppResult<Option<Room>> {
        Ok(self.inner.read().rooms.get(id).cloned())
    }

    async fn list_visible_rooms(&self, user_id: Uuid) -> AppResult<Vec<Room>> {
        let inner = self.inner.read();
        let mut rooms: Vec<Room> = inner
            .rooms
            .values()
            .filter(|room| {
                room.visibility == crate::models::Visibility::Public
                    || inner
                        .memberships
                        .iter()
                        .any(|m| m.room_id == room.id && m.user_id == user_id)
            })
            .cloned()
            .collect();
        rooms.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(rooms)
    }

    async fn update_room(&self, id: &str, update: RoomUpdate) -> AppResult<Room> {
        let mut inner = self.inner.write();
        let room = inner
            .rooms
            .get_mut(id)
            .ok_or(AppError::NotFound("room"))?;

        if let Some(name) = update.name {
            room.name = name.trim().to_string();
        }
        if let Some(description) = update.description {
            room.description = Some(description);
        }
        if let Some(capacity) = update.max_capacity {
            room.max_capacity = capacity;
        }
        room.updated_at = Utc::now();
        Ok(room.clone())
    }

    async fn delete_room(&self, id: &str) -> AppResult<()> {
        let mut inner = self.inner.write();
        if inner.rooms.remove(id).is_none() {
            return Err(AppError::NotFound("room"));
        }
        inner.memberships.retain(|m| m.room_id != id);
        inner.messages.retain(|m| m.room_id != id);
        inner.executions.retain(|e| e.room_id != id);
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
        let mut inner = self.inner.write();
        if let Some(room) = inner.rooms.get_mut(id) {
            room.code = code.to_string();
            room.language = language.to_string();
            room.input = input.to_string();
            room.output = output.to_string();
            room.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn upsert_membership(
        &self,
        room_id: &str,
        user_id: Uuid,
        role: MemberRole,
    ) -> AppResult<Membership> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner
            .memberships
            .iter()
            .find(|m| m.room_id == room_id && m.user_id == user_id)
        {
            return Ok(existing.clone());
        }

        let membership = Membership {
            user_id,
            room_id: room_id.to_string(),
            role,
            joined_at: Utc::now(),
        };
        inner.memberships.push(membership.clone());
        Ok(membership)
    }

    async fn remove_membership(&self, room_id: &str, user_id: Uuid) -> AppResult<()> {
        self.inner
            .write()
            .memberships
            .retain(|m| !(m.room_id == room_id && m.user_id == user_id));
        Ok(())
    }

    async fn find_membership(
        &self,
        room_id: &str,
        user_id: Uuid,
    ) -> AppResult<Option<Membership>> {
        Ok(self
            .inner
            .read()
            .memberships
            .iter()
            .find(|m| m.room_id == room_id && m.user_id == user_id)
            .cloned())
    }

    async fn list_members(&self, room_id: &str) -> AppResult<Vec<RoomMember>> {
        let inner = self.inner.read();
        Ok(inner
            .memberships
            .iter()
            .filter(|m| m.room_id == room_id)
            .map(|m| RoomMember {
                user_id: m.user_id,
                display_name: inner
                    .users
                    .get(&m.user_id)
                    .map(|u| u.display_name.clone())
                    .unwrap_or_default(),
                role: m.role,
                joined_at: m.joined_at,
            })
            .collect())
    }

    async fn count_members(&self, room_id: &str) -> AppResult<u32> {
        Ok(self
            .inner
            .read()
            .memberships
            .iter()
            .filter(|m| m.room_id == room_id)
            .count() as u32)
    }

    async fn append_message(&self, message: NewChatMessage) -> AppResult<ChatMessage> {
        let mut inner = self.inner.write();
        let author_name = message
            .author_id
            .and_then(|id| inner.users.get(&id))
            .map(|u| u.display_name.clone());
        let created = ChatMessage {
            id: Uuid::new_v4(),
            room_id: message.room_id,
            author_id: message.author_id,
            author_name,
            content: message.content,
            kind: message.kind,
            created_at: Utc::now(),
        };
        inner.messages.push(created.clone());
        Ok(created)
    }

    async fn list_messages(&self, room_id: &str, limit: u32) -> AppResult<Vec<ChatMessage>> {
        let inner = self.inner.read();
        let mut messages: Vec<ChatMessage> = inner
            .messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect();
        let skip = messages.len().saturating_sub(limit as usize);
        Ok(messages.split_off(skip))
    }

    async fn create_execution(&self, execution: NewExecution) -> AppResult<ExecutionLog> {
        let log = ExecutionLog {
            id: execution.id,
            room_id: execution.room_id,
            user_id: execution.user_id,
            language: execution.language,
            code: execution.code,
            stdin: execution.stdin,
            stdout: String::new(),
            stderr: String::new(),
            status: ExecutionStatus::Pending,
            exit_code: None,
            execution_time_ms: None,
            memory_bytes: None,
            compilation_time_ms: None,
            created_at: Utc::now(),
        };
        self.inner.write().executions.push(log.clone());
        Ok(log)
    }

    async fn mark_execution_running(&self, id: Uuid) -> AppResult<()> {
        let mut inner = self.inner.write();
        if let Some(log) = inner.executions.iter_mut().find(|e| e.id == id) {
            log.status = ExecutionStatus::Running;
        }
        Ok(())
    }

    async fn finish_execution(&self, id: Uuid, result: &ExecutionResult) -> AppResult<()> {
        let mut inner = self.inner.write();
        if let Some(log) = inner.executions.iter_mut().find(|e| e.id == id) {
            log.status = result.status;
            log.stdout = result.stdout.clone();
            log.stderr = result.stderr.clone();
            log.exit_code = Some(result.exit_code);
            log.execution_time_ms = Some(result.execution_time_ms);
            log.memory_bytes = Some(result.memory_bytes);
            log.compilation_time_ms = result.compilation_time_ms;
        }
        Ok(())
    }

    async fn list_executions(&self, room_id: &str, limit: u32) -> AppResult<Vec<ExecutionLog>> {
        let inner = self.inner.read();
        let mut logs: Vec<ExecutionLog> = inner
            .executions
            .iter()
            .filter(|e| e.room_id == room_id)
            .cloned()
            .collect();
        logs.reverse();
        logs.truncate(limit as usize);
        Ok(logs)
    }

    async fn user_activity(&self, user_id: Uuid) -> AppResult<ActivityStats> {
        let inner = self.inner.read();
        Ok(ActivityStats {
            rooms_joined: inner
                .memberships
                .iter()
                .filter(|m| m.user_id == user_id)
                .count() as u64,
            rooms_owned: inner
                .rooms
                .values()
                .filter(|r| r.owner_id == user_id)
                .count() as u64,
            messages_sent: inner
                .messages
                .iter()
                .filter(|m| m.author_id == Some(user_id))
                .count() as u64,
            executions_requested: inner
                .executions
                .iter()
                .filter(|e| e.user_id == Some(user_id))
                .count() as u64,
        })
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageKind, Visibility};

    fn new_user(email: &str) -> NewUser {
        NewUser::new(email, "Tester", "hash".into()).unwrap()
    }

    fn new_room(owner: Uuid) -> NewRoom {
        NewRoom {
            name: "Test room".into(),
            description: None,
            visibility: Visibility::Public,
            password: None,
            max_capacity: 4,
            language: "python".into(),
            owner_id: owner,
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let repo = MemoryRepository::new();
        repo.create_user(new_user("a@example.com")).await.unwrap();
        let err = repo.create_user(new_user("a@example.com")).await;
        assert!(matches!(err, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_room_creation_installs_owner_membership() {
        let repo = MemoryRepository::new();
        let owner = repo.create_user(new_user("o@example.com")).await.unwrap();
        let room = repo.create_room(new_room(owner.id), None).await.unwrap();

        let membership = repo
            .find_membership(&room.id, owner.id)
            .await
            .unwrap()
            .expect("owner membership");
        assert_eq!(membership.role, MemberRole::Owner);
        assert_eq!(repo.count_members(&room.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_membership_is_idempotent_and_keeps_role() {
        let repo = MemoryRepository::new();
        let owner = repo.create_user(new_user("o@example.com")).await.unwrap();
        let room = repo.create_room(new_room(owner.id), None).await.unwrap();

        // A repeat join must not demote the owner.
        let membership = repo
            .upsert_membership(&room.id, owner.id, MemberRole::Member)
            .await
            .unwrap();
        assert_eq!(membership.role, MemberRole::Owner);
        assert_eq!(repo.count_members(&room.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_owner_uniqueness_across_members() {
        let repo = MemoryRepository::new();
        let owner = repo.create_user(new_user("o@example.com")).await.unwrap();
        let peer = repo.create_user(new_user("p@example.com")).await.unwrap();
        let room = repo.create_room(new_room(owner.id), None).await.unwrap();

        repo.upsert_membership(&room.id, peer.id, MemberRole::Member)
            .await
            .unwrap();

        let members = repo.list_members(&room.id).await.unwrap();
        let owners = members
            .iter()
            .filter(|m| m.role == MemberRole::Owner)
            .count();
        assert_eq!(owners, 1);
    }

    #[tokio::test]
    async fn test_messages_keep_insertion_order() {
        let repo = MemoryRepository::new();
        let owner = repo.create_user(new_user("o@example.com")).await.unwrap();
        let room = repo.create_room(new_room(owner.id), None).await.unwrap();

        for i in 0..5 {
            repo.append_message(NewChatMessage {
                room_id: room.id.clone(),
                author_id: Some(owner.id),
                content: format!("msg {i}"),
                kind: MessageKind::Text,
            })
            .await
            .unwrap();
        }

        let messages = repo.list_messages(&room.id, 3).await.unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["msg 2", "msg 3", "msg 4"]);
    }

    #[tokio::test]
    async fn test_execution_lifecycle() {
        let repo = MemoryRepository::new();
        let owner = repo.create_user(new_user("o@example.com")).await.unwrap();
        let room = repo.create_room(new_room(owner.id), None).await.unwrap();

        let id = Uuid::new_v4();
        repo.create_execution(NewExecution {
            id,
            room_id: room.id.clone(),
            user_id: Some(owner.id),
            language: "python".into(),
            code: "print(1)".into(),
            stdin: String::new(),
        })
        .await
        .unwrap();

        repo.mark_execution_running(id).await.unwrap();
        repo.finish_execution(
            id,
            &ExecutionResult {
                status: ExecutionStatus::Completed,
                stdout: "1\n".into(),
                stderr: String::new(),
                exit_code: 0,
                execution_time_ms: 12,
                memory_bytes: 1024,
                compilation_time_ms: None,
                compilation_output: None,
            },
        )
        .await
        .unwrap();

        let logs = repo.list_executions(&room.id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, ExecutionStatus::Completed);
        assert_eq!(logs[0].stdout, "1\n");
        assert_eq!(logs[0].exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_activity_counts() {
        let repo = MemoryRepository::new();
        let owner = repo.create_user(new_user("o@example.com")).await.unwrap();
        let room = repo.create_room(new_room(owner.id), None).await.unwrap();
        repo.append_message(NewChatMessage {
            room_id: room.id.clone(),
            author_id: Some(owner.id),
            content: "hi".into(),
            kind: MessageKind::Text,
        })
        .await
        .unwrap();

        let stats = repo.user_activity(owner.id).await.unwrap();
        assert_eq!(stats.rooms_owned, 1);
        assert_eq!(stats.rooms_joined, 1);
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.executions_requested, 0);
    }

    #[tokio::test]
    async fn test_visibility_filtering() {
        let repo = MemoryRepository::new();
        let owner = repo.create_user(new_user("o@example.com")).await.unwrap();
        let outsider = repo.create_user(new_user("x@example.com")).await.unwrap();

        let mut private = new_room(owner.id);
        private.visibility = Visibility::Private;
        private.password = Some("hunter2".into());
        repo.create_room(private, Some("hash".into())).await.unwrap();
        repo.create_room(new_room(owner.id), None).await.unwrap();

        let visible = repo.list_visible_rooms(outsider.id).await.unwrap();
        assert_eq!(visible.len(), 1);
        let visible = repo.list_visible_rooms(owner.id).await.unwrap();
        assert_eq!(visible.len(), 2);
    }
}
