//! Per-room serializer task.
//!
//! One task owns each active room's runtime state. Commands arrive on an
//! mpsc channel and are processed strictly in order, which makes the task
//! the linearization point for everything that happens in the room.
//!
//! Lifecycle: spawned on first join (or an execution request against an
//! idle room), exits once no sockets remain and no execution is in flight,
//! flushing the buffers back to the repository on the way out.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::auth::verify_password;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::{
    ChatMessage, ExecutionResult, ExecutionStatus, MemberRole, MessageKind, NewChatMessage,
    NewExecution, PublicUser, Room, Visibility,
};
use crate::ot::{self, EditOp, Operation};
use crate::queue::{ExecutionJob, JobQueue};
use crate::repository::Repository;
use crate::sandbox::languages;
use crate::ws::protocol::{RoomSnapshot, ServerEvent};

use super::{RoomHandle, SocketHandle, SocketId};

/// Operations retained for transforming late batches. A batch based below
/// the retained window forces a resync instead.
pub const HISTORY_CAP: usize = 512;

/// Command-channel depth per room.
const COMMAND_QUEUE_DEPTH: usize = 128;

/// Commands accepted by a room serializer.
pub enum RoomCommand {
    Join {
        socket: SocketHandle,
        password: Option<String>,
        reply: oneshot::Sender<AppResult<RoomSnapshot>>,
    },
    Leave {
        socket_id: SocketId,
        explicit: bool,
        reply: oneshot::Sender<AppResult<()>>,
    },
    ApplyEdit {
        socket_id: SocketId,
        user_id: Uuid,
        ops: Vec<EditOp>,
        base_version: u64,
        reply: oneshot::Sender<AppResult<u64>>,
    },
    SetLanguage {
        socket_id: SocketId,
        user_id: Uuid,
        language: String,
        reply: oneshot::Sender<AppResult<()>>,
    },
    SetInput {
        socket_id: SocketId,
        user_id: Uuid,
        input: String,
        reply: oneshot::Sender<AppResult<()>>,
    },
    RequestExec {
        user_id: Uuid,
        reply: oneshot::Sender<AppResult<Uuid>>,
    },
    CompleteExec {
        execution_id: Uuid,
        result: ExecutionResult,
    },
    PostChat {
        user_id: Uuid,
        content: String,
        kind: MessageKind,
        reply: oneshot::Sender<AppResult<ChatMessage>>,
    },
    Signal {
        socket_id: SocketId,
        user_id: Uuid,
        kind: String,
        payload: serde_json::Value,
        reply: oneshot::Sender<AppResult<()>>,
    },
    /// Flush buffers to the repository without exiting.
    Flush {
        reply: oneshot::Sender<()>,
    },
    /// Evict all sockets and exit. Used when the room row is deleted.
    Close,
}

struct HistoryEntry {
    version: u64,
    op: Operation,
}

struct RoomTask {
    room_id: String,
    visibility: Visibility,
    password_hash: Option<String>,
    max_capacity: u32,
    language: String,
    code: String,
    input: String,
    output: String,

    version: u64,
    lamport: u64,
    history: VecDeque<HistoryEntry>,
    /// Execution latch: at most one execution in flight per room.
    running_execution: Option<Uuid>,

    seats: Vec<SocketHandle>,
    ever_occupied: bool,

    rooms: Arc<DashMap<String, RoomHandle>>,
    repository: Arc<dyn Repository>,
    queue: Arc<dyn JobQueue>,
    config: Arc<Config>,
}

/// Spawn the serializer for `room` and return its command channel.
pub(super) fn spawn(
    room: Room,
    rooms: Arc<DashMap<String, RoomHandle>>,
    repository: Arc<dyn Repository>,
    queue: Arc<dyn JobQueue>,
    config: Arc<Config>,
) -> mpsc::Sender<RoomCommand> {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);

    let task = RoomTask {
        room_id: room.id,
        visibility: room.visibility,
        password_hash: room.password_hash,
        max_capacity: room.max_capacity,
        language: room.language,
        code: room.code,
        input: room.input,
        output: room.output,
        version: 0,
        lamport: 0,
        history: VecDeque::new(),
        running_execution: None,
        seats: Vec::new(),
        ever_occupied: false,
        rooms,
        repository,
        queue,
        config,
    };

    let task_tx = tx.clone();
    tokio::spawn(task.run(rx, task_tx));
    tx
}

impl RoomTask {
    async fn run(mut self, mut rx: mpsc::Receiver<RoomCommand>, own_tx: mpsc::Sender<RoomCommand>) {
        tracing::debug!(room_id = %self.room_id, "room serializer started");

        while let Some(command) = rx.recv().await {
            let closing = matches!(command, RoomCommand::Close);
            self.handle(command).await;
            if closing || self.is_done() {
                break;
            }
        }

        self.flush().await;
        self.rooms
            .remove_if(&self.room_id, |_, handle| handle.tx.same_channel(&own_tx));
        tracing::debug!(room_id = %self.room_id, "room serializer stopped");
    }

    /// Idle means no sockets and no execution to account for.
    fn is_done(&self) -> bool {
        self.seats.is_empty() && self.running_execution.is_none() && self.ever_occupied
    }

    async fn handle(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Join {
                socket,
                password,
                reply,
            } => {
                let result = self.join(socket, password).await;
                let _ = reply.send(result);
            }
            RoomCommand::Leave {
                socket_id,
                explicit,
                reply,
            } => {
                self.leave(socket_id, explicit).await;
                let _ = reply.send(Ok(()));
            }
            RoomCommand::ApplyEdit {
                socket_id,
                user_id,
                ops,
                base_version,
                reply,
            } => {
                let result = self.apply_edit(socket_id, user_id, ops, base_version).await;
                let _ = reply.send(result);
            }
            RoomCommand::SetLanguage {
                socket_id,
                user_id,
                language,
                reply,
            } => {
                let _ = reply.send(self.set_language(socket_id, user_id, language).await);
            }
            RoomCommand::SetInput {
                socket_id,
                user_id,
                input,
                reply,
            } => {
                let _ = reply.send(self.set_input(socket_id, user_id, input).await);
            }
            RoomCommand::RequestExec { user_id, reply } => {
                let result = self.request_exec(user_id).await;
                let _ = reply.send(result);
            }
            RoomCommand::CompleteExec {
                execution_id,
                result,
            } => {
                self.complete_exec(execution_id, result).await;
            }
            RoomCommand::PostChat {
                user_id,
                content,
                kind,
                reply,
            } => {
                let _ = reply.send(self.post_chat(user_id, content, kind).await);
            }
            RoomCommand::Signal {
                socket_id,
                user_id,
                kind,
                payload,
                reply,
            } => {
                let _ = reply.send(self.relay_signal(socket_id, user_id, kind, payload).await);
            }
            RoomCommand::Flush { reply } => {
                self.flush().await;
                let _ = reply.send(());
            }
            RoomCommand::Close => {
                self.seats.clear();
            }
        }
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    async fn join(
        &mut self,
        socket: SocketHandle,
        password: Option<String>,
    ) -> AppResult<RoomSnapshot> {
        if self.seats.iter().any(|s| s.socket_id == socket.socket_id) {
            return Err(AppError::Conflict("already joined this room".into()));
        }

        if self.visibility == Visibility::Private {
            let verifier = self
                .password_hash
                .as_deref()
                .ok_or_else(|| AppError::internal("private room without verifier"))?;
            let presented = password.ok_or(AppError::BadPassword)?;
            if !verify_password(&presented, verifier) {
                return Err(AppError::BadPassword);
            }
        }

        let user_present = self.seats.iter().any(|s| s.user_id == socket.user_id);
        if !user_present && self.connected_users() >= self.max_capacity as usize {
            return Err(AppError::Full);
        }

        // Idempotent: a rejoin keeps the existing row and role.
        self.repository
            .upsert_membership(&self.room_id, socket.user_id, MemberRole::Member)
            .await?;

        let user = PublicUser {
            id: socket.user_id,
            display_name: socket.display_name.clone(),
        };
        let socket_id = socket.socket_id;
        self.seats.push(socket);
        self.ever_occupied = true;

        if !user_present {
            let joined = ServerEvent::UserJoined {
                room_id: self.room_id.clone(),
                user: user.clone(),
            };
            self.broadcast_except(joined, Some(socket_id)).await;
            self.system_notice(format!("{} joined the room", user.display_name))
                .await;
        }

        let members = self.repository.list_members(&self.room_id).await?;
        Ok(RoomSnapshot {
            room_id: self.room_id.clone(),
            code: self.code.clone(),
            language: self.language.clone(),
            input: self.input.clone(),
            output: self.output.clone(),
            version: self.version,
            members,
        })
    }

    async fn leave(&mut self, socket_id: SocketId, explicit: bool) {
        let Some(index) = self.seats.iter().position(|s| s.socket_id == socket_id) else {
            return;
        };
        let seat = self.seats.remove(index);

        let user_still_present = self.seats.iter().any(|s| s.user_id == seat.user_id);
        if !user_still_present {
            self.broadcast(ServerEvent::UserLeft {
                room_id: self.room_id.clone(),
                user_id: seat.user_id,
            })
            .await;

            if explicit {
                if let Err(err) = self
                    .repository
                    .remove_membership(&self.room_id, seat.user_id)
                    .await
                {
                    tracing::warn!(room_id = %self.room_id, error = %err, "membership removal failed");
                }
                self.system_notice(format!("{} left the room", seat.display_name))
                    .await;
            }
        }
    }

    fn connected_users(&self) -> usize {
        let mut users: Vec<Uuid> = self.seats.iter().map(|s| s.user_id).collect();
        users.sort_unstable();
        users.dedup();
        users.len()
    }

    fn seat_of(&self, socket_id: SocketId, user_id: Uuid) -> AppResult<&SocketHandle> {
        self.seats
            .iter()
            .find(|s| s.socket_id == socket_id && s.user_id == user_id)
            .ok_or_else(|| AppError::Forbidden("not joined to this room".into()))
    }

    // ------------------------------------------------------------------
    // Editing
    // ------------------------------------------------------------------

    async fn apply_edit(
        &mut self,
        socket_id: SocketId,
        user_id: Uuid,
        ops: Vec<EditOp>,
        base_version: u64,
    ) -> AppResult<u64> {
        self.seat_of(socket_id, user_id)?;

        if ops.is_empty() || ops.iter().any(|op| !op.is_well_formed()) {
            return self.reject_edit(socket_id).await;
        }

        // A base the history no longer covers cannot be transformed.
        let history_floor = self.version - self.history.len() as u64;
        if base_version > self.version || base_version < history_floor {
            return self.reject_edit(socket_id).await;
        }

        let stamped: Vec<Operation> = ops
            .into_iter()
            .map(|op| {
                self.lamport += 1;
                op.into_operation(user_id, self.lamport)
            })
            .collect();

        let concurrent: Vec<Operation> = self
            .history
            .iter()
            .filter(|entry| entry.version >= base_version)
            .map(|entry| entry.op.clone())
            .collect();

        let transformed = ot::transform_batch(&stamped, &concurrent);
        let composed = ot::compose(transformed);
        if composed.is_empty() {
            // Everything the client sent was consumed by concurrent edits.
            return Ok(self.version);
        }

        let next = match ot::apply_batch(&self.code, &composed) {
            Ok(buffer) => buffer,
            Err(err) => {
                tracing::debug!(room_id = %self.room_id, %err, "edit rejected");
                return self.reject_edit(socket_id).await;
            }
        };
        self.code = next;

        for op in &composed {
            self.version += 1;
            self.history.push_back(HistoryEntry {
                version: self.version,
                op: op.clone(),
            });
        }
        while self.history.len() > HISTORY_CAP {
            self.history.pop_front();
        }

        let event = ServerEvent::CodeUpdated {
            room_id: self.room_id.clone(),
            ops: composed.iter().map(EditOp::from).collect(),
            version: self.version,
            user_id,
        };
        self.broadcast_except(event, Some(socket_id)).await;

        Ok(self.version)
    }

    /// Reject with `invalid_edit` and push a fresh snapshot to the
    /// offending socket so it can converge again.
    async fn reject_edit(&mut self, socket_id: SocketId) -> AppResult<u64> {
        let sync = ServerEvent::CodeSync {
            room_id: self.room_id.clone(),
            code: self.code.clone(),
            language: self.language.clone(),
            input: self.input.clone(),
            output: self.output.clone(),
            version: self.version,
        };
        self.send_to(socket_id, sync).await;
        Err(AppError::InvalidEdit)
    }

    async fn set_language(
        &mut self,
        socket_id: SocketId,
        user_id: Uuid,
        language: String,
    ) -> AppResult<()> {
        self.seat_of(socket_id, user_id)?;
        if !languages::is_supported(&language) {
            return Err(AppError::Validation(format!(
                "unsupported language {language}"
            )));
        }

        self.language = language.clone();
        self.broadcast_except(
            ServerEvent::LanguageChanged {
                room_id: self.room_id.clone(),
                language,
                user_id,
            },
            Some(socket_id),
        )
        .await;
        Ok(())
    }

    async fn set_input(
        &mut self,
        socket_id: SocketId,
        user_id: Uuid,
        input: String,
    ) -> AppResult<()> {
        self.seat_of(socket_id, user_id)?;
        self.input = input.clone();
        self.broadcast_except(
            ServerEvent::InputUpdated {
                room_id: self.room_id.clone(),
                input,
                user_id,
            },
            Some(socket_id),
        )
        .await;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    async fn request_exec(&mut self, user_id: Uuid) -> AppResult<Uuid> {
        // Requests may arrive over HTTP without a socket, so membership is
        // checked against the repository rather than the seat list.
        self.repository
            .find_membership(&self.room_id, user_id)
            .await?
            .ok_or_else(|| AppError::Forbidden("not a member of this room".into()))?;

        if self.running_execution.is_some() {
            return Err(AppError::Busy);
        }

        let language = languages::language_config(&self.language).ok_or_else(|| {
            AppError::Validation(format!("unsupported language {}", self.language))
        })?;

        let execution_id = Uuid::new_v4();
        self.repository
            .create_execution(NewExecution {
                id: execution_id,
                room_id: self.room_id.clone(),
                user_id: Some(user_id),
                language: self.language.clone(),
                code: self.code.clone(),
                stdin: self.input.clone(),
            })
            .await?;

        let timeout = language.default_timeout.min(self.config.max_timeout);
        let memory = language
            .default_memory_bytes
            .min(self.config.max_memory_bytes);

        self.queue
            .enqueue(ExecutionJob {
                execution_id,
                room_id: self.room_id.clone(),
                requester_id: Some(user_id),
                language: self.language.clone(),
                code: self.code.clone(),
                stdin: self.input.clone(),
                timeout_ms: timeout.as_millis() as u64,
                memory_bytes: memory,
                attempt: 0,
            })
            .await?;

        self.running_execution = Some(execution_id);
        // An execution keeps the serializer alive even with no sockets, so
        // the result can be recorded and the latch accounted for.
        self.ever_occupied = true;
        self.broadcast(ServerEvent::ExecutionStarted {
            room_id: self.room_id.clone(),
            execution_id,
            user_id: Some(user_id),
        })
        .await;

        Ok(execution_id)
    }

    async fn complete_exec(&mut self, execution_id: Uuid, result: ExecutionResult) {
        match self.running_execution {
            Some(current) if current == execution_id => {
                self.running_execution = None;
            }
            _ => {
                tracing::warn!(
                    room_id = %self.room_id,
                    %execution_id,
                    "result for an execution this room is not waiting on"
                );
            }
        }

        self.output = if result.stdout.is_empty() {
            result.stderr.clone()
        } else {
            result.stdout.clone()
        };

        self.broadcast(ServerEvent::ExecutionResult {
            room_id: self.room_id.clone(),
            execution_id,
            status: result.status,
            stdout: result.stdout,
            stderr: result.stderr,
            exit_code: result.exit_code,
            execution_time: result.execution_time_ms,
            memory_used: result.memory_bytes,
        })
        .await;

        let summary = match result.status {
            ExecutionStatus::Completed => {
                format!("execution finished in {} ms", result.execution_time_ms)
            }
            status => format!("execution ended: {}", status.as_str()),
        };
        self.system_notice(summary).await;
    }

    // ------------------------------------------------------------------
    // Chat and signaling
    // ------------------------------------------------------------------

    async fn post_chat(
        &mut self,
        user_id: Uuid,
        content: String,
        kind: MessageKind,
    ) -> AppResult<ChatMessage> {
        if !self.seats.iter().any(|s| s.user_id == user_id) {
            return Err(AppError::Forbidden("not joined to this room".into()));
        }

        let new_message = NewChatMessage {
            room_id: self.room_id.clone(),
            author_id: Some(user_id),
            content,
            kind,
        };
        new_message.validate()?;

        let message = self.repository.append_message(new_message).await?;
        self.broadcast(ServerEvent::MessageReceived {
            room_id: self.room_id.clone(),
            message: message.clone(),
        })
        .await;
        Ok(message)
    }

    async fn relay_signal(
        &mut self,
        socket_id: SocketId,
        user_id: Uuid,
        kind: String,
        payload: serde_json::Value,
    ) -> AppResult<()> {
        // Membership is checked on every relay.
        self.seat_of(socket_id, user_id)?;

        self.broadcast_except(
            ServerEvent::Video {
                room_id: self.room_id.clone(),
                kind,
                from_user: user_id,
                payload,
            },
            Some(socket_id),
        )
        .await;
        Ok(())
    }

    /// Persist and broadcast a system chat notice. Failures are logged and
    /// swallowed; notices are never worth failing an operation over.
    async fn system_notice(&mut self, content: String) {
        let new_message = NewChatMessage {
            room_id: self.room_id.clone(),
            author_id: None,
            content,
            kind: MessageKind::System,
        };
        match self.repository.append_message(new_message).await {
            Ok(message) => {
                self.broadcast(ServerEvent::MessageReceived {
                    room_id: self.room_id.clone(),
                    message,
                })
                .await;
            }
            Err(err) => {
                tracing::warn!(room_id = %self.room_id, error = %err, "system notice failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Fan-out
    // ------------------------------------------------------------------

    async fn broadcast(&mut self, event: ServerEvent) {
        self.broadcast_except(event, None).await;
    }

    /// Enqueue a copy of `event` for every seat except `skip`. Sockets
    /// whose queues are full or closed are evicted, which may cascade into
    /// further `user-left` broadcasts.
    async fn broadcast_except(&mut self, event: ServerEvent, skip: Option<SocketId>) {
        let mut evicted: Vec<SocketId> = Vec::new();
        for seat in &self.seats {
            if Some(seat.socket_id) == skip {
                continue;
            }
            if !seat.try_send(event.clone()) {
                evicted.push(seat.socket_id);
            }
        }

        for socket_id in evicted {
            tracing::warn!(
                room_id = %self.room_id,
                %socket_id,
                "evicting slow or closed socket"
            );
            // Eviction keeps the membership, like a transient disconnect.
            Box::pin(self.leave(socket_id, false)).await;
        }
    }

    async fn send_to(&mut self, socket_id: SocketId, event: ServerEvent) {
        let ok = self
            .seats
            .iter()
            .find(|s| s.socket_id == socket_id)
            .map(|seat| seat.try_send(event))
            .unwrap_or(true);
        if !ok {
            Box::pin(self.leave(socket_id, false)).await;
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    async fn flush(&self) {
        if let Err(err) = self
            .repository
            .flush_room_state(
                &self.room_id,
                &self.code,
                &self.language,
                &self.input,
                &self.output,
            )
            .await
        {
            // Flush failures must not block teardown.
            tracing::error!(room_id = %self.room_id, error = %err, "room flush failed");
        }
    }
}
