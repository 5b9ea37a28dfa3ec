//! # Room Hub
//!
//! Authoritative in-memory coordinator for all rooms in this process. Every
//! mutation of a room's runtime state flows through that room's serializer
//! task, so events for one room are totally ordered and consistent with a
//! single linearization of mutations.
//!
//! Sockets never hold references into room state: they carry their own id
//! and the room id, and receive events through a bounded outbound queue. A
//! socket whose queue overflows is evicted rather than allowed to stall the
//! broadcast.

mod room;

pub use room::{RoomCommand, HISTORY_CAP};

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::{ChatMessage, ExecutionResult, MessageKind};
use crate::ot::EditOp;
use crate::queue::JobQueue;
use crate::repository::Repository;
use crate::worker::ExecutionPublisher;
use crate::ws::protocol::{RoomSnapshot, ServerEvent};

/// Bound of each per-socket outbound queue.
pub const OUTBOUND_QUEUE_DEPTH: usize = 256;

pub type SocketId = Uuid;

// ============================================================================
// Socket Handles
// ============================================================================

/// A connected socket as the hub sees it: identity plus a bounded sender.
#[derive(Clone)]
pub struct SocketHandle {
    pub socket_id: SocketId,
    pub user_id: Uuid,
    pub display_name: String,
    sender: mpsc::Sender<ServerEvent>,
}

impl SocketHandle {
    pub fn new(
        socket_id: SocketId,
        user_id: Uuid,
        display_name: String,
        sender: mpsc::Sender<ServerEvent>,
    ) -> Self {
        Self {
            socket_id,
            user_id,
            display_name,
            sender,
        }
    }

    /// Create a handle with a fresh bounded queue; the receiver side feeds
    /// the gateway's writer loop.
    pub fn channel(
        socket_id: SocketId,
        user_id: Uuid,
        display_name: String,
    ) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        (Self::new(socket_id, user_id, display_name, tx), rx)
    }

    /// Enqueue without blocking. `false` means the socket is full or gone
    /// and must be evicted.
    pub(crate) fn try_send(&self, event: ServerEvent) -> bool {
        self.sender.try_send(event).is_ok()
    }
}

// ============================================================================
// Hub
// ============================================================================

#[derive(Clone)]
struct RoomHandle {
    tx: mpsc::Sender<RoomCommand>,
}

/// The hub proper: an index of live room serializers plus the services the
/// serializers need.
pub struct Hub {
    rooms: Arc<DashMap<String, RoomHandle>>,
    repository: Arc<dyn Repository>,
    queue: Arc<dyn JobQueue>,
    config: Arc<Config>,
}

impl Hub {
    pub fn new(
        repository: Arc<dyn Repository>,
        queue: Arc<dyn JobQueue>,
        config: Arc<Config>,
    ) -> Arc<Self> {
        Arc::new(Self {
            rooms: Arc::new(DashMap::new()),
            repository,
            queue,
            config,
        })
    }

    /// Number of rooms with a live runtime.
    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    /// Fetch the live handle, or spawn the room's serializer from its
    /// persisted row when `activate` is set.
    async fn handle_for(&self, room_id: &str, activate: bool) -> AppResult<RoomHandle> {
        if let Some(handle) = self.rooms.get(room_id) {
            if !handle.tx.is_closed() {
                return Ok(handle.clone());
            }
            drop(handle);
            self.rooms.remove(room_id);
        }

        if !activate {
            return Err(AppError::NotFound("room"));
        }

        let room = self
            .repository
            .find_room(room_id)
            .await?
            .ok_or(AppError::NotFound("room"))?;

        let entry = self.rooms.entry(room_id.to_string());
        let handle = entry
            .or_insert_with(|| {
                let tx = room::spawn(
                    room,
                    Arc::clone(&self.rooms),
                    Arc::clone(&self.repository),
                    Arc::clone(&self.queue),
                    Arc::clone(&self.config),
                );
                RoomHandle { tx }
            })
            .clone();
        Ok(handle)
    }

    async fn request<R>(
        &self,
        handle: &RoomHandle,
        build: impl FnOnce(oneshot::Sender<AppResult<R>>) -> RoomCommand,
    ) -> AppResult<R> {
        let (reply_tx, reply_rx) = oneshot::channel();
        handle
            .tx
            .send(build(reply_tx))
            .await
            .map_err(|_| AppError::NotFound("room"))?;
        reply_rx
            .await
            .map_err(|_| AppError::internal("room serializer dropped a reply"))?
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Register a socket in a room, activating the runtime if needed.
    pub async fn join(
        &self,
        room_id: &str,
        socket: SocketHandle,
        password: Option<String>,
    ) -> AppResult<RoomSnapshot> {
        let handle = self.handle_for(room_id, true).await?;
        self.request(&handle, |reply| RoomCommand::Join {
            socket,
            password,
            reply,
        })
        .await
    }

    /// Drop a socket. `explicit` distinguishes a deliberate leave (which
    /// removes the membership) from a transient disconnect (which keeps it).
    pub async fn leave(&self, room_id: &str, socket_id: SocketId, explicit: bool) -> AppResult<()> {
        let handle = match self.handle_for(room_id, false).await {
            Ok(handle) => handle,
            // Leaving an idle room is a no-op, not an error.
            Err(AppError::NotFound(_)) => return Ok(()),
            Err(err) => return Err(err),
        };
        self.request(&handle, |reply| RoomCommand::Leave {
            socket_id,
            explicit,
            reply,
        })
        .await
    }

    /// Transform and apply an edit batch; returns the new version.
    pub async fn apply_edit(
        &self,
        room_id: &str,
        socket_id: SocketId,
        user_id: Uuid,
        ops: Vec<EditOp>,
        base_version: u64,
    ) -> AppResult<u64> {
        let handle = self.handle_for(room_id, false).await?;
        self.request(&handle, |reply| RoomCommand::ApplyEdit {
            socket_id,
            user_id,
            ops,
            base_version,
            reply,
        })
        .await
    }

    pub async fn set_language(
        &self,
        room_id: &str,
        socket_id: SocketId,
        user_id: Uuid,
        language: String,
    ) -> AppResult<()> {
        let handle = self.handle_for(room_id, false).await?;
        self.request(&handle, |reply| RoomCommand::SetLanguage {
            socket_id,
            user_id,
            language,
            reply,
        })
        .await
    }

    pub async fn set_input(
        &self,
        room_id: &str,
        socket_id: SocketId,
        user_id: Uuid,
        input: String,
    ) -> AppResult<()> {
        let handle = self.handle_for(room_id, false).await?;
        self.request(&handle, |reply| RoomCommand::SetInput {
            socket_id,
            user_id,
            input,
            reply,
        })
        .await
    }

    /// Enqueue an execution of the room's current buffer. Fails with
    /// `busy` while another execution is in flight.
    pub async fn request_exec(&self, room_id: &str, user_id: Uuid) -> AppResult<Uuid> {
        let handle = self.handle_for(room_id, true).await?;
        self.request(&handle, |reply| RoomCommand::RequestExec { user_id, reply })
            .await
    }

    pub async fn post_chat(
        &self,
        room_id: &str,
        user_id: Uuid,
        content: String,
        kind: MessageKind,
    ) -> AppResult<ChatMessage> {
        let handle = self.handle_for(room_id, false).await?;
        self.request(&handle, |reply| RoomCommand::PostChat {
            user_id,
            content,
            kind,
            reply,
        })
        .await
    }

    /// Relay a signaling frame to the sender's room peers.
    pub async fn relay_signal(
        &self,
        room_id: &str,
        socket_id: SocketId,
        user_id: Uuid,
        kind: String,
        payload: serde_json::Value,
    ) -> AppResult<()> {
        let handle = self.handle_for(room_id, false).await?;
        self.request(&handle, |reply| RoomCommand::Signal {
            socket_id,
            user_id,
            kind,
            payload,
            reply,
        })
        .await
    }

    /// Tear down a room's runtime, evicting any connected sockets. Used
    /// when the room row is deleted.
    pub async fn close_room(&self, room_id: &str) {
        if let Some((_, handle)) = self.rooms.remove(room_id) {
            let _ = handle.tx.send(RoomCommand::Close).await;
        }
    }

    /// Flush every live room to the repository. Called on shutdown.
    pub async fn shutdown(&self) {
        let handles: Vec<(String, RoomHandle)> = self
            .rooms
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        for (room_id, handle) in handles {
            let (reply_tx, reply_rx) = oneshot::channel();
            if handle
                .tx
                .send(RoomCommand::Flush { reply: reply_tx })
                .await
                .is_ok()
            {
                let _ = reply_rx.await;
            }
            tracing::debug!(room_id, "room flushed for shutdown");
        }
    }
}

#[async_trait::async_trait]
impl ExecutionPublisher for Hub {
    async fn publish(&self, room_id: &str, execution_id: Uuid, result: ExecutionResult) {
        match self.handle_for(room_id, false).await {
            Ok(handle) => {
                if handle
                    .tx
                    .send(RoomCommand::CompleteExec {
                        execution_id,
                        result,
                    })
                    .await
                    .is_err()
                {
                    tracing::debug!(room_id, %execution_id, "result arrived after room teardown");
                }
            }
            Err(_) => {
                tracing::debug!(room_id, %execution_id, "result for idle room, already persisted");
            }
        }
    }
}
