//! Socket lifecycle: upgrade, read loop, bounded write loop.

use std::collections::HashSet;
use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::client_ip;
use crate::auth::Claims;
use crate::error::AppError;
use crate::hub::{SocketHandle, SocketId};
use crate::models::MessageKind;
use crate::ratelimit::Bucket;
use crate::services::AppServices;

use super::protocol::{ClientEvent, Frame, ServerEvent};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Bearer token presented in the connection handshake.
    token: Option<String>,
}

/// `GET /ws` upgrade endpoint.
pub async fn ws_handler(
    State(services): State<AppServices>,
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let ip = client_ip(&headers, addr);
    match services.ratelimiter.acquire(Bucket::WsConnect, &ip).await {
        Ok(decision) => {
            if let Err(err) = decision.enforce() {
                return err.into_response();
            }
        }
        Err(err) => return err.into_response(),
    }

    let token = query.token.or_else(|| {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(String::from)
    });
    let claims = match token.as_deref().map(|t| services.signer.verify(t)) {
        Some(Ok(claims)) => claims,
        _ => return AppError::Unauthorized.into_response(),
    };

    ws.on_upgrade(move |socket| run_socket(services, socket, claims))
}

/// Drive one authenticated socket until it closes.
async fn run_socket(services: AppServices, socket: WebSocket, claims: Claims) {
    let socket_id: SocketId = Uuid::new_v4();
    let (handle, mut outbound) =
        SocketHandle::channel(socket_id, claims.sub, claims.name.clone());

    tracing::info!(%socket_id, user_id = %claims.sub, "socket connected");

    let (mut sink, mut stream) = socket.split();

    // Writer half: drains the bounded outbound queue. When the hub evicts
    // this socket the sender side drops and the loop ends.
    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let frame = event.into_frame();
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(err) => {
                    tracing::error!(error = %err, "event serialization failed");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut session = Session {
        services,
        handle,
        socket_id,
        user_id: claims.sub,
        joined: HashSet::new(),
    };

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => session.handle_text(&text).await,
            Ok(Message::Close(_)) | Err(_) => break,
            // Pings are answered by the protocol layer; other frame types
            // carry nothing for us.
            Ok(_) => {}
        }
    }

    // Disconnect: membership is preserved, sockets are unregistered.
    for room_id in session.joined.clone() {
        if let Err(err) = session
            .services
            .hub
            .leave(&room_id, socket_id, false)
            .await
        {
            tracing::warn!(%socket_id, room_id, error = %err, "leave on disconnect failed");
        }
    }

    writer.abort();
    tracing::info!(%socket_id, "socket disconnected");
}

struct Session {
    services: AppServices,
    handle: SocketHandle,
    socket_id: SocketId,
    user_id: Uuid,
    joined: HashSet<String>,
}

impl Session {
    async fn handle_text(&mut self, text: &str) {
        let frame: Frame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(err) => {
                self.send_error(AppError::Validation(format!("malformed frame: {err}")));
                return;
            }
        };

        let event = match ClientEvent::parse(frame) {
            Ok(Some(event)) => event,
            Ok(None) => {
                tracing::debug!(socket_id = %self.socket_id, "ignoring unknown event");
                return;
            }
            Err(err) => {
                self.send_error(AppError::Validation(format!("malformed payload: {err}")));
                return;
            }
        };

        if let Err(err) = self.dispatch(event).await {
            self.send_error(err);
        }
    }

    async fn dispatch(&mut self, event: ClientEvent) -> Result<(), AppError> {
        match event {
            ClientEvent::Join(data) => {
                let snapshot = self
                    .services
                    .hub
                    .join(&data.room_id, self.handle.clone(), data.password)
                    .await?;
                self.joined.insert(data.room_id);
                self.send(ServerEvent::Joined(snapshot));
            }
            ClientEvent::Leave(data) => {
                self.services
                    .hub
                    .leave(&data.room_id, self.socket_id, true)
                    .await?;
                self.joined.remove(&data.room_id);
            }
            ClientEvent::CodeUpdate(data) => {
                self.services
                    .hub
                    .apply_edit(
                        &data.room_id,
                        self.socket_id,
                        self.user_id,
                        data.ops,
                        data.base_version,
                    )
                    .await?;
            }
            ClientEvent::LanguageChange(data) => {
                self.services
                    .hub
                    .set_language(&data.room_id, self.socket_id, self.user_id, data.language)
                    .await?;
            }
            ClientEvent::InputUpdate(data) => {
                self.services
                    .hub
                    .set_input(&data.room_id, self.socket_id, self.user_id, data.input)
                    .await?;
            }
            ClientEvent::Execute(data) => {
                self.services
                    .ratelimiter
                    .acquire(Bucket::Exec, &self.user_id.to_string())
                    .await?
                    .enforce()?;
                self.services
                    .hub
                    .request_exec(&data.room_id, self.user_id)
                    .await?;
            }
            ClientEvent::Chat(data) => {
                self.services
                    .ratelimiter
                    .acquire(Bucket::Chat, &self.user_id.to_string())
                    .await?
                    .enforce()?;
                self.services
                    .hub
                    .post_chat(
                        &data.room_id,
                        self.user_id,
                        data.content,
                        data.kind.unwrap_or(MessageKind::Text),
                    )
                    .await?;
            }
            ClientEvent::Video {
                room_id,
                kind,
                payload,
            } => {
                self.services
                    .hub
                    .relay_signal(&room_id, self.socket_id, self.user_id, kind, payload)
                    .await?;
            }
        }
        Ok(())
    }

    /// Local replies go through the same bounded queue the hub broadcasts
    /// into, so they respect the same backpressure bound.
    fn send(&self, event: ServerEvent) {
        if !self.handle.try_send(event) {
            tracing::warn!(socket_id = %self.socket_id, "outbound queue full, reply dropped");
        }
    }

    fn send_error(&self, err: AppError) {
        self.send(ServerEvent::Error {
            error: err.to_string(),
            code: err.code(),
        });
    }
}
