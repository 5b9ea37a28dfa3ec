//! WebSocket event vocabulary.
//!
//! Every frame on the wire is `{event: <string>, data: <object>}`. The
//! vocabulary is a closed tagged union: unknown client event names are
//! ignored and logged, never dispatched. Video signaling payloads are
//! relayed verbatim and carry no schema beyond the room id.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ErrorCode;
use crate::models::{ChatMessage, MessageKind, PublicUser};
use crate::ot::EditOp;
use crate::repository::RoomMember;

/// One wire frame, either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    fn new<T: Serialize>(event: &str, data: &T) -> Self {
        Self {
            event: event.to_string(),
            data: serde_json::to_value(data).unwrap_or(Value::Null),
        }
    }
}

// ============================================================================
// Client Events
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinData {
    pub room_id: String,
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomData {
    pub room_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeUpdateData {
    pub room_id: String,
    pub ops: Vec<EditOp>,
    pub base_version: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageChangeData {
    pub room_id: String,
    pub language: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputUpdateData {
    pub room_id: String,
    pub input: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatData {
    pub room_id: String,
    pub content: String,
    #[serde(default)]
    pub kind: Option<MessageKind>,
}

/// Events a client may send.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Join(JoinData),
    Leave(RoomData),
    CodeUpdate(CodeUpdateData),
    LanguageChange(LanguageChangeData),
    InputUpdate(InputUpdateData),
    Execute(RoomData),
    Chat(ChatData),
    /// Opaque signaling frame, relayed verbatim. `kind` is the suffix of
    /// the `video:*` event name.
    Video {
        room_id: String,
        kind: String,
        payload: Value,
    },
}

impl ClientEvent {
    /// Decode a frame. `Ok(None)` means the event name is not part of the
    /// vocabulary; malformed data for a known name is an error.
    pub fn parse(frame: Frame) -> Result<Option<Self>, serde_json::Error> {
        let event = match frame.event.as_str() {
            "room:join" => Self::Join(serde_json::from_value(frame.data)?),
            "room:leave" => Self::Leave(serde_json::from_value(frame.data)?),
            "code:update" => Self::CodeUpdate(serde_json::from_value(frame.data)?),
            "code:language-change" => Self::LanguageChange(serde_json::from_value(frame.data)?),
            "room:input-update" => Self::InputUpdate(serde_json::from_value(frame.data)?),
            "code:execute" => Self::Execute(serde_json::from_value(frame.data)?),
            "chat:message" => Self::Chat(serde_json::from_value(frame.data)?),
            name if name.starts_with("video:") => {
                let kind = name["video:".len()..].to_string();
                let room_id = frame
                    .data
                    .get("roomId")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Self::Video {
                    room_id,
                    kind,
                    payload: frame.data,
                }
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

// ============================================================================
// Server Events
// ============================================================================

/// Events the hub broadcasts or sends to a single socket.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Join acknowledgement carrying the full room snapshot, sent only to
    /// the joining socket.
    Joined(RoomSnapshot),
    UserJoined {
        room_id: String,
        user: PublicUser,
    },
    UserLeft {
        room_id: String,
        user_id: Uuid,
    },
    CodeUpdated {
        room_id: String,
        ops: Vec<EditOp>,
        version: u64,
        user_id: Uuid,
    },
    LanguageChanged {
        room_id: String,
        language: String,
        user_id: Uuid,
    },
    InputUpdated {
        room_id: String,
        input: String,
        user_id: Uuid,
    },
    ExecutionStarted {
        room_id: String,
        execution_id: Uuid,
        user_id: Option<Uuid>,
    },
    ExecutionResult {
        room_id: String,
        execution_id: Uuid,
        status: crate::models::ExecutionStatus,
        stdout: String,
        stderr: String,
        exit_code: i32,
        execution_time: u64,
        memory_used: u64,
    },
    MessageReceived {
        room_id: String,
        message: ChatMessage,
    },
    CodeSync {
        room_id: String,
        code: String,
        language: String,
        input: String,
        output: String,
        version: u64,
    },
    Video {
        room_id: String,
        kind: String,
        from_user: Uuid,
        payload: Value,
    },
    Error {
        error: String,
        code: ErrorCode,
    },
}

impl ServerEvent {
    /// Wire event name.
    pub fn event_name(&self) -> String {
        match self {
            ServerEvent::Joined(_) => "room:joined".to_string(),
            ServerEvent::UserJoined { .. } => "room:user-joined".to_string(),
            ServerEvent::UserLeft { .. } => "room:user-left".to_string(),
            ServerEvent::CodeUpdated { .. } => "code:updated".to_string(),
            ServerEvent::LanguageChanged { .. } => "code:language-changed".to_string(),
            ServerEvent::InputUpdated { .. } => "room:input-update".to_string(),
            ServerEvent::ExecutionStarted { .. } => "code:execution-started".to_string(),
            ServerEvent::ExecutionResult { .. } => "code:execution-result".to_string(),
            ServerEvent::MessageReceived { .. } => "chat:message-received".to_string(),
            ServerEvent::CodeSync { .. } => "room:code-sync".to_string(),
            ServerEvent::Video { kind, .. } => format!("video:{kind}"),
            ServerEvent::Error { .. } => "error".to_string(),
        }
    }

    /// Encode into the `{event, data}` wire shape.
    pub fn into_frame(self) -> Frame {
        let event = self.event_name();
        match self {
            // Signaling payloads pass through untouched, annotated with the
            // sending peer.
            ServerEvent::Video {
                from_user, payload, ..
            } => {
                let mut data = payload;
                if let Value::Object(map) = &mut data {
                    map.insert("fromUser".to_string(), Value::String(from_user.to_string()));
                }
                Frame { event, data }
            }
            other => Frame::new(&event, &other),
        }
    }
}

/// Snapshot returned to a joining socket.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_id: String,
    pub code: String,
    pub language: String,
    pub input: String,
    pub output: String,
    pub version: u64,
    pub members: Vec<RoomMember>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_join() {
        let frame = Frame {
            event: "room:join".into(),
            data: json!({"roomId": "abc", "password": "pw"}),
        };
        match ClientEvent::parse(frame).unwrap().unwrap() {
            ClientEvent::Join(data) => {
                assert_eq!(data.room_id, "abc");
                assert_eq!(data.password.as_deref(), Some("pw"));
            }
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_code_update() {
        let frame = Frame {
            event: "code:update".into(),
            data: json!({
                "roomId": "abc",
                "baseVersion": 3,
                "ops": [{"kind": "insert", "position": 0, "text": "x"}]
            }),
        };
        match ClientEvent::parse(frame).unwrap().unwrap() {
            ClientEvent::CodeUpdate(data) => {
                assert_eq!(data.base_version, 3);
                assert_eq!(data.ops.len(), 1);
            }
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_is_none() {
        let frame = Frame {
            event: "room:teleport".into(),
            data: json!({}),
        };
        assert!(ClientEvent::parse(frame).unwrap().is_none());
    }

    #[test]
    fn test_malformed_known_event_is_error() {
        let frame = Frame {
            event: "code:update".into(),
            data: json!({"roomId": "abc"}),
        };
        assert!(ClientEvent::parse(frame).is_err());
    }

    #[test]
    fn test_video_events_pass_through() {
        let frame = Frame {
            event: "video:ice-candidate".into(),
            data: json!({"roomId": "abc", "candidate": {"sdpMid": "0"}}),
        };
        match ClientEvent::parse(frame).unwrap().unwrap() {
            ClientEvent::Video {
                room_id,
                kind,
                payload,
            } => {
                assert_eq!(room_id, "abc");
                assert_eq!(kind, "ice-candidate");
                assert_eq!(payload["candidate"]["sdpMid"], "0");
            }
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[test]
    fn test_server_event_frame_shape() {
        let event = ServerEvent::UserLeft {
            room_id: "abc".into(),
            user_id: Uuid::nil(),
        };
        let frame = event.into_frame();
        assert_eq!(frame.event, "room:user-left");
        assert_eq!(frame.data["roomId"], "abc");
        assert_eq!(
            frame.data["userId"],
            "00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_video_frame_keeps_payload_and_tags_sender() {
        let sender = Uuid::new_v4();
        let event = ServerEvent::Video {
            room_id: "abc".into(),
            kind: "offer".into(),
            from_user: sender,
            payload: json!({"roomId": "abc", "sdp": "v=0"}),
        };
        let frame = event.into_frame();
        assert_eq!(frame.event, "video:offer");
        assert_eq!(frame.data["sdp"], "v=0");
        assert_eq!(frame.data["fromUser"], sender.to_string());
    }

    #[test]
    fn test_execution_result_field_names() {
        let event = ServerEvent::ExecutionResult {
            room_id: "abc".into(),
            execution_id: Uuid::nil(),
            status: crate::models::ExecutionStatus::Completed,
            stdout: "Hello World\n".into(),
            stderr: String::new(),
            exit_code: 0,
            execution_time: 15,
            memory_used: 0,
        };
        let frame = event.into_frame();
        assert_eq!(frame.event, "code:execution-result");
        assert_eq!(frame.data["status"], "completed");
        assert_eq!(frame.data["stdout"], "Hello World\n");
        assert_eq!(frame.data["executionTime"], 15);
        assert_eq!(frame.data["exitCode"], 0);
    }
}
