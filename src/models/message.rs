//! Chat messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Upper bound on a single chat message payload (bytes).
pub const CONTENT_MAX_BYTES: usize = 4096;

/// Kind of chat entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Ordinary user text.
    Text,
    /// Server-generated notice (joins, leaves, execution results).
    System,
    /// A shared code snippet.
    Code,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::System => "system",
            MessageKind::Code => "code",
        }
    }
}

impl std::str::FromStr for MessageKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "system" => Ok(MessageKind::System),
            "code" => Ok(MessageKind::Code),
            other => Err(AppError::Validation(format!("unknown message kind {other}"))),
        }
    }
}

/// A persisted chat message, insertion-ordered per room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub room_id: String,
    /// None for system notices.
    pub author_id: Option<Uuid>,
    pub author_name: Option<String>,
    pub content: String,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
}

/// Input for appending a chat message.
#[derive(Debug, Clone)]
pub struct NewChatMessage {
    pub room_id: String,
    pub author_id: Option<Uuid>,
    pub content: String,
    pub kind: MessageKind,
}

impl NewChatMessage {
    pub fn validate(&self) -> AppResult<()> {
        if self.content.trim().is_empty() {
            return Err(AppError::Validation("message content is empty".into()));
        }
        if self.content.len() > CONTENT_MAX_BYTES {
            return Err(AppError::Validation(format!(
                "message exceeds {CONTENT_MAX_BYTES} bytes"
            )));
        }
        if self.kind != MessageKind::System && self.author_id.is_none() {
            return Err(AppError::Validation(
                "non-system messages require an author".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_content() {
        let msg = NewChatMessage {
            room_id: "r".into(),
            author_id: Some(Uuid::new_v4()),
            content: "  ".into(),
            kind: MessageKind::Text,
        };
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_rejects_oversized_content() {
        let msg = NewChatMessage {
            room_id: "r".into(),
            author_id: Some(Uuid::new_v4()),
            content: "x".repeat(CONTENT_MAX_BYTES + 1),
            kind: MessageKind::Text,
        };
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_system_messages_need_no_author() {
        let msg = NewChatMessage {
            room_id: "r".into(),
            author_id: None,
            content: "alice joined".into(),
            kind: MessageKind::System,
        };
        assert!(msg.validate().is_ok());
    }
}
