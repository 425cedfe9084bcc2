//! Chat event model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatKind {
    Message,
    Emoji,
    System,
}

/// An immutable entry in a room's message stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub id: Uuid,
    pub room_id: Uuid,
    /// Absent for system events
    pub author_id: Option<Uuid>,
    pub nickname: Option<String>,
    pub content: String,
    pub kind: ChatKind,
    pub created_at: DateTime<Utc>,
}

impl ChatEvent {
    pub fn message(room_id: Uuid, author_id: Uuid, nickname: String, content: String) -> Self {
        Self::authored(room_id, author_id, nickname, content, ChatKind::Message)
    }

    pub fn emoji(room_id: Uuid, author_id: Uuid, nickname: String, emoji: String) -> Self {
        Self::authored(room_id, author_id, nickname, emoji, ChatKind::Emoji)
    }

    pub fn system(room_id: Uuid, content: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id,
            author_id: None,
            nickname: None,
            content,
            kind: ChatKind::System,
            created_at: Utc::now(),
        }
    }

    fn authored(
        room_id: Uuid,
        author_id: Uuid,
        nickname: String,
        content: String,
        kind: ChatKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            room_id,
            author_id: Some(author_id),
            nickname: Some(nickname),
            content,
            kind,
            created_at: Utc::now(),
        }
    }

    pub fn format_timestamp(&self) -> String {
        self.created_at.format("%H:%M").to_string()
    }
}

/// A chat event together with its position in the authoritative stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEntry {
    pub position: u64,
    pub event: ChatEvent,
}
