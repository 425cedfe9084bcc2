//! Participant and role models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a participant inside a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomRole {
    /// Controls the wheel. Exactly one per non-empty room.
    Host,
    Player,
    Spectator,
}

impl RoomRole {
    pub fn display_name(&self) -> &'static str {
        match self {
            RoomRole::Host => "Host",
            RoomRole::Player => "Player",
            RoomRole::Spectator => "Spectator",
        }
    }

    pub fn can_spin(&self) -> bool {
        *self == RoomRole::Host
    }
}

impl std::fmt::Display for RoomRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// A member of a room.
///
/// `version` is the registry version of the last change to this participant.
/// It only ever grows, so clients can discard stale updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: Uuid,
    pub nickname: String,
    pub role: RoomRole,
    pub status: PresenceStatus,
    pub joined_at: DateTime<Utc>,
    pub version: u64,
}

impl Participant {
    pub fn is_host(&self) -> bool {
        self.role == RoomRole::Host
    }

    pub fn is_online(&self) -> bool {
        self.status == PresenceStatus::Online
    }
}
