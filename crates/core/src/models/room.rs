//! Room model - the joinable session container

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Participant;

/// Length of a room join code
pub const JOIN_CODE_LEN: usize = 6;

/// Join code alphabet. Uppercase only so lookups can normalize case.
const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomStatus {
    Active,
    Ended,
}

/// Snapshot of a room as returned by the data service.
///
/// `version` is the participant registry version the snapshot was taken at.
/// Clients use it as a floor: any participant event at or below it is
/// already reflected in `participants`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub visibility: Visibility,
    pub status: RoomStatus,
    pub owner_id: Uuid,
    pub host_id: Option<Uuid>,
    pub participants: Vec<Participant>,
    pub active_wheel_id: Option<Uuid>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Room {
    pub fn is_active(&self) -> bool {
        self.status == RoomStatus::Active
    }

    pub fn participant(&self, user_id: Uuid) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }
}

/// Generate a random join code
pub fn generate_join_code() -> String {
    let mut rng = rand::thread_rng();
    (0..JOIN_CODE_LEN)
        .map(|_| JOIN_CODE_ALPHABET[rng.gen_range(0..JOIN_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Normalize user-entered join codes for lookup
pub fn normalize_join_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_code_shape() {
        let code = generate_join_code();
        assert_eq!(code.len(), JOIN_CODE_LEN);
        assert!(code.bytes().all(|b| JOIN_CODE_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_normalize_join_code() {
        assert_eq!(normalize_join_code("  ab3xyz "), "AB3XYZ");
    }
}
