//! Network protocol message types
//!
//! All messages are JSON-serialized and length-prefixed on the wire. Every
//! connection is bound to one logical channel of one room during the
//! handshake; afterwards only commands and broadcasts of that channel are
//! accepted on it.

use serde::{Deserialize, Serialize};
use spinroom_core::{
    ChatKind, Participant, PresenceStatus, RoomRole, Segment, SpinResult, StreamEntry,
};
use uuid::Uuid;

/// The three independent streams of a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Presence and membership
    Room,
    /// Spins and wheel edits
    Wheel,
    /// Messages and reactions
    Chat,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Room, Channel::Wheel, Channel::Chat];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Room => "room",
            Channel::Wheel => "wheel",
            Channel::Chat => "chat",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a handshake was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Unauthorized,
    UnknownRoom,
    RoomEnded,
    Full,
    Protocol,
}

/// Client -> server on the room channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum RoomCommand {
    JoinRoom { user_id: Uuid, nickname: String },
    LeaveRoom { user_id: Uuid },
}

/// Server -> clients on the room channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum RoomBroadcast {
    ParticipantJoined {
        participant: Participant,
    },
    ParticipantLeft {
        user_id: Uuid,
        nickname: String,
        version: u64,
    },
    ParticipantStatusChanged {
        user_id: Uuid,
        status: PresenceStatus,
        version: u64,
    },
    /// Host reassignment after the previous host left
    ParticipantRoleChanged {
        user_id: Uuid,
        role: RoomRole,
        version: u64,
    },
}

/// Client -> server on the wheel channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum WheelCommand {
    Spin { wheel_id: Uuid, seed: u64 },
}

/// Server -> clients on the wheel channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum WheelBroadcast {
    SpinStarted {
        spin_id: Uuid,
        seed: u64,
        spinner_nickname: String,
    },
    SpinResult {
        result: SpinResult,
    },
    SpinEnded {
        spin_id: Uuid,
    },
    WheelUpdated {
        wheel_id: Uuid,
        title: String,
        revision: u64,
        segments: Vec<Segment>,
    },
}

/// Client -> server on the chat channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ChatCommand {
    SendMessage { content: String, nickname: String },
    SendEmoji { emoji: String, nickname: String },
    /// Ask for every event after `position`
    Since { position: u64 },
}

/// Server -> clients on the chat channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ChatBroadcast {
    NewMessage { entry: StreamEntry },
    EmojiReaction { entry: StreamEntry },
    /// Reply to `since`, sent to the requester only
    Backlog { entries: Vec<StreamEntry>, complete: bool },
}

impl ChatBroadcast {
    /// Broadcast variant matching an entry's kind
    pub fn for_entry(entry: StreamEntry) -> Self {
        match entry.event.kind {
            ChatKind::Emoji => ChatBroadcast::EmojiReaction { entry },
            _ => ChatBroadcast::NewMessage { entry },
        }
    }
}

/// A command on any channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "body", rename_all = "lowercase")]
pub enum Command {
    Room(RoomCommand),
    Wheel(WheelCommand),
    Chat(ChatCommand),
}

impl Command {
    pub fn channel(&self) -> Channel {
        match self {
            Command::Room(_) => Channel::Room,
            Command::Wheel(_) => Channel::Wheel,
            Command::Chat(_) => Channel::Chat,
        }
    }
}

/// A broadcast on any channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "body", rename_all = "lowercase")]
pub enum Event {
    Room(RoomBroadcast),
    Wheel(WheelBroadcast),
    Chat(ChatBroadcast),
    /// Validation failure, delivered to the originating connection only
    Error { message: String },
}

impl Event {
    /// Channel the event belongs to; `None` for errors, valid anywhere
    pub fn channel(&self) -> Option<Channel> {
        match self {
            Event::Room(_) => Some(Channel::Room),
            Event::Wheel(_) => Some(Channel::Wheel),
            Event::Chat(_) => Some(Channel::Chat),
            Event::Error { .. } => None,
        }
    }

    /// True if this event may arrive on a connection bound to `channel`
    pub fn belongs_to(&self, channel: Channel) -> bool {
        self.channel().map_or(true, |c| c == channel)
    }
}

/// Network protocol messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// First frame from a client: bind this connection to a room channel
    Hello {
        channel: Channel,
        room_id: Uuid,
        token: String,
    },

    /// Server accepts the handshake
    Welcome {
        channel: Channel,
        room_id: Uuid,
        user_id: Uuid,
        nickname: String,
    },

    /// Server rejects the handshake and closes the connection
    Rejected { reason: RejectReason, message: String },

    Command(Command),

    Event(Event),

    /// Liveness check from the server
    Ping,

    /// Reply to ping
    Pong,

    /// Server is shutting down
    ServerShutdown,
}

impl Message {
    /// Serialize message to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use spinroom_core::ChatEvent;

    #[test]
    fn test_wire_names() {
        let msg = Message::Command(Command::Wheel(WheelCommand::Spin {
            wheel_id: Uuid::nil(),
            seed: 7,
        }));
        let json: serde_json::Value = serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();

        assert_eq!(json["type"], "Command");
        assert_eq!(json["channel"], "wheel");
        assert_eq!(json["body"]["event"], "spin");
        assert_eq!(json["body"]["seed"], 7);
    }

    #[test]
    fn test_spin_result_survives_the_wire() {
        let result = SpinResult {
            id: Uuid::new_v4(),
            room_id: Uuid::new_v4(),
            wheel_id: Uuid::new_v4(),
            segment_id: Uuid::new_v4(),
            result: "Prize 3".into(),
            seed: 12345,
            spinner_id: Uuid::new_v4(),
            spinner_nickname: "alice".into(),
            rotation: 135.0,
            spun_at: Utc::now(),
        };
        let msg = Message::Event(Event::Wheel(WheelBroadcast::SpinResult {
            result: result.clone(),
        }));

        match Message::from_bytes(&msg.to_bytes().unwrap()).unwrap() {
            Message::Event(Event::Wheel(WheelBroadcast::SpinResult { result: decoded })) => {
                assert_eq!(decoded, result)
            }
            other => panic!("Wrong message type: {:?}", other),
        }
    }

    #[test]
    fn test_event_channel_membership() {
        let joined = Event::Room(RoomBroadcast::ParticipantLeft {
            user_id: Uuid::nil(),
            nickname: "bob".into(),
            version: 3,
        });
        assert!(joined.belongs_to(Channel::Room));
        assert!(!joined.belongs_to(Channel::Chat));

        let error = Event::Error {
            message: "nope".into(),
        };
        assert!(Channel::ALL.iter().all(|c| error.belongs_to(*c)));
    }

    #[test]
    fn test_emoji_entries_become_reactions() {
        let entry = StreamEntry {
            position: 4,
            event: ChatEvent::emoji(Uuid::nil(), Uuid::nil(), "bob".into(), "🎉".into()),
        };
        assert!(matches!(
            ChatBroadcast::for_entry(entry),
            ChatBroadcast::EmojiReaction { .. }
        ));
    }
}
