//! Client state store
//!
//! Three projections, one per channel, each built only from events of its
//! own channel. Applying an event is deterministic and idempotent; the
//! presentation layer reads from here and nowhere else.

mod chat;
mod room;
mod wheel;

pub use chat::ChatProjection;
pub use room::RoomProjection;
pub use wheel::{SpinPhase, SpinRecord, WheelProjection, WheelView};

use spinroom_net::{Channel, Event};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientStateStore {
    pub room: RoomProjection,
    pub wheel: WheelProjection,
    pub chat: ChatProjection,
}

impl ClientStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route an event to its projection. Error events are never applied.
    pub fn apply(&mut self, event: &Event) -> bool {
        match event {
            Event::Room(e) => self.room.apply(e),
            Event::Wheel(e) => self.wheel.apply(e),
            Event::Chat(e) => self.chat.apply(e),
            Event::Error { .. } => false,
        }
    }

    /// Apply an event received on `channel`, dropping it if it belongs
    /// elsewhere
    pub fn apply_from(&mut self, channel: Channel, event: &Event) -> bool {
        event.belongs_to(channel) && self.apply(event)
    }
}
