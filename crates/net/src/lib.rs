//! Spinroom Network Library
//!
//! Realtime TCP channels between room clients and the authoritative server.
//!
//! # Architecture
//!
//! - **Server**: Owns the room hub, applies commands, fans out canonical events
//! - **ChannelClient**: One connection bound to one channel of one room
//! - **Protocol**: Length-prefixed JSON messages
//!
//! Each room exposes three independent channels (room, wheel, chat). No
//! ordering holds across channels; within a channel events arrive in the
//! order the server produced them.
//!
//! # Usage
//!
//! ```ignore
//! let server = Server::start(addr, hub, credentials, ServerOptions::default()).await?;
//!
//! let mut wheel = ChannelClient::connect(server.addr(), Channel::Wheel, room_id, &token).await?;
//! wheel.send(Command::Wheel(WheelCommand::Spin { wheel_id, seed })).await?;
//!
//! while let Some(event) = wheel.next_event().await {
//!     match event {
//!         ChannelEvent::Event(Event::Wheel(WheelBroadcast::SpinResult { result })) => { /* render */ }
//!         _ => {}
//!     }
//! }
//! ```

pub mod backoff;
pub mod client;
pub mod error;
mod frame;
pub mod protocol;
pub mod server;

pub use backoff::Backoff;
pub use client::{ChannelClient, ChannelEvent, ConnectionState};
pub use error::{Error, Result};
pub use protocol::{
    Channel, ChatBroadcast, ChatCommand, Command, Event, Message, RejectReason, RoomBroadcast,
    RoomCommand, WheelBroadcast, WheelCommand,
};
pub use server::{Server, ServerOptions};

/// Default port for Spinroom servers
pub const DEFAULT_PORT: u16 = 7341;
