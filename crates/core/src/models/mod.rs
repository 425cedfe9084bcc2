//! Data models for Spinroom

mod chat;
mod participant;
mod room;
mod spin;
mod wheel;

pub use chat::*;
pub use participant::*;
pub use room::*;
pub use spin::*;
pub use wheel::*;
