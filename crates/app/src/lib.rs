//! Spinroom client side: synchronized room sessions, their projections, and
//! the configuration and CLI used by the `spinroom` binary.

pub mod cli;
pub mod config;
pub mod demo;
pub mod error;
pub mod serve;
pub mod session;
pub mod store;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use session::{LinkState, RoomSession, SessionEvent, SessionOptions};
pub use store::ClientStateStore;
