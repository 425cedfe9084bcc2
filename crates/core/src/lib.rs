//! Spinroom Core Library
//!
//! Room, wheel and chat models, the deterministic spin algorithms, and the
//! authoritative per-room state shared by the server and the data service.

pub mod auth;
pub mod coordinator;
pub mod error;
pub mod hub;
pub mod invariants;
pub mod models;
pub mod registry;
pub mod rotation;
pub mod selection;
pub mod service;
pub mod stream;

pub use auth::{CredentialValidator, Identity, TokenRegistry};
pub use coordinator::{SpinCoordinator, SpinState};
pub use error::{Error, Result};
pub use hub::{lock_room, RoomHub, RoomState, DEFAULT_WHEEL_TITLE};
pub use models::*;
pub use registry::{JoinOutcome, LeaveOutcome, ParticipantRegistry, StatusChange};
pub use rotation::{normalize_angle, resolve_angle};
pub use selection::select;
pub use service::DataService;
pub use stream::{Backlog, MessageStream, DEFAULT_HISTORY_CAPACITY};
