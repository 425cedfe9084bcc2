//! Error types for Spinroom Core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed segment set. Fatal to the spin request, not to the room.
    #[error("Invalid wheel: {0}")]
    InvalidWheel(String),

    #[error("Only the host can spin the wheel")]
    UnauthorizedSpin,

    #[error("A spin is already in progress")]
    SpinInProgress,

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Room has ended")]
    RoomEnded,
}

pub type Result<T> = std::result::Result<T, Error>;
