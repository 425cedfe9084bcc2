//! Application error types

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Config parse error: {0}")]
    ConfigParse(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Data service call failed; projections are left untouched
    #[error("Data service error: {0}")]
    DataService(#[from] spinroom_core::Error),

    #[error("Network error: {0}")]
    Network(#[from] spinroom_net::Error),

    #[error("Room has no active wheel")]
    NoActiveWheel,

    #[error("Session closed")]
    SessionClosed,
}
