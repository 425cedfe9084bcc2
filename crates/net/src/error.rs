//! Network error types

use std::io;

/// Network result type
pub type Result<T> = std::result::Result<T, Error>;

/// Network errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Missing or invalid bearer credential
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Transport-level failure establishing or keeping a channel
    #[error("Channel error: {0}")]
    Channel(String),

    /// The server refused the channel for a reason retrying will not fix
    #[error("Connection rejected: {0}")]
    Rejected(String),

    #[error("Not connected")]
    NotConnected,
}

impl Error {
    /// Whether reconnecting with backoff can succeed.
    ///
    /// Authentication failures count as recoverable: the credential may be
    /// refreshed between attempts.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Rejected(_))
    }
}
