//! Error types for handle-socket
//!
//! Construction and setup failures are reported through [`Error`]. Failures
//! of an established socket (a read or write that went wrong) are not
//! errors in this sense: they reach the consumer as a
//! [`CloseReason`](crate::consumer::CloseReason).

use crate::engine::ChannelRole;
use thiserror::Error;

/// Result type alias using handle-socket's error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for handle-socket
#[derive(Error, Debug)]
pub enum Error {
    /// The engine refused to start a channel for one of the handles
    #[error("failed to open {role} channel: {source}")]
    ChannelOpen {
        role: ChannelRole,
        #[source]
        source: std::io::Error,
    },

    /// Configuration errors
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Spawning a local command failed
    #[error("failed to spawn command: {0}")]
    Spawn(#[source] std::io::Error),

    /// The socket's mailbox has no senders left and nothing will arrive
    #[error("socket mailbox disconnected")]
    Disconnected,
}

/// Configuration loading and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("failed to parse config: {0}")]
    ParseFailed(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}
