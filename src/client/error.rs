use crate::common::stomp::FrameError;
use thiserror::Error;

/// Failures of the persistent connection. They feed the reconnect loop and
/// are never fatal to the session.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Connection closed during handshake")]
    Disconnected,
    #[error("Invalid frame: {0}")]
    InvalidFrame(#[from] FrameError),
    #[error("Operation timed out")]
    Timeout,
}

/// Non-success answer from the snapshot service. The message is meant to be
/// shown inline to the user.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SnapshotError {
    #[error("{message} (HTTP {status})")]
    Status { status: u16, message: String },
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for SnapshotError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SnapshotError::Decode(err.to_string())
        } else {
            SnapshotError::Request(err.to_string())
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("Message is empty")]
    EmptyMessage,
    #[error("No conversation is open")]
    NoActiveConversation,
}
