//! Error types
//!
//! `LlmuxError` covers everything the runtime can report to a caller.
//! `TransportError` is what a backend transport returns on a failed call; the
//! request broker retries on it and never surfaces it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmuxError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Chat not found: {0}")]
    ChatNotFound(String),

    #[error("Peer {peer} has not joined chat {chat}")]
    NotJoined { peer: String, chat: String },

    #[error("Chat {0} is a private chat and cannot be left")]
    PrivateChat(String),

    #[error("Device error: {0}")]
    DeviceError(String),

    #[error("Directive error: {0}")]
    DirectiveError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Request(err.to_string())
    }
}
