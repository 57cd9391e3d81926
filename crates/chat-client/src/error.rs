//! Client error taxonomy

use thiserror::Error;

/// Errors surfaced by client operations
///
/// Mutating operations never fail because the server has not answered yet;
/// a missing confirmation shows up later as a failed timeline entry.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Credential missing or rejected at handshake; fatal to the session
    #[error("Authentication failed")]
    Unauthenticated,

    /// The transport is not connected; callers decide whether to retry
    #[error("Transport unavailable")]
    TransportUnavailable,

    /// An event referenced state this client does not know about
    #[error("Stale event: {0}")]
    StaleEvent(String),

    #[error("Message has been deleted")]
    MessageDeleted,

    /// Unknown or still unconfirmed message id
    #[error("Unknown message: {0}")]
    UnknownMessage(String),

    #[error("Unknown conversation: {0}")]
    UnknownConversation(String),

    /// Rejected locally before anything was sent
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("Connection error: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
}

impl ClientError {
    /// Check if retrying the same call cannot succeed
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthenticated)
    }

    /// Check if this error should be logged and otherwise ignored
    pub fn is_ignorable(&self) -> bool {
        matches!(self, Self::StaleEvent(_))
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
