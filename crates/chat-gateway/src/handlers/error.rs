//! Handler error types
//!
//! These errors end the connection. Rejections of individual client events
//! are reported as `error` events instead, see [`super::EventRouter`].

use chat_common::AppError;
use chat_core::{CloseCode, DomainError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    /// Invalid payload received
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Event sent before Identify
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Identify sent twice
    #[error("Already authenticated")]
    AlreadyAuthenticated,

    /// Domain error outside an event (e.g. loading the ready payload)
    #[error("Domain error: {0}")]
    DomainError(#[from] DomainError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HandlerError {
    /// Convert to a close code
    pub fn to_close_code(&self) -> CloseCode {
        match self {
            Self::InvalidPayload(_) => CloseCode::DecodeError,
            Self::AuthenticationFailed(_) => CloseCode::AuthenticationFailed,
            Self::NotAuthenticated => CloseCode::NotAuthenticated,
            Self::AlreadyAuthenticated => CloseCode::AlreadyAuthenticated,
            Self::DomainError(_) | Self::Internal(_) => CloseCode::UnknownError,
        }
    }
}

impl From<AppError> for HandlerError {
    fn from(err: AppError) -> Self {
        let detail = format!("{}: {err}", err.error_code());
        if err.is_auth_error() {
            Self::AuthenticationFailed(detail)
        } else {
            Self::Internal(detail)
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("Failed to encode payload: {err}"))
    }
}

/// Handler result type
pub type HandlerResult<T> = Result<T, HandlerError>;
