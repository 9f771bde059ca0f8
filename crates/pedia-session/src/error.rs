//! Session-specific error types.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during session operations.
///
/// Storage failures never appear here: persistence is best-effort and
/// absorbed by the store, so callers only see lookup and validation
/// failures.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {id}")]
    NotFound { id: Uuid },

    #[error("Message not found: {message_id} in session {session_id}")]
    MessageNotFound { session_id: Uuid, message_id: Uuid },

    #[error("Invalid import payload: {message}")]
    Validation { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<SessionError> for pedia_types::PediaError {
    fn from(e: SessionError) -> Self {
        pedia_types::PediaError::Session(e.to_string())
    }
}
