//! Plan generation errors and the shared error taxonomy.

use deckhand_queue::QueueError;
use deckhand_state::StateError;
use thiserror::Error;

use crate::resolver::ResolveError;

/// Result type alias for plan operations.
pub type PlanResult<T> = Result<T, PlanError>;

/// Coarse class of an error, as surfaced to callers (404 / 400 / 500).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    Unexpected,
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Carries the informational messages gathered before the rejection.
    #[error("bad request: {message}")]
    BadRequest {
        message: String,
        messages: Vec<String>,
    },

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl PlanError {
    pub fn bad_request(message: impl Into<String>, messages: Vec<String>) -> Self {
        PlanError::BadRequest {
            message: message.into(),
            messages,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PlanError::NotFound(_) => ErrorKind::NotFound,
            PlanError::BadRequest { .. } => ErrorKind::BadRequest,
            PlanError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    /// Informational messages attached to a rejection.
    pub fn messages(&self) -> &[String] {
        match self {
            PlanError::BadRequest { messages, .. } => messages,
            _ => &[],
        }
    }
}

impl From<StateError> for PlanError {
    fn from(e: StateError) -> Self {
        PlanError::Unexpected(format!("repository: {e}"))
    }
}

impl From<QueueError> for PlanError {
    fn from(e: QueueError) -> Self {
        PlanError::Unexpected(format!("queue: {e}"))
    }
}

impl From<serde_json::Error> for PlanError {
    fn from(e: serde_json::Error) -> Self {
        PlanError::Unexpected(format!("serialization: {e}"))
    }
}

impl From<ResolveError> for PlanError {
    fn from(e: ResolveError) -> Self {
        PlanError::Unexpected(format!("resolver: {e}"))
    }
}
