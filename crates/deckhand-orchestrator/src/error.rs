//! Orchestrator error types.

use deckhand_blob::BlobError;
use deckhand_plan::ErrorKind;
use deckhand_queue::QueueError;
use deckhand_state::StateError;
use thiserror::Error;

/// Result type alias for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("deployment not found: {0}")]
    DeploymentNotFound(String),

    #[error("unexpected command {command} on queue {queue}")]
    UnexpectedCommand { command: String, queue: String },

    #[error("repository error: {0}")]
    Repository(#[from] StateError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("blob error: {0}")]
    Blob(#[from] BlobError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::DeploymentNotFound(_) => ErrorKind::NotFound,
            OrchestratorError::UnexpectedCommand { .. } => ErrorKind::BadRequest,
            _ => ErrorKind::Unexpected,
        }
    }
}
