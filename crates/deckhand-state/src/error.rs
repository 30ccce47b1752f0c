//! Error types for the Deckhand state store.

use thiserror::Error;

use crate::types::DeploymentState;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("deployment {id}: cannot transition from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: DeploymentState,
        to: DeploymentState,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
