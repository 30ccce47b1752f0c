//! Cron error types.

use deckhand_plan::PlanError;
use deckhand_state::StateError;
use thiserror::Error;

/// Result type alias for cron operations.
pub type CronResult<T> = Result<T, CronError>;

#[derive(Debug, Error)]
pub enum CronError {
    #[error("invalid cron expression {expression:?}: {reason}")]
    InvalidSchedule { expression: String, reason: String },

    #[error("invalid plan template for cron job {job}: {source}")]
    Template {
        job: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("repository error: {0}")]
    Repository(#[from] StateError),
}
