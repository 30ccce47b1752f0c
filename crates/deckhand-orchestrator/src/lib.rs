//! deckhand-orchestrator: moves deployments through the queue exchange.
//!
//! # Flow
//!
//! ```text
//! primary queue ── schedule-deployment (deploy-<ns>) ──► Orchestrator::schedule
//!                                                          ├── matcher: live entities × definitions
//!                                                          ├── BlobStore::upload(plan)
//!                                                          └── executor-<cluster> ◄── BlobLocation
//! primary queue ── update-deployment (update-<ns>) ────► Orchestrator::update
//!                                                          ├── BlobStore::download(plan)
//!                                                          ├── Repository::set_deployed_version
//!                                                          └── delete schedule request (lane released)
//! ```
//!
//! Callbacks are fired after both steps and never fail a deployment.

pub mod callback;
pub mod error;
pub mod matcher;
pub mod orchestrator;

pub use callback::{Callback, CallbackConfig, CallbackError, HttpCallback};
pub use error::{OrchestratorError, OrchestratorResult};
pub use matcher::build_execution_plan;
pub use orchestrator::{Orchestrator, QueueNames, ScheduleOutcome, UpdateOutcome};
