//! deckhand-metrics: observability handle for Deckhand.
//!
//! A single [`Metrics`] value is created by the daemon and passed as an
//! `Arc<Metrics>` to every component that counts something. Nothing here
//! is global.
//!
//! # Architecture
//!
//! ```text
//! Metrics
//!   ├── plan_queued() / deployment_scheduled() / ... ← called by components
//!   └── snapshot() → MetricsSnapshot
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod counters;
pub mod prometheus;

pub use counters::{Metrics, MetricsSnapshot};
pub use prometheus::render_prometheus;
