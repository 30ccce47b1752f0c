//! deckhand-cron: recurring plan requests.
//!
//! Each [`CronJob`](deckhand_state::CronJob) carries a serialized
//! [`PlanRequest`](deckhand_plan::PlanRequest) and a cron expression.
//! [`CronTrigger::tick`] claims due jobs under the store's claim lock, hands
//! their templates to the plan generator and reconciles finished batches.
//!
//! The claim lock lives in a single store. Two daemons sharing one store
//! never run the same job twice; daemons on separate stores would.

pub mod error;
pub mod schedule;
pub mod trigger;

pub use error::{CronError, CronResult};
pub use schedule::{is_due, next_fire, parse_schedule};
pub use trigger::{CronConfig, CronTrigger, TickReport};
