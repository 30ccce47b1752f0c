//! Cron expression handling.
//!
//! Jobs store classic five-field expressions (`min hour dom mon dow`);
//! six- and seven-field forms with a leading seconds column are accepted
//! as-is.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use deckhand_state::CronJob;

use crate::error::{CronError, CronResult};

pub fn parse_schedule(expression: &str) -> CronResult<Schedule> {
    let trimmed = expression.trim();
    let fields = trimmed.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    };
    Schedule::from_str(&normalized).map_err(|e| CronError::InvalidSchedule {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// First fire time strictly after `after`.
pub fn next_fire(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

/// A job is due when its next fire time after `last_run` has passed.
/// A job that never ran is measured from the epoch, so it is due at once.
pub fn is_due(job: &CronJob, now: DateTime<Utc>) -> CronResult<bool> {
    let schedule = parse_schedule(&job.schedule)?;
    let since = job.last_run.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    Ok(next_fire(&schedule, since).is_some_and(|at| at <= now))
}
