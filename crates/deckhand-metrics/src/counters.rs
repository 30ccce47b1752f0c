//! Orchestration counters.
//!
//! Lock-free: every counter is a relaxed `AtomicU64`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::trace;

/// Counters shared by the planner, orchestrator, consumer and cron trigger.
#[derive(Debug, Default)]
pub struct Metrics {
    plans_queued: AtomicU64,
    plans_rejected: AtomicU64,
    deployments_queued: AtomicU64,
    deployments_scheduled: AtomicU64,
    deployments_completed: AtomicU64,
    deployments_noop: AtomicU64,
    callback_failures: AtomicU64,
    messages_handled: AtomicU64,
    message_failures: AtomicU64,
    message_timeouts: AtomicU64,
    cron_triggers: AtomicU64,
    cron_failures: AtomicU64,
    cron_reconciled: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub plans_queued: u64,
    pub plans_rejected: u64,
    pub deployments_queued: u64,
    pub deployments_scheduled: u64,
    pub deployments_completed: u64,
    pub deployments_noop: u64,
    pub callback_failures: u64,
    pub messages_handled: u64,
    pub message_failures: u64,
    pub message_timeouts: u64,
    pub cron_triggers: u64,
    pub cron_failures: u64,
    pub cron_reconciled: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A plan request produced `deployments` queued deployments.
    pub fn plan_queued(&self, deployments: usize) {
        self.plans_queued.fetch_add(1, Ordering::Relaxed);
        self.deployments_queued
            .fetch_add(deployments as u64, Ordering::Relaxed);
        trace!(deployments, "plan counted");
    }

    pub fn plan_rejected(&self) {
        self.plans_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn deployment_scheduled(&self) {
        self.deployments_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn deployment_completed(&self) {
        self.deployments_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Completed without an executor handoff (dry-run or nothing to deploy).
    pub fn deployment_noop(&self) {
        self.deployments_noop.fetch_add(1, Ordering::Relaxed);
        self.deployments_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn callback_failed(&self) {
        self.callback_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_handled(&self) {
        self.messages_handled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_failed(&self) {
        self.message_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_timed_out(&self) {
        self.message_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cron_triggered(&self) {
        self.cron_triggers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cron_failed(&self) {
        self.cron_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cron_reconciled(&self, jobs: usize) {
        self.cron_reconciled.fetch_add(jobs as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            plans_queued: self.plans_queued.load(Ordering::Relaxed),
            plans_rejected: self.plans_rejected.load(Ordering::Relaxed),
            deployments_queued: self.deployments_queued.load(Ordering::Relaxed),
            deployments_scheduled: self.deployments_scheduled.load(Ordering::Relaxed),
            deployments_completed: self.deployments_completed.load(Ordering::Relaxed),
            deployments_noop: self.deployments_noop.load(Ordering::Relaxed),
            callback_failures: self.callback_failures.load(Ordering::Relaxed),
            messages_handled: self.messages_handled.load(Ordering::Relaxed),
            message_failures: self.message_failures.load(Ordering::Relaxed),
            message_timeouts: self.message_timeouts.load(Ordering::Relaxed),
            cron_triggers: self.cron_triggers.load(Ordering::Relaxed),
            cron_failures: self.cron_failures.load(Ordering::Relaxed),
            cron_reconciled: self.cron_reconciled.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_handle_is_zeroed() {
        assert_eq!(Metrics::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn plan_counts_its_deployments() {
        let metrics = Metrics::new();
        metrics.plan_queued(3);
        metrics.plan_queued(2);
        metrics.plan_rejected();

        let s = metrics.snapshot();
        assert_eq!(s.plans_queued, 2);
        assert_eq!(s.deployments_queued, 5);
        assert_eq!(s.plans_rejected, 1);
    }

    #[test]
    fn noop_also_counts_as_completed() {
        let metrics = Metrics::new();
        metrics.deployment_noop();
        metrics.deployment_completed();

        let s = metrics.snapshot();
        assert_eq!(s.deployments_noop, 1);
        assert_eq!(s.deployments_completed, 2);
    }
}
