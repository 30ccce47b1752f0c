//! Cron trigger loop.
//!
//! A tick claims every due, idle job in one store transaction, runs the
//! plan generator for each claimed job, then either links the spawned
//! deployments (job stays `Running`) or releases the claim. Running jobs
//! return to `Idle` once all their deployments complete.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use deckhand_metrics::Metrics;
use deckhand_plan::{PlanGenerator, PlanRequest};
use deckhand_state::{CronJob, CronJobId, DeploymentId, Repository};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{CronError, CronResult};
use crate::schedule::is_due;

/// Cron configuration (`[cron]` section).
#[derive(Debug, Clone, Deserialize)]
pub struct CronConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// A claim that never committed is released after this long.
    #[serde(default = "default_stale_lock_secs")]
    pub stale_lock_secs: u64,
}

fn default_tick_interval_secs() -> u64 {
    60
}

fn default_stale_lock_secs() -> u64 {
    600
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            stale_lock_secs: default_stale_lock_secs(),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Jobs that spawned deployments, with the ids they spawned.
    pub triggered: Vec<(CronJobId, Vec<DeploymentId>)>,
    /// Claimed jobs released straight back to `Idle`.
    pub released: Vec<CronJobId>,
    /// Jobs whose plan request failed or whose claim could not be settled.
    pub failed: Vec<CronJobId>,
    /// Running jobs returned to `Idle` by reconciliation.
    pub reconciled: Vec<CronJobId>,
}

/// How a claimed job was settled.
enum JobRun {
    Triggered(Vec<DeploymentId>),
    Released,
}

pub struct CronTrigger {
    repo: Arc<dyn Repository>,
    generator: Arc<PlanGenerator>,
    config: CronConfig,
    metrics: Arc<Metrics>,
}

impl CronTrigger {
    pub fn new(
        repo: Arc<dyn Repository>,
        generator: Arc<PlanGenerator>,
        config: CronConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            repo,
            generator,
            config,
            metrics,
        }
    }

    pub async fn tick(&self, now: DateTime<Utc>) -> CronResult<TickReport> {
        let due_now = move |job: &CronJob| match is_due(job, now) {
            Ok(due) => due,
            Err(e) => {
                warn!(cron_job_id = %job.id, error = %e, "skipping cron job");
                false
            }
        };
        let claimed = self.repo.lock_due_cron_jobs(now, &due_now).await?;

        let mut report = TickReport::default();
        for job in claimed {
            match self.run_job(&job, now).await {
                Ok(JobRun::Triggered(ids)) => report.triggered.push((job.id, ids)),
                Ok(JobRun::Released) => report.released.push(job.id),
                Err(e) => {
                    self.metrics.cron_failed();
                    error!(cron_job_id = %job.id, error = %e, "cron job failed");
                    report.failed.push(job.id);
                }
            }
        }

        let stale_before = now - chrono::Duration::seconds(self.config.stale_lock_secs as i64);
        report.reconciled = self.repo.reconcile_cron_jobs(now, stale_before).await?;
        self.metrics.cron_reconciled(report.reconciled.len());
        Ok(report)
    }

    /// Trigger one claimed job and settle its claim. A failure is reported
    /// against this job alone.
    async fn run_job(&self, job: &CronJob, now: DateTime<Utc>) -> CronResult<JobRun> {
        let ids = match self.trigger(job).await {
            Ok(ids) => ids,
            Err(e) => {
                if let Err(unlock) = self.repo.unlock_cron_job(&job.id, None).await {
                    warn!(cron_job_id = %job.id, error = %unlock, "cron claim not released");
                }
                return Err(e);
            }
        };

        if ids.is_empty() {
            // Nothing spawned means nothing would ever reconcile the job.
            self.repo.unlock_cron_job(&job.id, Some(now)).await?;
            info!(cron_job_id = %job.id, "cron job produced no deployments");
            return Ok(JobRun::Released);
        }

        if let Err(e) = self.repo.commit_cron_batch(&job.id, &ids).await {
            // The batch is already queued. Stamp the run so the job waits for
            // its next slot instead of being re-claimed as stale.
            if let Err(unlock) = self.repo.unlock_cron_job(&job.id, Some(now)).await {
                warn!(cron_job_id = %job.id, error = %unlock, "cron claim not released");
            }
            warn!(cron_job_id = %job.id, deployments = ?ids, "cron batch queued but not linked");
            return Err(e.into());
        }
        self.metrics.cron_triggered();
        info!(cron_job_id = %job.id, deployments = ids.len(), "cron job triggered");
        Ok(JobRun::Triggered(ids))
    }

    async fn trigger(&self, job: &CronJob) -> CronResult<Vec<DeploymentId>> {
        let mut request: PlanRequest =
            serde_json::from_value(job.plan_options.clone()).map_err(|source| CronError::Template {
                job: job.id.clone(),
                source,
            })?;
        if request.user.is_empty() {
            request.user = format!("cron:{}", job.id);
        }
        debug!(cron_job_id = %job.id, environment = %request.environment, "running cron plan");
        let outcome = self.generator.queue_plan(&request).await?;
        Ok(outcome.deployment_ids)
    }

    /// Tick every `tick_interval_secs` until `shutdown` flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.tick_interval_secs.max(1));
        info!(interval_secs = interval.as_secs(), "cron trigger started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!(error = %e, "cron tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("cron trigger shutting down");
                    break;
                }
            }
        }
    }
}
