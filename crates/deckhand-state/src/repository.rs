//! Storage abstraction shared by the planner, orchestrator, cron trigger
//! and API.
//!
//! [`StateStore`] (redb) is the embedded backend; [`PgRepository`](crate::PgRepository)
//! talks to a shared PostgreSQL database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deckhand_blob::BlobLocation;

use crate::error::StateResult;
use crate::store::{DuePredicate, StateStore};
use crate::types::*;

/// Backend for reference data, deployments and cron jobs.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Environment with the given unique name.
    async fn environment_by_name(&self, name: &str) -> StateResult<Option<Environment>>;

    async fn namespaces_for_environment(&self, environment_id: &str) -> StateResult<Vec<Namespace>>;

    /// Artifact of `kind` named `name`, restricted to artifacts referenced by
    /// an entity in one of the environment's namespaces.
    async fn artifact_by_name(
        &self,
        environment_id: &str,
        kind: ArtifactKind,
        name: &str,
    ) -> StateResult<Option<Artifact>>;

    /// Every (artifact, requested version) pair entities of the matching
    /// kind in the given namespaces ask for, deduplicated in first-seen order.
    async fn artifacts_for_namespaces(
        &self,
        kind: ArtifactKind,
        namespace_ids: &[NamespaceId],
    ) -> StateResult<Vec<ArtifactRequirement>>;

    async fn live_entities(&self, namespace_id: &str, kind: EntityKind) -> StateResult<Vec<Entity>>;

    async fn set_deployed_version(
        &self,
        namespace_id: &str,
        kind: EntityKind,
        entity_id: &str,
        version: &str,
    ) -> StateResult<()>;

    async fn insert_deployment(&self, deployment: &Deployment) -> StateResult<()>;

    async fn deployment(&self, id: &str) -> StateResult<Option<Deployment>>;

    /// Newest first.
    async fn deployments_for_environment(&self, environment_id: &str) -> StateResult<Vec<Deployment>>;

    async fn record_message_id(&self, id: &str, message_id: &str) -> StateResult<()>;

    async fn record_receipt(&self, id: &str, receipt_token: &str) -> StateResult<()>;

    /// Move a deployment forward. Returns `InvalidTransition` for anything
    /// but a forward step.
    async fn transition_deployment(
        &self,
        id: &str,
        to: DeploymentState,
        plan_location: Option<&BlobLocation>,
    ) -> StateResult<Deployment>;

    async fn cron_jobs(&self) -> StateResult<Vec<CronJob>>;

    /// Atomically claim every idle, enabled job for which `is_due` holds.
    async fn lock_due_cron_jobs(
        &self,
        now: DateTime<Utc>,
        is_due: &DuePredicate,
    ) -> StateResult<Vec<CronJob>>;

    /// Link spawned deployments to a claimed job and release the claim.
    async fn commit_cron_batch(&self, cron_job_id: &str, deployment_ids: &[DeploymentId]) -> StateResult<()>;

    async fn unlock_cron_job(&self, cron_job_id: &str, last_run: Option<DateTime<Utc>>) -> StateResult<()>;

    /// Return finished batches and stale claims to `Idle`.
    async fn reconcile_cron_jobs(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StateResult<Vec<CronJobId>>;
}

#[async_trait]
impl Repository for StateStore {
    async fn environment_by_name(&self, name: &str) -> StateResult<Option<Environment>> {
        StateStore::environment_by_name(self, name)
    }

    async fn namespaces_for_environment(&self, environment_id: &str) -> StateResult<Vec<Namespace>> {
        StateStore::namespaces_for_environment(self, environment_id)
    }

    async fn artifact_by_name(
        &self,
        environment_id: &str,
        kind: ArtifactKind,
        name: &str,
    ) -> StateResult<Option<Artifact>> {
        StateStore::artifact_by_name(self, environment_id, kind, name)
    }

    async fn artifacts_for_namespaces(
        &self,
        kind: ArtifactKind,
        namespace_ids: &[NamespaceId],
    ) -> StateResult<Vec<ArtifactRequirement>> {
        StateStore::artifacts_for_namespaces(self, kind, namespace_ids)
    }

    async fn live_entities(&self, namespace_id: &str, kind: EntityKind) -> StateResult<Vec<Entity>> {
        self.entities_in_namespace(namespace_id, kind)
    }

    async fn set_deployed_version(
        &self,
        namespace_id: &str,
        kind: EntityKind,
        entity_id: &str,
        version: &str,
    ) -> StateResult<()> {
        StateStore::set_deployed_version(self, namespace_id, kind, entity_id, version)
    }

    async fn insert_deployment(&self, deployment: &Deployment) -> StateResult<()> {
        StateStore::insert_deployment(self, deployment)
    }

    async fn deployment(&self, id: &str) -> StateResult<Option<Deployment>> {
        self.get_deployment(id)
    }

    async fn deployments_for_environment(&self, environment_id: &str) -> StateResult<Vec<Deployment>> {
        StateStore::deployments_for_environment(self, environment_id)
    }

    async fn record_message_id(&self, id: &str, message_id: &str) -> StateResult<()> {
        StateStore::record_message_id(self, id, message_id)
    }

    async fn record_receipt(&self, id: &str, receipt_token: &str) -> StateResult<()> {
        StateStore::record_receipt(self, id, receipt_token)
    }

    async fn transition_deployment(
        &self,
        id: &str,
        to: DeploymentState,
        plan_location: Option<&BlobLocation>,
    ) -> StateResult<Deployment> {
        StateStore::transition_deployment(self, id, to, plan_location)
    }

    async fn cron_jobs(&self) -> StateResult<Vec<CronJob>> {
        self.list_cron_jobs()
    }

    async fn lock_due_cron_jobs(
        &self,
        now: DateTime<Utc>,
        is_due: &DuePredicate,
    ) -> StateResult<Vec<CronJob>> {
        StateStore::lock_due_cron_jobs(self, now, is_due)
    }

    async fn commit_cron_batch(&self, cron_job_id: &str, deployment_ids: &[DeploymentId]) -> StateResult<()> {
        StateStore::commit_cron_batch(self, cron_job_id, deployment_ids)
    }

    async fn unlock_cron_job(&self, cron_job_id: &str, last_run: Option<DateTime<Utc>>) -> StateResult<()> {
        StateStore::unlock_cron_job(self, cron_job_id, last_run)
    }

    async fn reconcile_cron_jobs(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StateResult<Vec<CronJobId>> {
        StateStore::reconcile_cron_jobs(self, now, stale_before)
    }
}
