//! redb-backed state persistence for Deckhand.
//!
//! Provides typed operations over reference data, deployments and cron
//! jobs. All values are JSON-serialized into redb's `&[u8]` value columns.
//! The store supports both on-disk and in-memory backends (the latter for
//! testing and standalone mode).
//!
//! redb allows a single write transaction at a time per database, so every
//! read-modify-write below is atomic with respect to every other writer of
//! the same store. The cron claim lock relies on exactly that.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Predicate deciding whether a claimable cron job is due.
pub type DuePredicate = dyn Fn(&CronJob) -> bool + Send + Sync;

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for table in [
            ENVIRONMENTS,
            NAMESPACES,
            ARTIFACTS,
            ENTITIES,
            DEPLOYMENTS,
            CRON_JOBS,
            CRON_JOB_DEPLOYMENTS,
        ] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic helpers ────────────────────────────────────────────

    fn put_json<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = encode(value)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        match t.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Every value whose key starts with `prefix`, in key order.
    fn scan_json<T: DeserializeOwned>(&self, table: JsonTable, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                results.push(decode(value.value())?);
            }
        }
        Ok(results)
    }

    /// Read-modify-write a single record inside one write transaction.
    fn update_with<T, F>(&self, table: JsonTable, key: &str, f: F) -> StateResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T) -> StateResult<()>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record = {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            let mut record: T = match t.get(key).map_err(map_err!(Read))? {
                Some(guard) => decode(guard.value())?,
                None => return Err(StateError::NotFound(key.to_string())),
            };
            f(&mut record)?;
            let bytes = encode(&record)?;
            t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
            record
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(record)
    }

    // ── Reference data ─────────────────────────────────────────────

    /// Insert or update an environment.
    pub fn put_environment(&self, env: &Environment) -> StateResult<()> {
        self.put_json(ENVIRONMENTS, &env.id, env)
    }

    pub fn get_environment(&self, id: &str) -> StateResult<Option<Environment>> {
        self.get_json(ENVIRONMENTS, id)
    }

    /// Find an environment by its unique name.
    pub fn environment_by_name(&self, name: &str) -> StateResult<Option<Environment>> {
        let all: Vec<Environment> = self.scan_json(ENVIRONMENTS, "")?;
        Ok(all.into_iter().find(|e| e.name == name))
    }

    pub fn put_namespace(&self, ns: &Namespace) -> StateResult<()> {
        self.put_json(NAMESPACES, &ns.table_key(), ns)
    }

    /// All namespaces of an environment, in key order.
    pub fn namespaces_for_environment(&self, environment_id: &str) -> StateResult<Vec<Namespace>> {
        self.scan_json(NAMESPACES, &format!("{environment_id}/"))
    }

    pub fn put_artifact(&self, artifact: &Artifact) -> StateResult<()> {
        self.put_json(ARTIFACTS, &artifact.table_key(), artifact)
    }

    pub fn get_artifact(&self, kind: ArtifactKind, id: &str) -> StateResult<Option<Artifact>> {
        self.get_json(ARTIFACTS, &format!("{}/{id}", kind.as_str()))
    }

    pub fn put_entity(&self, entity: &Entity) -> StateResult<()> {
        self.put_json(ENTITIES, &entity.table_key(), entity)
    }

    pub fn get_entity(
        &self,
        namespace_id: &str,
        kind: EntityKind,
        id: &str,
    ) -> StateResult<Option<Entity>> {
        self.get_json(ENTITIES, &entity_key(namespace_id, kind, id))
    }

    /// Live entities of one kind inside a namespace.
    pub fn entities_in_namespace(
        &self,
        namespace_id: &str,
        kind: EntityKind,
    ) -> StateResult<Vec<Entity>> {
        self.scan_json(ENTITIES, &format!("{namespace_id}/{}/", kind.as_str()))
    }

    /// Persist the version an entity now runs. Reapplying the same value is harmless.
    pub fn set_deployed_version(
        &self,
        namespace_id: &str,
        kind: EntityKind,
        entity_id: &str,
        version: &str,
    ) -> StateResult<()> {
        let key = entity_key(namespace_id, kind, entity_id);
        self.update_with(ENTITIES, &key, |entity: &mut Entity| {
            entity.deployed_version = Some(version.to_string());
            Ok(())
        })?;
        debug!(%key, %version, "deployed version recorded");
        Ok(())
    }

    /// Artifact ids referenced by entities of `kind` in the given namespaces,
    /// deduplicated in first-seen order.
    fn referenced_artifact_ids(
        &self,
        kind: ArtifactKind,
        namespace_ids: &[NamespaceId],
    ) -> StateResult<Vec<ArtifactId>> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for ns in namespace_ids {
            for entity in self.entities_in_namespace(ns, kind.entity_kind())? {
                if seen.insert(entity.artifact_id.clone()) {
                    ids.push(entity.artifact_id);
                }
            }
        }
        Ok(ids)
    }

    /// Look up an artifact by name, restricted to artifacts the environment uses.
    pub fn artifact_by_name(
        &self,
        environment_id: &str,
        kind: ArtifactKind,
        name: &str,
    ) -> StateResult<Option<Artifact>> {
        let namespace_ids: Vec<NamespaceId> = self
            .namespaces_for_environment(environment_id)?
            .into_iter()
            .map(|ns| ns.id)
            .collect();
        let used: HashSet<ArtifactId> = self
            .referenced_artifact_ids(kind, &namespace_ids)?
            .into_iter()
            .collect();

        let candidates: Vec<Artifact> = self.scan_json(ARTIFACTS, &format!("{}/", kind.as_str()))?;
        Ok(candidates
            .into_iter()
            .find(|a| a.name == name && used.contains(&a.id)))
    }

    /// Every (artifact, requested version) pair live entities of `kind` in
    /// the given namespaces ask for, deduplicated in first-seen order.
    pub fn artifacts_for_namespaces(
        &self,
        kind: ArtifactKind,
        namespace_ids: &[NamespaceId],
    ) -> StateResult<Vec<ArtifactRequirement>> {
        let mut seen = HashSet::new();
        let mut requirements = Vec::new();
        for ns in namespace_ids {
            for entity in self.entities_in_namespace(ns, kind.entity_kind())? {
                let requested = entity.requested_version.trim().to_string();
                if !seen.insert((entity.artifact_id.clone(), requested.clone())) {
                    continue;
                }
                match self.get_artifact(kind, &entity.artifact_id)? {
                    Some(artifact) => requirements.push(ArtifactRequirement {
                        artifact,
                        requested_version: requested,
                    }),
                    None => warn!(
                        artifact_id = %entity.artifact_id,
                        kind = kind.as_str(),
                        "entity references unknown artifact"
                    ),
                }
            }
        }
        Ok(requirements)
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert a new deployment. Fails if the id is already taken.
    pub fn insert_deployment(&self, deployment: &Deployment) -> StateResult<()> {
        let bytes = encode(deployment)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut t = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            if t.get(deployment.id.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(deployment.id.clone()));
            }
            t.insert(deployment.id.as_str(), bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(deployment_id = %deployment.id, "deployment stored");
        Ok(())
    }

    pub fn get_deployment(&self, id: &str) -> StateResult<Option<Deployment>> {
        self.get_json(DEPLOYMENTS, id)
    }

    /// Deployments of an environment, newest first.
    pub fn deployments_for_environment(&self, environment_id: &str) -> StateResult<Vec<Deployment>> {
        let mut all: Vec<Deployment> = self.scan_json(DEPLOYMENTS, "")?;
        all.retain(|d| d.environment_id == environment_id);
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    pub fn record_message_id(&self, id: &str, message_id: &str) -> StateResult<()> {
        self.update_with(DEPLOYMENTS, id, |d: &mut Deployment| {
            d.message_id = Some(message_id.to_string());
            d.updated_at = Utc::now();
            Ok(())
        })?;
        Ok(())
    }

    pub fn record_receipt(&self, id: &str, receipt_token: &str) -> StateResult<()> {
        self.update_with(DEPLOYMENTS, id, |d: &mut Deployment| {
            d.receipt_token = Some(receipt_token.to_string());
            d.updated_at = Utc::now();
            Ok(())
        })?;
        Ok(())
    }

    /// Move a deployment forward, optionally recording the plan location.
    ///
    /// Rejects any transition that is not strictly forward.
    pub fn transition_deployment(
        &self,
        id: &str,
        to: DeploymentState,
        plan_location: Option<&deckhand_blob::BlobLocation>,
    ) -> StateResult<Deployment> {
        let updated = self.update_with(DEPLOYMENTS, id, |d: &mut Deployment| {
            if !d.state.can_transition_to(to) {
                return Err(StateError::InvalidTransition {
                    id: d.id.clone(),
                    from: d.state,
                    to,
                });
            }
            d.state = to;
            if let Some(location) = plan_location {
                d.plan_location = Some(location.clone());
            }
            d.updated_at = Utc::now();
            Ok(())
        })?;
        info!(deployment_id = %id, state = %to, "deployment transitioned");
        Ok(updated)
    }

    // ── Cron jobs ──────────────────────────────────────────────────

    pub fn put_cron_job(&self, job: &CronJob) -> StateResult<()> {
        self.put_json(CRON_JOBS, &job.id, job)
    }

    pub fn get_cron_job(&self, id: &str) -> StateResult<Option<CronJob>> {
        self.get_json(CRON_JOBS, id)
    }

    /// All cron jobs ordered by execution order.
    pub fn list_cron_jobs(&self) -> StateResult<Vec<CronJob>> {
        let mut jobs: Vec<CronJob> = self.scan_json(CRON_JOBS, "")?;
        jobs.sort_by(|a, b| {
            a.execution_order
                .cmp(&b.execution_order)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(jobs)
    }

    pub fn links_for_cron_job(&self, cron_job_id: &str) -> StateResult<Vec<CronJobDeploymentLink>> {
        self.scan_json(CRON_JOB_DEPLOYMENTS, &format!("{cron_job_id}:"))
    }

    /// Claim lock: select every idle, enabled, due job and flip it to
    /// `Running` inside one write transaction.
    ///
    /// A claimed job is no longer `Idle`, so no concurrent tick sharing this
    /// store can claim it again until it is unlocked or reconciled.
    pub fn lock_due_cron_jobs(
        &self,
        now: DateTime<Utc>,
        is_due: &DuePredicate,
    ) -> StateResult<Vec<CronJob>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let claimed = {
            let mut t = txn.open_table(CRON_JOBS).map_err(map_err!(Table))?;
            let mut idle: Vec<CronJob> = Vec::new();
            for entry in t.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let job: CronJob = decode(value.value())?;
                if job.state == CronState::Idle && !job.disabled {
                    idle.push(job);
                }
            }
            idle.sort_by(|a, b| {
                a.execution_order
                    .cmp(&b.execution_order)
                    .then_with(|| a.id.cmp(&b.id))
            });

            let mut claimed = Vec::new();
            for mut job in idle.into_iter().filter(|job| is_due(job)) {
                job.state = CronState::Running;
                job.locked_at = Some(now);
                let bytes = encode(&job)?;
                t.insert(job.id.as_str(), bytes.as_slice())
                    .map_err(map_err!(Write))?;
                claimed.push(job);
            }
            claimed
        };
        txn.commit().map_err(map_err!(Transaction))?;
        if !claimed.is_empty() {
            debug!(count = claimed.len(), "cron jobs claimed");
        }
        Ok(claimed)
    }

    /// Turn a claim into an active batch: link the spawned deployments and
    /// keep the job `Running` until they all complete.
    pub fn commit_cron_batch(&self, cron_job_id: &str, deployment_ids: &[DeploymentId]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut jobs = txn.open_table(CRON_JOBS).map_err(map_err!(Table))?;
            let mut job: CronJob = match jobs.get(cron_job_id).map_err(map_err!(Read))? {
                Some(guard) => decode(guard.value())?,
                None => return Err(StateError::NotFound(cron_job_id.to_string())),
            };
            job.state = CronState::Running;
            job.locked_at = None;
            let bytes = encode(&job)?;
            jobs.insert(cron_job_id, bytes.as_slice())
                .map_err(map_err!(Write))?;

            let mut links = txn
                .open_table(CRON_JOB_DEPLOYMENTS)
                .map_err(map_err!(Table))?;
            for deployment_id in deployment_ids {
                let link = CronJobDeploymentLink {
                    cron_job_id: cron_job_id.to_string(),
                    deployment_id: deployment_id.clone(),
                };
                let bytes = encode(&link)?;
                links
                    .insert(link.table_key().as_str(), bytes.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        info!(%cron_job_id, deployments = deployment_ids.len(), "cron batch committed");
        Ok(())
    }

    /// Release a claimed job back to `Idle`, stamping `last_run` if given.
    pub fn unlock_cron_job(&self, cron_job_id: &str, last_run: Option<DateTime<Utc>>) -> StateResult<()> {
        self.update_with(CRON_JOBS, cron_job_id, |job: &mut CronJob| {
            job.state = CronState::Idle;
            job.locked_at = None;
            if last_run.is_some() {
                job.last_run = last_run;
            }
            Ok(())
        })?;
        debug!(%cron_job_id, stamped = last_run.is_some(), "cron job unlocked");
        Ok(())
    }

    /// Return finished batches to `Idle`.
    ///
    /// A committed job goes back to `Idle` with `last_run = now` once every
    /// linked deployment is `Completed`. A claim that never committed and is
    /// older than `stale_before` is released without stamping `last_run`.
    /// Returns the ids of the released jobs.
    pub fn reconcile_cron_jobs(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StateResult<Vec<CronJobId>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let released = {
            let mut jobs = txn.open_table(CRON_JOBS).map_err(map_err!(Table))?;
            let links = txn
                .open_table(CRON_JOB_DEPLOYMENTS)
                .map_err(map_err!(Table))?;
            let deployments = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;

            let mut running: Vec<CronJob> = Vec::new();
            for entry in jobs.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let job: CronJob = decode(value.value())?;
                if job.state == CronState::Running {
                    running.push(job);
                }
            }

            let mut released = Vec::new();
            for mut job in running {
                match job.locked_at {
                    Some(locked_at) if locked_at < stale_before => {
                        warn!(cron_job_id = %job.id, %locked_at, "releasing stale cron claim");
                    }
                    Some(_) => continue,
                    None => {
                        let prefix = format!("{}:", job.id);
                        let mut all_completed = true;
                        for entry in links.iter().map_err(map_err!(Read))? {
                            let (key, value) = entry.map_err(map_err!(Read))?;
                            if !key.value().starts_with(&prefix) {
                                continue;
                            }
                            let link: CronJobDeploymentLink = decode(value.value())?;
                            let completed = match deployments
                                .get(link.deployment_id.as_str())
                                .map_err(map_err!(Read))?
                            {
                                Some(guard) => {
                                    let d: Deployment = decode(guard.value())?;
                                    d.state == DeploymentState::Completed
                                }
                                // A deleted deployment cannot hold the batch open.
                                None => true,
                            };
                            if !completed {
                                all_completed = false;
                                break;
                            }
                        }
                        if !all_completed {
                            continue;
                        }
                        job.last_run = Some(now);
                    }
                }

                job.state = CronState::Idle;
                job.locked_at = None;
                let bytes = encode(&job)?;
                jobs.insert(job.id.as_str(), bytes.as_slice())
                    .map_err(map_err!(Write))?;
                released.push(job.id);
            }
            released
        };
        txn.commit().map_err(map_err!(Transaction))?;
        if !released.is_empty() {
            info!(count = released.len(), "cron jobs returned to idle");
        }
        Ok(released)
    }
}
