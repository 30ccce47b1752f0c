//! PostgreSQL repository implementation.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deckhand_blob::BlobLocation;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use tracing::{debug, info, warn};

use crate::error::{StateError, StateResult};
use crate::repository::Repository;
use crate::store::DuePredicate;
use crate::types::*;

/// PostgreSQL-backed repository for deployments shared by several replicas.
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    /// Connect to PostgreSQL. Missing tables are created.
    pub async fn connect(url: &str, max_connections: u32) -> StateResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: PgPool) -> StateResult<Self> {
        let repo = Self { pool };
        repo.ensure_schema().await?;
        Ok(repo)
    }

    async fn ensure_schema(&self) -> StateResult<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS environments (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                alias TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS namespaces (
                id TEXT PRIMARY KEY,
                environment_id TEXT NOT NULL REFERENCES environments(id),
                name TEXT NOT NULL,
                alias TEXT NOT NULL,
                cluster_id TEXT NOT NULL,
                cluster_name TEXT NOT NULL,
                explicit_deploy_only BOOLEAN NOT NULL DEFAULT FALSE
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS artifacts (
                id TEXT NOT NULL,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                feed TEXT NOT NULL,
                path TEXT NOT NULL,
                PRIMARY KEY (kind, id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                id TEXT NOT NULL,
                namespace_id TEXT NOT NULL REFERENCES namespaces(id),
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                artifact_id TEXT NOT NULL,
                requested_version TEXT NOT NULL DEFAULT '',
                deployed_version TEXT,
                metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
                PRIMARY KEY (namespace_id, kind, id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS deployments (
                id TEXT PRIMARY KEY,
                environment_id TEXT NOT NULL,
                namespace_id TEXT NOT NULL,
                message_id TEXT,
                receipt_token TEXT,
                correlation_id TEXT NOT NULL,
                plan_options JSONB NOT NULL,
                plan_location JSONB,
                state TEXT NOT NULL,
                "user" TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_deployments_environment
            ON deployments (environment_id, created_at DESC)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS cron_jobs (
                id TEXT PRIMARY KEY,
                description TEXT NOT NULL,
                plan_options JSONB NOT NULL,
                schedule TEXT NOT NULL,
                last_run TIMESTAMPTZ,
                state TEXT NOT NULL DEFAULT 'idle',
                disabled BOOLEAN NOT NULL DEFAULT FALSE,
                execution_order INTEGER NOT NULL DEFAULT 0,
                locked_at TIMESTAMPTZ
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS cron_job_deployments (
                cron_job_id TEXT NOT NULL REFERENCES cron_jobs(id) ON DELETE CASCADE,
                deployment_id TEXT NOT NULL,
                PRIMARY KEY (cron_job_id, deployment_id)
            )
            "#,
        ];
        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn row_to_namespace(row: &PgRow) -> Namespace {
        Namespace {
            id: row.get("id"),
            environment_id: row.get("environment_id"),
            name: row.get("name"),
            alias: row.get("alias"),
            cluster_id: row.get("cluster_id"),
            cluster_name: row.get("cluster_name"),
            explicit_deploy_only: row.get("explicit_deploy_only"),
        }
    }

    fn row_to_artifact(row: &PgRow) -> StateResult<Artifact> {
        let kind: String = row.get("kind");
        Ok(Artifact {
            id: row.get("id"),
            name: row.get("name"),
            kind: kind.parse().map_err(StateError::Deserialize)?,
            feed: row.get("feed"),
            path: row.get("path"),
        })
    }

    fn row_to_entity(row: &PgRow) -> StateResult<Entity> {
        let kind: String = row.get("kind");
        let metadata: serde_json::Value = row.get("metadata");
        Ok(Entity {
            id: row.get("id"),
            namespace_id: row.get("namespace_id"),
            kind: kind.parse().map_err(StateError::Deserialize)?,
            name: row.get("name"),
            artifact_id: row.get("artifact_id"),
            requested_version: row.get("requested_version"),
            deployed_version: row.get("deployed_version"),
            metadata: serde_json::from_value(metadata)
                .map_err(|e| StateError::Deserialize(format!("entity metadata: {e}")))?,
        })
    }

    fn row_to_deployment(row: &PgRow) -> StateResult<Deployment> {
        let state: String = row.get("state");
        let plan_location: Option<serde_json::Value> = row.get("plan_location");
        let plan_location = plan_location
            .map(serde_json::from_value::<BlobLocation>)
            .transpose()
            .map_err(|e| StateError::Deserialize(format!("plan location: {e}")))?;
        Ok(Deployment {
            id: row.get("id"),
            environment_id: row.get("environment_id"),
            namespace_id: row.get("namespace_id"),
            message_id: row.get("message_id"),
            receipt_token: row.get("receipt_token"),
            correlation_id: row.get("correlation_id"),
            plan_options: row.get("plan_options"),
            plan_location,
            state: state.parse().map_err(StateError::Deserialize)?,
            user: row.get("user"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn row_to_cron_job(row: &PgRow) -> StateResult<CronJob> {
        let state: String = row.get("state");
        Ok(CronJob {
            id: row.get("id"),
            description: row.get("description"),
            plan_options: row.get("plan_options"),
            schedule: row.get("schedule"),
            last_run: row.get("last_run"),
            state: state.parse().map_err(StateError::Deserialize)?,
            disabled: row.get("disabled"),
            execution_order: row.get("execution_order"),
            locked_at: row.get("locked_at"),
        })
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn environment_by_name(&self, name: &str) -> StateResult<Option<Environment>> {
        let row = sqlx::query("SELECT id, name, alias FROM environments WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| Environment {
            id: row.get("id"),
            name: row.get("name"),
            alias: row.get("alias"),
        }))
    }

    async fn namespaces_for_environment(&self, environment_id: &str) -> StateResult<Vec<Namespace>> {
        let rows = sqlx::query("SELECT * FROM namespaces WHERE environment_id = $1 ORDER BY id")
            .bind(environment_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::row_to_namespace).collect())
    }

    async fn artifact_by_name(
        &self,
        environment_id: &str,
        kind: ArtifactKind,
        name: &str,
    ) -> StateResult<Option<Artifact>> {
        let row = sqlx::query(
            r#"
            SELECT a.* FROM artifacts a
            WHERE a.kind = $1 AND a.name = $2 AND EXISTS (
                SELECT 1 FROM entities e
                JOIN namespaces n ON n.id = e.namespace_id
                WHERE n.environment_id = $3 AND e.kind = $4 AND e.artifact_id = a.id
            )
            LIMIT 1
            "#,
        )
        .bind(kind.as_str())
        .bind(name)
        .bind(environment_id)
        .bind(kind.entity_kind().as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_artifact).transpose()
    }

    async fn artifacts_for_namespaces(
        &self,
        kind: ArtifactKind,
        namespace_ids: &[NamespaceId],
    ) -> StateResult<Vec<ArtifactRequirement>> {
        let mut seen = HashSet::new();
        let mut requirements = Vec::new();
        for namespace_id in namespace_ids {
            let rows = sqlx::query(
                r#"
                SELECT a.*, e.requested_version FROM entities e
                JOIN artifacts a ON a.id = e.artifact_id AND a.kind = $1
                WHERE e.namespace_id = $2 AND e.kind = $3
                ORDER BY e.id
                "#,
            )
            .bind(kind.as_str())
            .bind(namespace_id)
            .bind(kind.entity_kind().as_str())
            .fetch_all(&self.pool)
            .await?;
            for row in &rows {
                let artifact = Self::row_to_artifact(row)?;
                let requested: String = row.get("requested_version");
                let requested = requested.trim().to_string();
                if seen.insert((artifact.id.clone(), requested.clone())) {
                    requirements.push(ArtifactRequirement {
                        artifact,
                        requested_version: requested,
                    });
                }
            }
        }
        Ok(requirements)
    }

    async fn live_entities(&self, namespace_id: &str, kind: EntityKind) -> StateResult<Vec<Entity>> {
        let rows = sqlx::query("SELECT * FROM entities WHERE namespace_id = $1 AND kind = $2 ORDER BY id")
            .bind(namespace_id)
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_entity).collect()
    }

    async fn set_deployed_version(
        &self,
        namespace_id: &str,
        kind: EntityKind,
        entity_id: &str,
        version: &str,
    ) -> StateResult<()> {
        let result = sqlx::query(
            "UPDATE entities SET deployed_version = $1 WHERE namespace_id = $2 AND kind = $3 AND id = $4",
        )
        .bind(version)
        .bind(namespace_id)
        .bind(kind.as_str())
        .bind(entity_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StateError::NotFound(format!(
                "{namespace_id}/{}/{entity_id}",
                kind.as_str()
            )));
        }
        Ok(())
    }

    async fn insert_deployment(&self, deployment: &Deployment) -> StateResult<()> {
        let plan_location = deployment
            .plan_location
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StateError::Serialize(e.to_string()))?;
        let result = sqlx::query(
            r#"
            INSERT INTO deployments (id, environment_id, namespace_id, message_id, receipt_token,
                correlation_id, plan_options, plan_location, state, "user", created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&deployment.id)
        .bind(&deployment.environment_id)
        .bind(&deployment.namespace_id)
        .bind(&deployment.message_id)
        .bind(&deployment.receipt_token)
        .bind(&deployment.correlation_id)
        .bind(&deployment.plan_options)
        .bind(plan_location)
        .bind(deployment.state.as_str())
        .bind(&deployment.user)
        .bind(deployment.created_at)
        .bind(deployment.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StateError::AlreadyExists(deployment.id.clone()));
        }
        debug!(deployment_id = %deployment.id, "deployment stored");
        Ok(())
    }

    async fn deployment(&self, id: &str) -> StateResult<Option<Deployment>> {
        let row = sqlx::query("SELECT * FROM deployments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_deployment).transpose()
    }

    async fn deployments_for_environment(&self, environment_id: &str) -> StateResult<Vec<Deployment>> {
        let rows = sqlx::query(
            "SELECT * FROM deployments WHERE environment_id = $1 ORDER BY created_at DESC",
        )
        .bind(environment_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_deployment).collect()
    }

    async fn record_message_id(&self, id: &str, message_id: &str) -> StateResult<()> {
        let result = sqlx::query("UPDATE deployments SET message_id = $1, updated_at = NOW() WHERE id = $2")
            .bind(message_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StateError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn record_receipt(&self, id: &str, receipt_token: &str) -> StateResult<()> {
        let result = sqlx::query("UPDATE deployments SET receipt_token = $1, updated_at = NOW() WHERE id = $2")
            .bind(receipt_token)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StateError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn transition_deployment(
        &self,
        id: &str,
        to: DeploymentState,
        plan_location: Option<&BlobLocation>,
    ) -> StateResult<Deployment> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT state FROM deployments WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StateError::NotFound(id.to_string()))?;
        let current: String = row.get("state");
        let from: DeploymentState = current.parse().map_err(StateError::Deserialize)?;
        if !from.can_transition_to(to) {
            return Err(StateError::InvalidTransition {
                id: id.to_string(),
                from,
                to,
            });
        }

        let location = plan_location
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StateError::Serialize(e.to_string()))?;
        let row = sqlx::query(
            r#"
            UPDATE deployments
            SET state = $1, plan_location = COALESCE($2, plan_location), updated_at = NOW()
            WHERE id = $3
            RETURNING *
            "#,
        )
        .bind(to.as_str())
        .bind(location)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(deployment_id = %id, state = %to, "deployment transitioned");
        Self::row_to_deployment(&row)
    }

    async fn cron_jobs(&self) -> StateResult<Vec<CronJob>> {
        let rows = sqlx::query("SELECT * FROM cron_jobs ORDER BY execution_order, id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_cron_job).collect()
    }

    async fn lock_due_cron_jobs(
        &self,
        now: DateTime<Utc>,
        is_due: &DuePredicate,
    ) -> StateResult<Vec<CronJob>> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            r#"
            SELECT * FROM cron_jobs
            WHERE state = 'idle' AND disabled = FALSE
            ORDER BY execution_order, id
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        let mut claimed = Vec::new();
        for row in &rows {
            let mut job = Self::row_to_cron_job(row)?;
            if !is_due(&job) {
                continue;
            }
            sqlx::query("UPDATE cron_jobs SET state = 'running', locked_at = $1 WHERE id = $2")
                .bind(now)
                .bind(&job.id)
                .execute(&mut *tx)
                .await?;
            job.state = CronState::Running;
            job.locked_at = Some(now);
            claimed.push(job);
        }
        tx.commit().await?;
        if !claimed.is_empty() {
            debug!(count = claimed.len(), "cron jobs claimed");
        }
        Ok(claimed)
    }

    async fn commit_cron_batch(&self, cron_job_id: &str, deployment_ids: &[DeploymentId]) -> StateResult<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("UPDATE cron_jobs SET state = 'running', locked_at = NULL WHERE id = $1")
            .bind(cron_job_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StateError::NotFound(cron_job_id.to_string()));
        }
        for deployment_id in deployment_ids {
            sqlx::query(
                "INSERT INTO cron_job_deployments (cron_job_id, deployment_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(cron_job_id)
            .bind(deployment_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        info!(%cron_job_id, deployments = deployment_ids.len(), "cron batch committed");
        Ok(())
    }

    async fn unlock_cron_job(&self, cron_job_id: &str, last_run: Option<DateTime<Utc>>) -> StateResult<()> {
        let result = sqlx::query(
            "UPDATE cron_jobs SET state = 'idle', locked_at = NULL, last_run = COALESCE($1, last_run) WHERE id = $2",
        )
        .bind(last_run)
        .bind(cron_job_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StateError::NotFound(cron_job_id.to_string()));
        }
        Ok(())
    }

    async fn reconcile_cron_jobs(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StateResult<Vec<CronJobId>> {
        let mut tx = self.pool.begin().await?;

        let stale = sqlx::query(
            r#"
            UPDATE cron_jobs SET state = 'idle', locked_at = NULL
            WHERE state = 'running' AND locked_at IS NOT NULL AND locked_at < $1
            RETURNING id
            "#,
        )
        .bind(stale_before)
        .fetch_all(&mut *tx)
        .await?;

        let finished = sqlx::query(
            r#"
            UPDATE cron_jobs j SET state = 'idle', last_run = $1
            WHERE j.state = 'running' AND j.locked_at IS NULL AND NOT EXISTS (
                SELECT 1 FROM cron_job_deployments l
                JOIN deployments d ON d.id = l.deployment_id
                WHERE l.cron_job_id = j.id AND d.state <> 'completed'
            )
            RETURNING j.id
            "#,
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let mut released = Vec::with_capacity(stale.len() + finished.len());
        for row in &stale {
            let id: String = row.get("id");
            warn!(cron_job_id = %id, "released stale cron claim");
            released.push(id);
        }
        released.extend(finished.iter().map(|row| row.get::<String, _>("id")));
        if !released.is_empty() {
            info!(count = released.len(), "cron jobs returned to idle");
        }
        Ok(released)
    }
}
