//! Reference-data seeding for the embedded store.
//!
//! Environments, namespaces, artifacts, live entities and cron jobs are
//! owned by systems outside the daemon. For standalone use they can be
//! loaded from a TOML file:
//!
//! ```toml
//! [[environment]]
//! id = "env-int"
//! name = "int"
//! alias = "int"
//!
//! [[cron_job]]
//! id = "nightly-restart"
//! schedule = "0 3 * * *"
//! plan = { environment = "int", type = "restart" }
//! ```

use std::path::Path;

use deckhand_cron::parse_schedule;
use deckhand_plan::PlanRequest;
use deckhand_state::{
    Artifact, CronJob, CronState, Entity, Environment, Namespace, StateStore,
};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SeedFile {
    #[serde(rename = "environment")]
    pub environments: Vec<Environment>,
    #[serde(rename = "namespace")]
    pub namespaces: Vec<Namespace>,
    #[serde(rename = "artifact")]
    pub artifacts: Vec<Artifact>,
    #[serde(rename = "entity")]
    pub entities: Vec<Entity>,
    #[serde(rename = "cron_job")]
    pub cron_jobs: Vec<SeedCronJob>,
}

#[derive(Debug, Deserialize)]
pub struct SeedCronJob {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub schedule: String,
    pub plan: PlanRequest,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub execution_order: i32,
}

impl SeedCronJob {
    fn into_cron_job(self) -> anyhow::Result<CronJob> {
        parse_schedule(&self.schedule)?;
        Ok(CronJob {
            plan_options: serde_json::to_value(&self.plan)?,
            id: self.id,
            description: self.description,
            schedule: self.schedule,
            last_run: None,
            state: CronState::Idle,
            disabled: self.disabled,
            execution_order: self.execution_order,
            locked_at: None,
        })
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedCounts {
    pub environments: usize,
    pub namespaces: usize,
    pub artifacts: usize,
    pub entities: usize,
    pub cron_jobs: usize,
}

impl SeedFile {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("read {}: {e}", path.display()))?;
        Ok(toml::from_str(&content)?)
    }

    /// Write every record into `store`, replacing records with the same key.
    pub fn apply(self, store: &StateStore) -> anyhow::Result<SeedCounts> {
        let mut counts = SeedCounts::default();
        for env in &self.environments {
            store.put_environment(env)?;
            counts.environments += 1;
        }
        for ns in &self.namespaces {
            store.put_namespace(ns)?;
            counts.namespaces += 1;
        }
        for artifact in &self.artifacts {
            store.put_artifact(artifact)?;
            counts.artifacts += 1;
        }
        for entity in &self.entities {
            store.put_entity(entity)?;
            counts.entities += 1;
        }
        for job in self.cron_jobs {
            let id = job.id.clone();
            let job = job
                .into_cron_job()
                .map_err(|e| anyhow::anyhow!("cron job {id}: {e}"))?;
            store.put_cron_job(&job)?;
            counts.cron_jobs += 1;
        }
        info!(
            environments = counts.environments,
            namespaces = counts.namespaces,
            artifacts = counts.artifacts,
            entities = counts.entities,
            cron_jobs = counts.cron_jobs,
            "seed applied"
        );
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckhand_plan::DeploymentType;
    use deckhand_state::{ArtifactKind, EntityKind};

    const SEED: &str = r#"
[[environment]]
id = "env-int"
name = "int"
alias = "int"

[[namespace]]
id = "ns-cvs"
environment_id = "env-int"
name = "cvs"
alias = "cvs"
cluster_id = "c1"
cluster_name = "blue"

[[artifact]]
id = "art-api"
name = "api"
kind = "service"
feed = "releases"
path = "apps/api"

[[entity]]
id = "svc-api"
namespace_id = "ns-cvs"
kind = "service"
name = "api"
artifact_id = "art-api"
requested_version = "2.3"

[[cron_job]]
id = "nightly-restart"
schedule = "0 3 * * *"
plan = { environment = "int", type = "restart" }
"#;

    #[test]
    fn seeds_every_record_kind() {
        let store = StateStore::open_in_memory().unwrap();
        let seed: SeedFile = toml::from_str(SEED).unwrap();
        let counts = seed.apply(&store).unwrap();
        assert_eq!(
            counts,
            SeedCounts {
                environments: 1,
                namespaces: 1,
                artifacts: 1,
                entities: 1,
                cron_jobs: 1,
            }
        );

        assert!(store.environment_by_name("int").unwrap().is_some());
        assert!(store.get_artifact(ArtifactKind::Service, "art-api").unwrap().is_some());
        let entity = store
            .get_entity("ns-cvs", EntityKind::Service, "svc-api")
            .unwrap()
            .unwrap();
        assert!(entity.deployed_version.is_none());

        let job = store.get_cron_job("nightly-restart").unwrap().unwrap();
        assert_eq!(job.state, CronState::Idle);
        let plan: PlanRequest = serde_json::from_value(job.plan_options).unwrap();
        assert_eq!(plan.deployment_type, DeploymentType::Restart);
    }

    #[test]
    fn rejects_bad_cron_expression() {
        let store = StateStore::open_in_memory().unwrap();
        let seed: SeedFile = toml::from_str(
            r#"
[[cron_job]]
id = "broken"
schedule = "whenever"
plan = { environment = "int" }
"#,
        )
        .unwrap();
        let err = seed.apply(&store).unwrap_err();
        assert!(err.to_string().contains("broken"));
    }
}
