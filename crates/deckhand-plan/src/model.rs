//! Plan requests, per-namespace plans and execution plans.
//!
//! [`NamespacePlan`] is what the generator persists on each deployment row;
//! [`ExecutionPlan`] is what the orchestrator hands to an executor via the
//! blob store. Both are plain serde types and only become JSON at the
//! persistence and wire boundaries.

use std::collections::BTreeMap;

use deckhand_queue::Command;
use deckhand_state::{ArtifactId, ArtifactKind, EntityKind, Environment, Namespace};
use serde::{Deserialize, Serialize};

// ── Request ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentType {
    #[default]
    Application,
    Migration,
    Job,
    Restart,
}

impl DeploymentType {
    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentType::Application => "application",
            DeploymentType::Migration => "migration",
            DeploymentType::Job => "job",
            DeploymentType::Restart => "restart",
        }
    }

    /// Artifact table searched for this type.
    pub fn artifact_kind(self) -> ArtifactKind {
        match self {
            DeploymentType::Application | DeploymentType::Restart => ArtifactKind::Service,
            DeploymentType::Migration => ArtifactKind::Database,
            DeploymentType::Job => ArtifactKind::Job,
        }
    }

    /// Live entities targeted by this type.
    pub fn entity_kind(self) -> EntityKind {
        self.artifact_kind().entity_kind()
    }

    /// Command sent to the execution queue.
    pub fn execution_command(self) -> Command {
        match self {
            DeploymentType::Application => Command::DeployApplication,
            DeploymentType::Migration => Command::DeployMigration,
            DeploymentType::Job => Command::RunJob,
            DeploymentType::Restart => Command::RestartApplication,
        }
    }
}

/// One explicitly requested artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRequest {
    pub name: String,
    /// Version prefix; empty or absent selects the latest.
    #[serde(default)]
    pub version: Option<String>,
}

/// Input to the plan generator, from the API or a cron job template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanRequest {
    pub environment: String,
    /// Namespace aliases. Empty targets every eligible namespace.
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRequest>,
    #[serde(default)]
    pub force_redeploy: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub user: String,
    #[serde(rename = "type", default)]
    pub deployment_type: DeploymentType,
    /// Overrides merged over each entity's resolved metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl PlanRequest {
    pub fn new(environment: impl Into<String>, deployment_type: DeploymentType) -> Self {
        Self {
            environment: environment.into(),
            namespaces: Vec::new(),
            artifacts: Vec::new(),
            force_redeploy: false,
            dry_run: false,
            callback_url: None,
            user: String::new(),
            deployment_type,
            metadata: BTreeMap::new(),
            correlation_id: None,
        }
    }
}

// ── Namespace plan ─────────────────────────────────────────────────

/// Where a namespace plan deploys to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceTarget {
    pub id: String,
    pub name: String,
    pub alias: String,
    pub cluster_id: String,
    pub cluster_name: String,
}

impl From<&Namespace> for NamespaceTarget {
    fn from(ns: &Namespace) -> Self {
        Self {
            id: ns.id.clone(),
            name: ns.name.clone(),
            alias: ns.alias.clone(),
            cluster_id: ns.cluster_id.clone(),
            cluster_name: ns.cluster_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentRef {
    pub id: String,
    pub name: String,
    pub alias: String,
}

impl From<&Environment> for EnvironmentRef {
    fn from(env: &Environment) -> Self {
        Self {
            id: env.id.clone(),
            name: env.name.clone(),
            alias: env.alias.clone(),
        }
    }
}

/// An artifact resolved to a concrete available version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDefinition {
    pub artifact_id: ArtifactId,
    pub name: String,
    pub feed: String,
    pub path: String,
    pub requested_version: String,
    /// Normalized pattern the version was resolved with.
    pub pattern: String,
    pub available_version: String,
    /// Set once a live entity consumed this definition.
    #[serde(default)]
    pub matched: bool,
}

/// Fields shared by every namespace plan variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanOptions {
    pub namespace: NamespaceTarget,
    pub environment: EnvironmentRef,
    /// Sorted by available version, highest first.
    pub artifacts: Vec<ArtifactDefinition>,
    /// Artifacts were named by the caller rather than discovered.
    pub artifacts_supplied: bool,
    #[serde(default)]
    pub force_redeploy: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Per-namespace plan persisted on a deployment row, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NamespacePlan {
    Application(PlanOptions),
    Migration(PlanOptions),
    Job(PlanOptions),
    Restart(PlanOptions),
}

impl NamespacePlan {
    pub fn new(deployment_type: DeploymentType, options: PlanOptions) -> Self {
        match deployment_type {
            DeploymentType::Application => NamespacePlan::Application(options),
            DeploymentType::Migration => NamespacePlan::Migration(options),
            DeploymentType::Job => NamespacePlan::Job(options),
            DeploymentType::Restart => NamespacePlan::Restart(options),
        }
    }

    pub fn deployment_type(&self) -> DeploymentType {
        match self {
            NamespacePlan::Application(_) => DeploymentType::Application,
            NamespacePlan::Migration(_) => DeploymentType::Migration,
            NamespacePlan::Job(_) => DeploymentType::Job,
            NamespacePlan::Restart(_) => DeploymentType::Restart,
        }
    }

    pub fn options(&self) -> &PlanOptions {
        match self {
            NamespacePlan::Application(o)
            | NamespacePlan::Migration(o)
            | NamespacePlan::Job(o)
            | NamespacePlan::Restart(o) => o,
        }
    }

    pub fn options_mut(&mut self) -> &mut PlanOptions {
        match self {
            NamespacePlan::Application(o)
            | NamespacePlan::Migration(o)
            | NamespacePlan::Job(o)
            | NamespacePlan::Restart(o) => o,
        }
    }

    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }

    pub fn from_value(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }
}

// ── Execution plan ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntryResult {
    #[default]
    Noop,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Pending,
    Dryrun,
    Errors,
    Complete,
}

/// One entity to deploy, with the resolved artifact attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub entity_id: String,
    pub name: String,
    pub artifact_id: ArtifactId,
    pub artifact_name: String,
    pub feed: String,
    pub path: String,
    pub requested_version: String,
    pub deployed_version: Option<String>,
    pub available_version: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Written by the executor.
    #[serde(default)]
    pub result: EntryResult,
}

/// Everything an executor needs to deploy one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub deployment_id: String,
    pub namespace: NamespaceTarget,
    pub environment: EnvironmentRef,
    #[serde(rename = "type")]
    pub deployment_type: DeploymentType,
    #[serde(default)]
    pub services: Vec<PlanEntry>,
    #[serde(default)]
    pub jobs: Vec<PlanEntry>,
    #[serde(default)]
    pub migrations: Vec<PlanEntry>,
    #[serde(default)]
    pub messages: Vec<String>,
    pub status: PlanStatus,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub force_redeploy: bool,
    #[serde(default)]
    pub callback_url: Option<String>,
}

impl ExecutionPlan {
    pub fn new(deployment_id: &str, plan: &NamespacePlan) -> Self {
        let options = plan.options();
        Self {
            deployment_id: deployment_id.to_string(),
            namespace: options.namespace.clone(),
            environment: options.environment.clone(),
            deployment_type: plan.deployment_type(),
            services: Vec::new(),
            jobs: Vec::new(),
            migrations: Vec::new(),
            messages: Vec::new(),
            status: PlanStatus::Pending,
            dry_run: options.dry_run,
            force_redeploy: options.force_redeploy,
            callback_url: options.callback_url.clone(),
        }
    }

    /// Add an entry to the list matching the entity kind.
    pub fn push_entry(&mut self, kind: EntityKind, entry: PlanEntry) {
        match kind {
            EntityKind::Service => self.services.push(entry),
            EntityKind::Job => self.jobs.push(entry),
            EntityKind::Database => self.migrations.push(entry),
        }
    }

    /// Every entry with the entity kind it belongs to.
    pub fn entries(&self) -> impl Iterator<Item = (EntityKind, &PlanEntry)> {
        self.services
            .iter()
            .map(|e| (EntityKind::Service, e))
            .chain(self.jobs.iter().map(|e| (EntityKind::Job, e)))
            .chain(self.migrations.iter().map(|e| (EntityKind::Database, e)))
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.jobs.is_empty() && self.migrations.is_empty()
    }

    /// Status after the executor reported back.
    pub fn finalize_status(&mut self) {
        if self.entries().any(|(_, e)| e.result == EntryResult::Failed) {
            self.status = PlanStatus::Errors;
        } else if matches!(self.status, PlanStatus::Pending) {
            self.status = PlanStatus::Complete;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> PlanOptions {
        PlanOptions {
            namespace: NamespaceTarget {
                id: "ns-cvs".to_string(),
                name: "cvs".to_string(),
                alias: "cvs".to_string(),
                cluster_id: "c1".to_string(),
                cluster_name: "blue".to_string(),
            },
            environment: EnvironmentRef {
                id: "env-int".to_string(),
                name: "int".to_string(),
                alias: "integration".to_string(),
            },
            artifacts: Vec::new(),
            artifacts_supplied: false,
            force_redeploy: false,
            dry_run: true,
            callback_url: None,
            metadata: BTreeMap::new(),
        }
    }

    fn entry(result: EntryResult) -> PlanEntry {
        PlanEntry {
            entity_id: "svc-api".to_string(),
            name: "api".to_string(),
            artifact_id: "art-api".to_string(),
            artifact_name: "api".to_string(),
            feed: "releases".to_string(),
            path: "apps/api".to_string(),
            requested_version: "2.3".to_string(),
            deployed_version: None,
            available_version: "2.3.9".to_string(),
            metadata: BTreeMap::new(),
            result,
        }
    }

    #[test]
    fn namespace_plan_is_tagged_by_type() {
        let plan = NamespacePlan::new(DeploymentType::Migration, options());
        let value = plan.to_value().unwrap();
        assert_eq!(value["type"], "migration");
        assert_eq!(value["namespace"]["cluster_name"], "blue");
        assert_eq!(value["environment"]["name"], "int");
        assert_eq!(value["artifacts_supplied"], false);
        assert_eq!(value["dry_run"], true);

        let back = NamespacePlan::from_value(value).unwrap();
        assert_eq!(back.deployment_type(), DeploymentType::Migration);
        assert_eq!(back, plan);
    }

    #[test]
    fn plan_request_defaults() {
        let request: PlanRequest = serde_json::from_str(r#"{"environment": "int"}"#).unwrap();
        assert_eq!(request.deployment_type, DeploymentType::Application);
        assert!(request.namespaces.is_empty());
        assert!(!request.dry_run);

        let request: PlanRequest = serde_json::from_str(
            r#"{"environment": "int", "type": "restart", "artifacts": [{"name": "api"}]}"#,
        )
        .unwrap();
        assert_eq!(request.deployment_type, DeploymentType::Restart);
        assert_eq!(request.artifacts[0].version, None);
    }

    #[test]
    fn deployment_type_mappings() {
        assert_eq!(DeploymentType::Restart.entity_kind(), EntityKind::Service);
        assert_eq!(DeploymentType::Migration.entity_kind(), EntityKind::Database);
        assert_eq!(DeploymentType::Job.execution_command(), Command::RunJob);
        assert_eq!(
            DeploymentType::Application.execution_command(),
            Command::DeployApplication
        );
    }

    #[test]
    fn entries_land_in_kind_lists() {
        let plan = NamespacePlan::new(DeploymentType::Application, options());
        let mut exec = ExecutionPlan::new("dep-1", &plan);
        assert!(exec.is_empty());

        exec.push_entry(EntityKind::Service, entry(EntryResult::Noop));
        exec.push_entry(EntityKind::Database, entry(EntryResult::Noop));
        assert_eq!(exec.services.len(), 1);
        assert_eq!(exec.migrations.len(), 1);
        assert_eq!(exec.entries().count(), 2);
    }

    #[test]
    fn finalize_status_reflects_failures() {
        let plan = NamespacePlan::new(DeploymentType::Application, options());

        let mut ok = ExecutionPlan::new("dep-1", &plan);
        ok.push_entry(EntityKind::Service, entry(EntryResult::Succeeded));
        ok.finalize_status();
        assert_eq!(ok.status, PlanStatus::Complete);

        let mut failed = ExecutionPlan::new("dep-2", &plan);
        failed.push_entry(EntityKind::Service, entry(EntryResult::Succeeded));
        failed.push_entry(EntityKind::Service, entry(EntryResult::Failed));
        failed.finalize_status();
        assert_eq!(failed.status, PlanStatus::Errors);
    }
}
