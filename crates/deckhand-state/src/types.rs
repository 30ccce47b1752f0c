//! Domain records for the Deckhand state store.
//!
//! Reference data (environments, namespaces, artifacts, live entities) is
//! owned by the CRUD surface and only read here. Deployments and cron jobs
//! are the records this crate mutates.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use deckhand_blob::BlobLocation;
use serde::{Deserialize, Serialize};

pub type EnvironmentId = String;
pub type NamespaceId = String;
pub type ArtifactId = String;
pub type EntityId = String;
pub type DeploymentId = String;
pub type CronJobId = String;

// ── Environment ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Environment {
    pub id: EnvironmentId,
    pub name: String,
    pub alias: String,
}

// ── Namespace ──────────────────────────────────────────────────────

/// A deployable grouping of services, jobs and migrations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Namespace {
    pub id: NamespaceId,
    pub environment_id: EnvironmentId,
    pub name: String,
    pub alias: String,
    pub cluster_id: String,
    pub cluster_name: String,
    /// Only targeted when named explicitly in a plan request.
    #[serde(default)]
    pub explicit_deploy_only: bool,
}

impl Namespace {
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.environment_id, self.id)
    }
}

// ── Artifacts ──────────────────────────────────────────────────────

/// Artifact table an artifact lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Service,
    Database,
    Job,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Service => "service",
            ArtifactKind::Database => "database",
            ArtifactKind::Job => "job",
        }
    }

    /// Kind of live entity built from artifacts of this kind.
    pub fn entity_kind(self) -> EntityKind {
        match self {
            ArtifactKind::Service => EntityKind::Service,
            ArtifactKind::Database => EntityKind::Database,
            ArtifactKind::Job => EntityKind::Job,
        }
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "service" => Ok(ArtifactKind::Service),
            "database" => Ok(ArtifactKind::Database),
            "job" => Ok(ArtifactKind::Job),
            other => Err(format!("unknown artifact kind: {other}")),
        }
    }
}

/// A published artifact and the feed/path it is resolved from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    pub id: ArtifactId,
    pub name: String,
    pub kind: ArtifactKind,
    pub feed: String,
    pub path: String,
}

impl Artifact {
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.kind.as_str(), self.id)
    }
}

/// An artifact paired with one version line a live entity asks for.
///
/// Discovery yields one requirement per distinct (artifact, requested
/// version) pair, so entities pinned to different lines of the same
/// artifact each get a version resolved for them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactRequirement {
    pub artifact: Artifact,
    pub requested_version: String,
}

// ── Live entities ──────────────────────────────────────────────────

/// Kind of live entity running inside a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Service,
    Job,
    Database,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Service => "service",
            EntityKind::Job => "job",
            EntityKind::Database => "database",
        }
    }

    /// The artifact table entities of this kind are built from.
    pub fn artifact_kind(self) -> ArtifactKind {
        match self {
            EntityKind::Service => ArtifactKind::Service,
            EntityKind::Job => ArtifactKind::Job,
            EntityKind::Database => ArtifactKind::Database,
        }
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "service" => Ok(EntityKind::Service),
            "job" => Ok(EntityKind::Job),
            "database" => Ok(EntityKind::Database),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}

/// A service, job or database instance living in a namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub namespace_id: NamespaceId,
    pub kind: EntityKind,
    pub name: String,
    pub artifact_id: ArtifactId,
    /// Version prefix this entity tracks (e.g. `2.3`). Empty tracks all.
    #[serde(default)]
    pub requested_version: String,
    pub deployed_version: Option<String>,
    /// Stacked annotation/label/metadata values, already merged.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Entity {
    pub fn table_key(&self) -> String {
        entity_key(&self.namespace_id, self.kind, &self.id)
    }
}

pub(crate) fn entity_key(namespace_id: &str, kind: EntityKind, id: &str) -> String {
    format!("{namespace_id}/{}/{id}", kind.as_str())
}

// ── Deployment ─────────────────────────────────────────────────────

/// Lifecycle of a namespace-scoped deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Queued,
    Scheduled,
    Completed,
}

impl DeploymentState {
    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentState::Queued => "queued",
            DeploymentState::Scheduled => "scheduled",
            DeploymentState::Completed => "completed",
        }
    }

    /// Transitions only move forward and never revisit a state.
    pub fn can_transition_to(self, next: DeploymentState) -> bool {
        matches!(
            (self, next),
            (DeploymentState::Queued, DeploymentState::Scheduled)
                | (DeploymentState::Queued, DeploymentState::Completed)
                | (DeploymentState::Scheduled, DeploymentState::Completed)
        )
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(DeploymentState::Queued),
            "scheduled" => Ok(DeploymentState::Scheduled),
            "completed" => Ok(DeploymentState::Completed),
            other => Err(format!("unknown deployment state: {other}")),
        }
    }
}

/// Durable record of one namespace-scoped deployment attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    pub id: DeploymentId,
    pub environment_id: EnvironmentId,
    pub namespace_id: NamespaceId,
    /// Id of the schedule-request message on the primary queue.
    pub message_id: Option<String>,
    /// Receipt of the schedule-request delivery; deleting it frees the lane.
    pub receipt_token: Option<String>,
    pub correlation_id: String,
    /// Serialized namespace plan.
    pub plan_options: serde_json::Value,
    pub plan_location: Option<BlobLocation>,
    pub state: DeploymentState,
    pub user: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Cron ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CronState {
    Idle,
    Running,
}

impl CronState {
    pub fn as_str(self) -> &'static str {
        match self {
            CronState::Idle => "idle",
            CronState::Running => "running",
        }
    }
}

impl FromStr for CronState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(CronState::Idle),
            "running" => Ok(CronState::Running),
            other => Err(format!("unknown cron state: {other}")),
        }
    }
}

/// A saved, repeatable plan request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CronJob {
    pub id: CronJobId,
    pub description: String,
    /// Serialized plan request template.
    pub plan_options: serde_json::Value,
    /// Cron expression (5 or 6 fields).
    pub schedule: String,
    pub last_run: Option<DateTime<Utc>>,
    pub state: CronState,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub execution_order: i32,
    /// Set while a tick holds the claim lock and the batch is not committed.
    #[serde(default)]
    pub locked_at: Option<DateTime<Utc>>,
}

/// One deployment spawned by one cron trigger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CronJobDeploymentLink {
    pub cron_job_id: CronJobId,
    pub deployment_id: DeploymentId,
}

impl CronJobDeploymentLink {
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.cron_job_id, self.deployment_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_state_moves_forward_only() {
        use DeploymentState::*;
        assert!(Queued.can_transition_to(Scheduled));
        assert!(Queued.can_transition_to(Completed));
        assert!(Scheduled.can_transition_to(Completed));

        assert!(!Scheduled.can_transition_to(Queued));
        assert!(!Completed.can_transition_to(Scheduled));
        assert!(!Completed.can_transition_to(Completed));
        assert!(!Queued.can_transition_to(Queued));
    }

    #[test]
    fn deployment_state_parses_its_own_names() {
        for state in [
            DeploymentState::Queued,
            DeploymentState::Scheduled,
            DeploymentState::Completed,
        ] {
            assert_eq!(state.as_str().parse::<DeploymentState>(), Ok(state));
        }
        assert!("done".parse::<DeploymentState>().is_err());
    }
}
