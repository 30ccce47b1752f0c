//! redb table definitions for the Deckhand state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).
//! Composite keys follow `{parent}/{child}` or `{parent}:{child}` so related
//! rows can be found with a prefix scan.

use redb::TableDefinition;

/// Environments keyed by `{environment_id}`.
pub const ENVIRONMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("environments");

/// Namespaces keyed by `{environment_id}/{namespace_id}`.
pub const NAMESPACES: TableDefinition<&str, &[u8]> = TableDefinition::new("namespaces");

/// Artifacts keyed by `{kind}/{artifact_id}`.
pub const ARTIFACTS: TableDefinition<&str, &[u8]> = TableDefinition::new("artifacts");

/// Live entities keyed by `{namespace_id}/{kind}/{entity_id}`.
pub const ENTITIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entities");

/// Deployments keyed by `{deployment_id}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Cron jobs keyed by `{cron_job_id}`.
pub const CRON_JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("cron_jobs");

/// Cron job → deployment links keyed by `{cron_job_id}:{deployment_id}`.
pub const CRON_JOB_DEPLOYMENTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("cron_job_deployments");
