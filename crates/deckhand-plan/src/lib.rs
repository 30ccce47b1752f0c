//! deckhand-plan: from a plan request to queued deployments.
//!
//! # Architecture
//!
//! ```text
//! PlanRequest
//!   └── PlanGenerator::queue_plan()
//!         ├── Repository      → environment, namespaces, artifacts
//!         ├── VersionResolver → concrete versions (version::normalize_pattern)
//!         ├── Repository      → one Queued Deployment per namespace
//!         └── MessageQueue    → schedule-deployment on deploy-<namespace>
//! ```
//!
//! The [`model`] module also holds [`ExecutionPlan`], the payload the
//! orchestrator builds from a [`NamespacePlan`].

pub mod error;
pub mod generator;
pub mod model;
pub mod resolver;
pub mod version;

pub use error::{ErrorKind, PlanError, PlanResult};
pub use generator::{PlanGenerator, PlanOutcome};
pub use model::{
    ArtifactDefinition, ArtifactRequest, DeploymentType, EntryResult, EnvironmentRef,
    ExecutionPlan, NamespacePlan, NamespaceTarget, PlanEntry, PlanOptions, PlanRequest, PlanStatus,
};
pub use resolver::{
    CatalogResolver, FeedResolver, ResolveError, ResolverBackend, ResolverConfig, VersionResolver,
    build_resolver,
};
pub use version::{compare_versions, matches_pattern, normalize_pattern};
