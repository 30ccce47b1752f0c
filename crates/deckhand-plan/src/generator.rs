//! Plan generator: turns a plan request into queued per-namespace deployments.
//!
//! Validation happens up front (environment, namespaces, artifacts,
//! versions). Queueing then walks the resolved namespaces one by one: each
//! gets a `Queued` deployment row and a schedule request on its
//! `deploy-<namespace>` lane. That walk is not transactional; namespaces
//! queued before a failure stay queued.

use std::sync::Arc;

use chrono::Utc;
use deckhand_metrics::Metrics;
use deckhand_queue::{Command, MessageAttributes, MessageQueue, OutboundMessage, deploy_group};
use deckhand_state::{
    Artifact, Deployment, DeploymentId, DeploymentState, Environment, Namespace, NamespaceId,
    Repository,
};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{ErrorKind, PlanError, PlanResult};
use crate::model::{ArtifactDefinition, NamespacePlan, NamespaceTarget, PlanOptions, PlanRequest};
use crate::resolver::{ResolveError, VersionResolver};
use crate::version::{compare_versions, normalize_pattern};

/// Result of a successful plan request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanOutcome {
    /// One id per targeted namespace.
    pub deployment_ids: Vec<DeploymentId>,
    /// Informational messages (skipped namespaces, unresolvable artifacts).
    pub messages: Vec<String>,
}

pub struct PlanGenerator {
    repo: Arc<dyn Repository>,
    resolver: Arc<dyn VersionResolver>,
    queue: Arc<dyn MessageQueue>,
    primary_queue: String,
    metrics: Arc<Metrics>,
}

impl PlanGenerator {
    pub fn new(
        repo: Arc<dyn Repository>,
        resolver: Arc<dyn VersionResolver>,
        queue: Arc<dyn MessageQueue>,
        primary_queue: impl Into<String>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            repo,
            resolver,
            queue,
            primary_queue: primary_queue.into(),
            metrics,
        }
    }

    /// Validate `request` and queue one deployment per target namespace.
    pub async fn queue_plan(&self, request: &PlanRequest) -> PlanResult<PlanOutcome> {
        match self.generate(request).await {
            Ok(outcome) => {
                self.metrics.plan_queued(outcome.deployment_ids.len());
                Ok(outcome)
            }
            Err(e) => {
                if e.kind() == ErrorKind::Unexpected {
                    error!(environment = %request.environment, error = %e, "plan generation failed");
                } else {
                    self.metrics.plan_rejected();
                    warn!(environment = %request.environment, error = %e, "plan request rejected");
                }
                Err(e)
            }
        }
    }

    async fn generate(&self, request: &PlanRequest) -> PlanResult<PlanOutcome> {
        let mut messages = Vec::new();

        let environment = self
            .repo
            .environment_by_name(&request.environment)
            .await?
            .ok_or_else(|| PlanError::NotFound(format!("environment {}", request.environment)))?;

        let namespaces = self
            .resolve_namespaces(&environment, request, &mut messages)
            .await?;
        let mut artifacts = self
            .resolve_artifacts(&environment, &namespaces, request, &mut messages)
            .await?;
        if artifacts.is_empty() {
            return Err(PlanError::bad_request(
                format!("no deployable artifacts in environment {}", environment.name),
                messages,
            ));
        }
        artifacts.sort_by(|a, b| compare_versions(&b.available_version, &a.available_version));

        let correlation_id = request
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut deployment_ids = Vec::with_capacity(namespaces.len());
        for namespace in &namespaces {
            match self
                .queue_namespace(&environment, namespace, &artifacts, request, &correlation_id)
                .await
            {
                Ok(id) => deployment_ids.push(id),
                Err(e) => {
                    error!(
                        namespace = %namespace.name,
                        queued = ?deployment_ids,
                        error = %e,
                        "plan partially queued"
                    );
                    return Err(e);
                }
            }
        }

        info!(
            environment = %environment.name,
            %correlation_id,
            deployment_type = request.deployment_type.as_str(),
            deployments = deployment_ids.len(),
            artifacts = artifacts.len(),
            "plan queued"
        );
        Ok(PlanOutcome {
            deployment_ids,
            messages,
        })
    }

    async fn resolve_namespaces(
        &self,
        environment: &Environment,
        request: &PlanRequest,
        messages: &mut Vec<String>,
    ) -> PlanResult<Vec<Namespace>> {
        let all = self.repo.namespaces_for_environment(&environment.id).await?;
        if all.is_empty() {
            return Err(PlanError::bad_request(
                format!("environment {} has no namespaces", environment.name),
                std::mem::take(messages),
            ));
        }

        if !request.namespaces.is_empty() {
            let unknown: Vec<&str> = request
                .namespaces
                .iter()
                .filter(|alias| !all.iter().any(|ns| &ns.alias == *alias))
                .map(String::as_str)
                .collect();
            if !unknown.is_empty() {
                return Err(PlanError::bad_request(
                    format!(
                        "namespaces not in environment {}: {}",
                        environment.name,
                        unknown.join(", ")
                    ),
                    std::mem::take(messages),
                ));
            }
            return Ok(all
                .into_iter()
                .filter(|ns| request.namespaces.contains(&ns.alias))
                .collect());
        }

        let mut selected = Vec::with_capacity(all.len());
        for namespace in all {
            if namespace.explicit_deploy_only {
                messages.push(format!(
                    "namespace {} skipped: deployed only when named explicitly",
                    namespace.alias
                ));
            } else {
                selected.push(namespace);
            }
        }
        if selected.is_empty() {
            return Err(PlanError::bad_request(
                format!("no eligible namespaces in environment {}", environment.name),
                std::mem::take(messages),
            ));
        }
        Ok(selected)
    }

    async fn resolve_artifacts(
        &self,
        environment: &Environment,
        namespaces: &[Namespace],
        request: &PlanRequest,
        messages: &mut Vec<String>,
    ) -> PlanResult<Vec<ArtifactDefinition>> {
        let kind = request.deployment_type.artifact_kind();

        let candidates: Vec<(Artifact, String)> = if request.artifacts.is_empty() {
            let ids: Vec<NamespaceId> = namespaces.iter().map(|ns| ns.id.clone()).collect();
            self.repo
                .artifacts_for_namespaces(kind, &ids)
                .await?
                .into_iter()
                .map(|requirement| (requirement.artifact, requirement.requested_version))
                .collect()
        } else {
            if namespaces.len() > 1 {
                return Err(PlanError::bad_request(
                    format!(
                        "explicitly named artifacts can target only one namespace, {} resolved",
                        namespaces.len()
                    ),
                    std::mem::take(messages),
                ));
            }
            let mut named = Vec::with_capacity(request.artifacts.len());
            for requested in &request.artifacts {
                let artifact = self
                    .repo
                    .artifact_by_name(&environment.id, kind, &requested.name)
                    .await?
                    .ok_or_else(|| {
                        PlanError::NotFound(format!("{} artifact {}", kind.as_str(), requested.name))
                    })?;
                named.push((artifact, requested.version.clone().unwrap_or_default()));
            }
            named
        };

        let mut definitions = Vec::with_capacity(candidates.len());
        for (artifact, requested_version) in candidates {
            let pattern = normalize_pattern(&requested_version);
            match self
                .resolver
                .resolve(&artifact.feed, &artifact.path, &pattern)
                .await
            {
                Ok(available_version) => {
                    debug!(artifact = %artifact.name, %pattern, %available_version, "artifact resolved");
                    definitions.push(ArtifactDefinition {
                        artifact_id: artifact.id,
                        name: artifact.name,
                        feed: artifact.feed,
                        path: artifact.path,
                        requested_version,
                        pattern,
                        available_version,
                        matched: false,
                    });
                }
                Err(ResolveError::NotFound { .. }) => {
                    messages.push(format!(
                        "artifact {}: no version matching {pattern} in {}/{}",
                        artifact.name, artifact.feed, artifact.path
                    ));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(definitions)
    }

    async fn queue_namespace(
        &self,
        environment: &Environment,
        namespace: &Namespace,
        artifacts: &[ArtifactDefinition],
        request: &PlanRequest,
        correlation_id: &str,
    ) -> PlanResult<DeploymentId> {
        let plan = NamespacePlan::new(
            request.deployment_type,
            PlanOptions {
                namespace: NamespaceTarget::from(namespace),
                environment: environment.into(),
                artifacts: artifacts.to_vec(),
                artifacts_supplied: !request.artifacts.is_empty(),
                force_redeploy: request.force_redeploy,
                dry_run: request.dry_run,
                callback_url: request.callback_url.clone(),
                metadata: request.metadata.clone(),
            },
        );

        let now = Utc::now();
        let deployment = Deployment {
            id: Uuid::new_v4().to_string(),
            environment_id: environment.id.clone(),
            namespace_id: namespace.id.clone(),
            message_id: None,
            receipt_token: None,
            correlation_id: correlation_id.to_string(),
            plan_options: plan.to_value()?,
            plan_location: None,
            state: DeploymentState::Queued,
            user: request.user.clone(),
            created_at: now,
            updated_at: now,
        };
        self.repo.insert_deployment(&deployment).await?;

        let message = OutboundMessage::new(
            deploy_group(&namespace.name),
            deployment.id.clone(),
            MessageAttributes {
                correlation_id: correlation_id.to_string(),
                command: Command::ScheduleDeployment,
                deployment_id: deployment.id.clone(),
            },
        );
        let message_id = self.queue.send(&self.primary_queue, message).await?;
        self.repo
            .record_message_id(&deployment.id, &message_id)
            .await?;

        debug!(
            deployment_id = %deployment.id,
            namespace = %namespace.name,
            %message_id,
            "namespace deployment queued"
        );
        Ok(deployment.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArtifactRequest, DeploymentType};
    use crate::resolver::CatalogResolver;
    use async_trait::async_trait;
    use deckhand_queue::{MemoryQueue, QueueError, QueueResult, ReceivedMessage};
    use deckhand_state::{ArtifactKind, Entity, EntityKind, StateStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const PRIMARY: &str = "deckhand";

    struct Fixture {
        store: StateStore,
        queue: Arc<MemoryQueue>,
        metrics: Arc<Metrics>,
        generator: PlanGenerator,
    }

    fn namespace(id: &str, name: &str, explicit_only: bool) -> Namespace {
        Namespace {
            id: id.to_string(),
            environment_id: "env-int".to_string(),
            name: name.to_string(),
            alias: name.to_string(),
            cluster_id: "c1".to_string(),
            cluster_name: "blue".to_string(),
            explicit_deploy_only: explicit_only,
        }
    }

    fn service(ns: &str, id: &str, artifact: &str) -> Entity {
        Entity {
            id: id.to_string(),
            namespace_id: ns.to_string(),
            kind: EntityKind::Service,
            name: id.to_string(),
            artifact_id: artifact.to_string(),
            requested_version: String::new(),
            deployed_version: None,
            metadata: Default::default(),
        }
    }

    fn fixture(namespaces: &[Namespace]) -> Fixture {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_environment(&Environment {
                id: "env-int".to_string(),
                name: "int".to_string(),
                alias: "integration".to_string(),
            })
            .unwrap();
        for (id, name) in [("art-api", "api"), ("art-web", "web")] {
            store
                .put_artifact(&Artifact {
                    id: id.to_string(),
                    name: name.to_string(),
                    kind: ArtifactKind::Service,
                    feed: "releases".to_string(),
                    path: format!("apps/{name}"),
                })
                .unwrap();
        }
        for ns in namespaces {
            store.put_namespace(ns).unwrap();
            store.put_entity(&service(&ns.id, "api", "art-api")).unwrap();
        }

        let resolver = CatalogResolver::new()
            .with_versions("releases", "apps/api", ["2.3.1", "2.3.9", "2.4.0"])
            .with_versions("releases", "apps/web", ["2.9.0", "2.10.0"]);
        let queue = Arc::new(MemoryQueue::new(Duration::from_secs(30)));
        let metrics = Arc::new(Metrics::new());
        let generator = PlanGenerator::new(
            Arc::new(store.clone()),
            Arc::new(resolver),
            queue.clone(),
            PRIMARY,
            metrics.clone(),
        );
        Fixture {
            store,
            queue,
            metrics,
            generator,
        }
    }

    fn request() -> PlanRequest {
        let mut request = PlanRequest::new("int", DeploymentType::Application);
        request.user = "alice".to_string();
        request
    }

    #[tokio::test]
    async fn one_deployment_per_namespace() {
        let namespaces: Vec<Namespace> = (0..4)
            .map(|i| namespace(&format!("ns-{i}"), &format!("team{i}"), false))
            .collect();
        let f = fixture(&namespaces);

        let outcome = f.generator.queue_plan(&request()).await.unwrap();
        assert_eq!(outcome.deployment_ids.len(), 4);
        assert_eq!(f.queue.len(PRIMARY).await, 4);

        for id in &outcome.deployment_ids {
            let d = f.store.get_deployment(id).unwrap().unwrap();
            assert_eq!(d.state, DeploymentState::Queued);
            assert!(d.message_id.is_some());
            assert_eq!(d.user, "alice");
        }
        assert_eq!(f.metrics.snapshot().deployments_queued, 4);
    }

    #[tokio::test]
    async fn explicit_only_namespaces_are_skipped() {
        let f = fixture(&[
            namespace("ns-cvs", "cvs", false),
            namespace("ns-fin", "finance", true),
        ]);

        let outcome = f.generator.queue_plan(&request()).await.unwrap();
        assert_eq!(outcome.deployment_ids.len(), 1);
        assert!(outcome.messages.iter().any(|m| m.contains("finance")));

        let d = f.store.get_deployment(&outcome.deployment_ids[0]).unwrap().unwrap();
        assert_eq!(d.namespace_id, "ns-cvs");
        let groups: Vec<String> = f
            .queue
            .messages(PRIMARY)
            .await
            .into_iter()
            .map(|m| m.group_id)
            .collect();
        assert_eq!(groups, vec!["deploy-cvs".to_string()]);
    }

    #[tokio::test]
    async fn naming_an_explicit_only_namespace_targets_it() {
        let f = fixture(&[
            namespace("ns-cvs", "cvs", false),
            namespace("ns-fin", "finance", true),
        ]);
        let mut req = request();
        req.namespaces = vec!["finance".to_string()];

        let outcome = f.generator.queue_plan(&req).await.unwrap();
        let d = f.store.get_deployment(&outcome.deployment_ids[0]).unwrap().unwrap();
        assert_eq!(d.namespace_id, "ns-fin");
    }

    #[tokio::test]
    async fn unknown_environment_is_not_found() {
        let f = fixture(&[namespace("ns-cvs", "cvs", false)]);
        let mut req = request();
        req.environment = "prod".to_string();

        let err = f.generator.queue_plan(&req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(f.metrics.snapshot().plans_rejected, 1);
    }

    #[tokio::test]
    async fn unknown_alias_is_bad_request() {
        let f = fixture(&[namespace("ns-cvs", "cvs", false)]);
        let mut req = request();
        req.namespaces = vec!["cvs".to_string(), "payments".to_string()];

        let err = f.generator.queue_plan(&req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert!(err.to_string().contains("payments"));
        assert!(f.queue.is_empty(PRIMARY).await);
    }

    #[tokio::test]
    async fn environment_without_namespaces_is_bad_request() {
        let f = fixture(&[]);
        let err = f.generator.queue_plan(&request()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn only_explicit_namespaces_is_bad_request_with_messages() {
        let f = fixture(&[namespace("ns-fin", "finance", true)]);
        let err = f.generator.queue_plan(&request()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(err.messages().len(), 1);
    }

    #[tokio::test]
    async fn named_artifact_resolves_requested_prefix() {
        let f = fixture(&[namespace("ns-cvs", "cvs", false)]);
        let mut req = request();
        req.artifacts = vec![ArtifactRequest {
            name: "api".to_string(),
            version: Some("2.3".to_string()),
        }];

        let outcome = f.generator.queue_plan(&req).await.unwrap();
        let d = f.store.get_deployment(&outcome.deployment_ids[0]).unwrap().unwrap();
        let plan = NamespacePlan::from_value(d.plan_options).unwrap();
        let options = plan.options();
        assert!(options.artifacts_supplied);
        assert_eq!(options.artifacts.len(), 1);
        assert_eq!(options.artifacts[0].available_version, "2.3.9");
        assert_eq!(options.artifacts[0].pattern, "2.3.*");
    }

    #[tokio::test]
    async fn named_artifact_not_used_in_environment_is_not_found() {
        let f = fixture(&[namespace("ns-cvs", "cvs", false)]);
        let mut req = request();
        // Exists as an artifact but no entity in `int` uses it.
        req.artifacts = vec![ArtifactRequest {
            name: "web".to_string(),
            version: None,
        }];

        let err = f.generator.queue_plan(&req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn named_artifacts_cannot_fan_out() {
        let f = fixture(&[
            namespace("ns-cvs", "cvs", false),
            namespace("ns-ops", "ops", false),
        ]);
        let mut req = request();
        req.artifacts = vec![ArtifactRequest {
            name: "api".to_string(),
            version: None,
        }];

        let err = f.generator.queue_plan(&req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert!(f.queue.is_empty(PRIMARY).await);
    }

    #[tokio::test]
    async fn unresolvable_versions_are_messages_then_bad_request() {
        let f = fixture(&[namespace("ns-cvs", "cvs", false)]);
        let mut req = request();
        req.artifacts = vec![ArtifactRequest {
            name: "api".to_string(),
            version: Some("9".to_string()),
        }];

        let err = f.generator.queue_plan(&req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert!(err.messages()[0].contains("9.*"));
    }

    #[tokio::test]
    async fn discovered_artifacts_are_sorted_by_version() {
        let f = fixture(&[namespace("ns-cvs", "cvs", false)]);
        f.store.put_entity(&service("ns-cvs", "web", "art-web")).unwrap();

        let outcome = f.generator.queue_plan(&request()).await.unwrap();
        let d = f.store.get_deployment(&outcome.deployment_ids[0]).unwrap().unwrap();
        let plan = NamespacePlan::from_value(d.plan_options).unwrap();
        let versions: Vec<&str> = plan
            .options()
            .artifacts
            .iter()
            .map(|a| a.available_version.as_str())
            .collect();
        assert_eq!(versions, vec!["2.10.0", "2.4.0"]);
        assert!(!plan.options().artifacts_supplied);
    }

    #[tokio::test]
    async fn schedule_messages_carry_attributes() {
        let f = fixture(&[namespace("ns-cvs", "cvs", false)]);
        let mut req = request();
        req.correlation_id = Some("corr-42".to_string());

        let outcome = f.generator.queue_plan(&req).await.unwrap();
        let sent = f.queue.messages(PRIMARY).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].attributes.command, Command::ScheduleDeployment);
        assert_eq!(sent[0].attributes.correlation_id, "corr-42");
        assert_eq!(sent[0].attributes.deployment_id, outcome.deployment_ids[0]);
    }

    #[tokio::test]
    async fn discovered_artifacts_carry_each_requested_line() {
        let f = fixture(&[namespace("ns-cvs", "cvs", false)]);
        let mut pinned = service("ns-cvs", "api-legacy", "art-api");
        pinned.requested_version = "2.3".to_string();
        f.store.put_entity(&pinned).unwrap();
        // Same line as the pinned entity, deduplicated.
        let mut pinned_twin = service("ns-cvs", "api-legacy-2", "art-api");
        pinned_twin.requested_version = "2.3".to_string();
        f.store.put_entity(&pinned_twin).unwrap();

        let outcome = f.generator.queue_plan(&request()).await.unwrap();
        let d = f.store.get_deployment(&outcome.deployment_ids[0]).unwrap().unwrap();
        let plan = NamespacePlan::from_value(d.plan_options).unwrap();
        let resolved: Vec<(&str, &str)> = plan
            .options()
            .artifacts
            .iter()
            .map(|a| (a.pattern.as_str(), a.available_version.as_str()))
            .collect();
        assert_eq!(resolved, vec![("*", "2.4.0"), ("2.3.*", "2.3.9")]);
    }

    /// Delivers the first `succeed` sends, then fails every send after.
    struct FlakyQueue {
        inner: Arc<MemoryQueue>,
        succeed: usize,
        sends: AtomicUsize,
    }

    #[async_trait]
    impl MessageQueue for FlakyQueue {
        async fn send(&self, queue: &str, message: OutboundMessage) -> QueueResult<String> {
            if self.sends.fetch_add(1, Ordering::SeqCst) >= self.succeed {
                return Err(QueueError::Transport("broker unavailable".to_string()));
            }
            self.inner.send(queue, message).await
        }

        async fn receive(&self, queue: &str, max: usize) -> QueueResult<Vec<ReceivedMessage>> {
            self.inner.receive(queue, max).await
        }

        async fn delete(&self, queue: &str, receipt_token: &str) -> QueueResult<()> {
            self.inner.delete(queue, receipt_token).await
        }
    }

    #[tokio::test]
    async fn failed_enqueue_keeps_earlier_namespaces_queued() {
        let f = fixture(&[
            namespace("ns-a", "alpha", false),
            namespace("ns-b", "beta", false),
        ]);
        let flaky = Arc::new(FlakyQueue {
            inner: f.queue.clone(),
            succeed: 1,
            sends: AtomicUsize::new(0),
        });
        let generator = PlanGenerator::new(
            Arc::new(f.store.clone()),
            Arc::new(
                CatalogResolver::new().with_versions("releases", "apps/api", ["2.3.1", "2.4.0"]),
            ),
            flaky,
            PRIMARY,
            f.metrics.clone(),
        );

        let err = generator.queue_plan(&request()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
        assert_eq!(f.metrics.snapshot().plans_rejected, 0);

        let sent = f.queue.messages(PRIMARY).await;
        assert_eq!(sent.len(), 1);
        let first = f
            .store
            .get_deployment(&sent[0].attributes.deployment_id)
            .unwrap()
            .unwrap();
        assert_eq!(first.state, DeploymentState::Queued);
        assert!(first.message_id.is_some());

        // The second row was written before its send failed; it never got a message.
        let rows = f.store.deployments_for_environment("env-int").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.iter().filter(|d| d.message_id.is_some()).count(), 1);
        assert!(rows.iter().all(|d| d.state == DeploymentState::Queued));
    }
}
