//! Match live entities against resolved artifact definitions.

use deckhand_plan::{
    DeploymentType, ExecutionPlan, NamespacePlan, PlanEntry, matches_pattern, normalize_pattern,
};
use deckhand_state::Entity;
use tracing::debug;

/// Build the execution plan for one namespace.
///
/// Entities are matched to definitions through the artifact they run, both
/// for discovered and for explicitly named artifacts (the generator has
/// already resolved names to environment-scoped ids). Definitions are
/// expected highest version first, so the first definition an entity
/// accepts is the highest eligible one. Definitions consumed by an entity
/// are marked `matched` on `plan`.
pub fn build_execution_plan(
    deployment_id: &str,
    plan: &mut NamespacePlan,
    entities: &[Entity],
) -> ExecutionPlan {
    let mut execution = ExecutionPlan::new(deployment_id, plan);
    let deployment_type = plan.deployment_type();
    let options = plan.options_mut();
    let by_name = options.artifacts_supplied;

    for entity in entities {
        let accepts = normalize_pattern(&entity.requested_version);
        let mut candidates = options
            .artifacts
            .iter_mut()
            .filter(|definition| definition.artifact_id == entity.artifact_id);

        let Some(definition) = candidates.find(|d| matches_pattern(&d.available_version, &accepts))
        else {
            if options.artifacts.iter().any(|d| d.artifact_id == entity.artifact_id) {
                execution.messages.push(format!(
                    "{}: no resolved version satisfies requested {}",
                    entity.name, accepts
                ));
            }
            continue;
        };
        definition.matched = true;

        let up_to_date = entity.deployed_version.as_deref() == Some(definition.available_version.as_str());
        if up_to_date && !options.force_redeploy && deployment_type != DeploymentType::Restart {
            execution.messages.push(format!(
                "{}: already up to date at {}",
                entity.name, definition.available_version
            ));
            continue;
        }

        let mut metadata = entity.metadata.clone();
        metadata.extend(options.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        debug!(
            entity = %entity.name,
            from = ?entity.deployed_version,
            to = %definition.available_version,
            "entity marked for deployment"
        );
        execution.push_entry(
            entity.kind,
            PlanEntry {
                entity_id: entity.id.clone(),
                name: entity.name.clone(),
                artifact_id: definition.artifact_id.clone(),
                artifact_name: definition.name.clone(),
                feed: definition.feed.clone(),
                path: definition.path.clone(),
                requested_version: entity.requested_version.clone(),
                deployed_version: entity.deployed_version.clone(),
                available_version: definition.available_version.clone(),
                metadata,
                result: Default::default(),
            },
        );
    }

    if by_name && deployment_type != DeploymentType::Restart {
        for definition in options.artifacts.iter().filter(|d| !d.matched) {
            execution.messages.push(format!(
                "artifact {} unmatched: no live {} in namespace {} accepts {}",
                definition.name,
                deployment_type.entity_kind().as_str(),
                options.namespace.name,
                definition.available_version
            ));
        }
    }

    execution
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckhand_plan::{ArtifactDefinition, EnvironmentRef, NamespaceTarget, PlanOptions};
    use deckhand_state::EntityKind;
    use std::collections::BTreeMap;

    fn definition(id: &str, name: &str, version: &str) -> ArtifactDefinition {
        ArtifactDefinition {
            artifact_id: id.to_string(),
            name: name.to_string(),
            feed: "releases".to_string(),
            path: format!("apps/{name}"),
            requested_version: String::new(),
            pattern: "*".to_string(),
            available_version: version.to_string(),
            matched: false,
        }
    }

    fn entity(name: &str, artifact: &str, requested: &str, deployed: Option<&str>) -> Entity {
        Entity {
            id: format!("svc-{name}"),
            namespace_id: "ns-cvs".to_string(),
            kind: EntityKind::Service,
            name: name.to_string(),
            artifact_id: artifact.to_string(),
            requested_version: requested.to_string(),
            deployed_version: deployed.map(str::to_string),
            metadata: BTreeMap::from([("replicas".to_string(), "2".to_string())]),
        }
    }

    fn plan(
        deployment_type: DeploymentType,
        artifacts: Vec<ArtifactDefinition>,
        supplied: bool,
    ) -> NamespacePlan {
        NamespacePlan::new(
            deployment_type,
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
                    alias: "int".to_string(),
                },
                artifacts,
                artifacts_supplied: supplied,
                force_redeploy: false,
                dry_run: false,
                callback_url: None,
                metadata: BTreeMap::from([("region".to_string(), "eu".to_string())]),
            },
        )
    }

    #[test]
    fn picks_highest_version_the_entity_accepts() {
        let mut p = plan(
            DeploymentType::Application,
            vec![
                definition("art-api", "api", "2.4.0"),
                definition("art-api", "api", "2.3.9"),
            ],
            false,
        );
        let entities = [entity("api", "art-api", "2.3", Some("2.3.1"))];

        let exec = build_execution_plan("dep-1", &mut p, &entities);
        assert_eq!(exec.services.len(), 1);
        assert_eq!(exec.services[0].available_version, "2.3.9");
        assert_eq!(exec.services[0].metadata.get("replicas").map(String::as_str), Some("2"));
        assert_eq!(exec.services[0].metadata.get("region").map(String::as_str), Some("eu"));
        assert!(p.options().artifacts[1].matched);
        assert!(!p.options().artifacts[0].matched);
    }

    #[test]
    fn up_to_date_entities_are_skipped_but_matched() {
        let mut p = plan(
            DeploymentType::Application,
            vec![definition("art-api", "api", "2.3.9")],
            true,
        );
        let entities = [entity("api", "art-api", "", Some("2.3.9"))];

        let exec = build_execution_plan("dep-1", &mut p, &entities);
        assert!(exec.is_empty());
        assert!(exec.messages[0].contains("already up to date"));
        // Matched, so not reported as unmatched.
        assert_eq!(exec.messages.len(), 1);
    }

    #[test]
    fn force_redeploys_up_to_date_entities() {
        let mut p = plan(
            DeploymentType::Application,
            vec![definition("art-api", "api", "2.3.9")],
            false,
        );
        p.options_mut().force_redeploy = true;
        let entities = [entity("api", "art-api", "", Some("2.3.9"))];

        let exec = build_execution_plan("dep-1", &mut p, &entities);
        assert_eq!(exec.services.len(), 1);
    }

    #[test]
    fn explicit_artifacts_match_by_artifact_and_report_unmatched() {
        let mut p = plan(
            DeploymentType::Application,
            vec![
                definition("art-api", "api", "2.3.9"),
                definition("art-web", "web", "2.10.0"),
            ],
            true,
        );
        let entities = [
            // Shares the artifact name but runs a different artifact.
            entity("api", "art-other", "", None),
            entity("gateway", "art-api", "", None),
            entity("web", "art-web", "2.9", None),
        ];

        let exec = build_execution_plan("dep-1", &mut p, &entities);
        assert_eq!(exec.services.len(), 1);
        assert_eq!(exec.services[0].name, "gateway");
        assert_eq!(exec.services[0].artifact_name, "api");
        assert!(exec.messages.iter().any(|m| m.contains("web: no resolved version")));
        assert!(exec.messages.iter().any(|m| m.starts_with("artifact web unmatched")));
        assert!(!exec.messages.iter().any(|m| m.starts_with("artifact api unmatched")));
    }

    #[test]
    fn restart_always_redeploys_and_never_reports_unmatched() {
        let mut p = plan(
            DeploymentType::Restart,
            vec![
                definition("art-api", "api", "2.3.9"),
                definition("art-web", "web", "2.10.0"),
            ],
            true,
        );
        let entities = [entity("api", "art-api", "", Some("2.3.9"))];

        let exec = build_execution_plan("dep-1", &mut p, &entities);
        assert_eq!(exec.services.len(), 1);
        assert!(exec.messages.is_empty());
    }

    #[test]
    fn discovered_artifacts_match_by_id() {
        let mut p = plan(
            DeploymentType::Application,
            vec![definition("art-api", "api", "2.3.9")],
            false,
        );
        let entities = [
            entity("api-east", "art-api", "", None),
            entity("api-west", "art-api", "", None),
            entity("billing", "art-billing", "", None),
        ];

        let exec = build_execution_plan("dep-1", &mut p, &entities);
        let names: Vec<&str> = exec.services.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["api-east", "api-west"]);
        assert!(exec.messages.is_empty());
    }
}
