//! REST API handlers.
//!
//! Every JSON response uses the `{success, data, error}` envelope.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use deckhand_plan::{ErrorKind, PlanError, PlanRequest};
use tracing::error;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    messages: Vec<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            messages: Vec::new(),
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> axum::response::Response {
    error_with_messages(msg, Vec::new(), status)
}

fn error_with_messages(msg: &str, messages: Vec<String>, status: StatusCode) -> axum::response::Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
            messages,
        }),
    )
        .into_response()
}

fn internal_error(e: impl std::fmt::Display) -> axum::response::Response {
    error!(error = %e, "request failed");
    error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::Unexpected => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ── Plans ──────────────────────────────────────────────────────

/// POST /api/v1/plans
pub async fn queue_plan(
    State(state): State<ApiState>,
    Json(request): Json<PlanRequest>,
) -> impl IntoResponse {
    match state.generator.queue_plan(&request).await {
        Ok(outcome) => (StatusCode::ACCEPTED, ApiResponse::ok(outcome)).into_response(),
        Err(e) => plan_error_response(e),
    }
}

fn plan_error_response(e: PlanError) -> axum::response::Response {
    let status = status_for(e.kind());
    let messages = e.messages().to_vec();
    error_with_messages(&e.to_string(), messages, status)
}

// ── Deployments ────────────────────────────────────────────────

/// GET /api/v1/deployments/{id}
pub async fn get_deployment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.repo.deployment(&id).await {
        Ok(Some(deployment)) => ApiResponse::ok(deployment).into_response(),
        Ok(None) => error_response("deployment not found", StatusCode::NOT_FOUND),
        Err(e) => internal_error(e),
    }
}

/// GET /api/v1/environments/{id}/deployments
pub async fn list_environment_deployments(
    State(state): State<ApiState>,
    Path(environment_id): Path<String>,
) -> impl IntoResponse {
    match state.repo.deployments_for_environment(&environment_id).await {
        Ok(deployments) => ApiResponse::ok(deployments).into_response(),
        Err(e) => internal_error(e),
    }
}

// ── Cron jobs ──────────────────────────────────────────────────

/// GET /api/v1/cron-jobs
pub async fn list_cron_jobs(State(state): State<ApiState>) -> impl IntoResponse {
    match state.repo.cron_jobs().await {
        Ok(jobs) => ApiResponse::ok(jobs).into_response(),
        Err(e) => internal_error(e),
    }
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let body = deckhand_metrics::render_prometheus(&state.metrics.snapshot());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::to_bytes;
    use chrono::Utc;
    use deckhand_metrics::Metrics;
    use deckhand_plan::{CatalogResolver, DeploymentType, PlanGenerator};
    use deckhand_queue::MemoryQueue;
    use deckhand_state::{
        Artifact, ArtifactKind, CronJob, CronState, Entity, EntityKind, Environment, Namespace,
        Repository, StateStore,
    };

    fn test_state() -> (ApiState, StateStore) {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_environment(&Environment {
                id: "env-int".to_string(),
                name: "int".to_string(),
                alias: "int".to_string(),
            })
            .unwrap();
        for (id, name, explicit) in [("ns-cvs", "cvs", false), ("ns-fin", "finance", true)] {
            store
                .put_namespace(&Namespace {
                    id: id.to_string(),
                    environment_id: "env-int".to_string(),
                    name: name.to_string(),
                    alias: name.to_string(),
                    cluster_id: "c1".to_string(),
                    cluster_name: "blue".to_string(),
                    explicit_deploy_only: explicit,
                })
                .unwrap();
        }
        store
            .put_artifact(&Artifact {
                id: "art-api".to_string(),
                name: "api".to_string(),
                kind: ArtifactKind::Service,
                feed: "releases".to_string(),
                path: "apps/api".to_string(),
            })
            .unwrap();
        store
            .put_entity(&Entity {
                id: "svc-api".to_string(),
                namespace_id: "ns-cvs".to_string(),
                kind: EntityKind::Service,
                name: "api".to_string(),
                artifact_id: "art-api".to_string(),
                requested_version: String::new(),
                deployed_version: None,
                metadata: Default::default(),
            })
            .unwrap();

        let repo: Arc<dyn Repository> = Arc::new(store.clone());
        let metrics = Arc::new(Metrics::new());
        let generator = PlanGenerator::new(
            repo.clone(),
            Arc::new(CatalogResolver::new().with_versions("releases", "apps/api", ["1.4.2"])),
            Arc::new(MemoryQueue::new(Duration::from_secs(30))),
            "deckhand",
            metrics.clone(),
        );
        (
            ApiState {
                repo,
                generator: Arc::new(generator),
                metrics,
            },
            store,
        )
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn queue_plan_accepts_and_persists() {
        let (state, store) = test_state();
        let request = PlanRequest::new("int", DeploymentType::Application);

        let resp = queue_plan(State(state.clone()), Json(request)).await.into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let body = body_json(resp).await;
        assert_eq!(body["success"], true);
        let ids = body["data"]["deployment_ids"].as_array().unwrap();
        assert_eq!(ids.len(), 1);
        assert!(body["data"]["messages"][0]
            .as_str()
            .unwrap()
            .contains("finance"));

        let id = ids[0].as_str().unwrap().to_string();
        assert!(store.get_deployment(&id).unwrap().is_some());
        let resp = get_deployment(State(state), Path(id)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_environment_is_not_found() {
        let (state, _) = test_state();
        let request = PlanRequest::new("prod", DeploymentType::Application);
        let resp = queue_plan(State(state), Json(request)).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = body_json(resp).await;
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn unknown_namespace_is_bad_request() {
        let (state, _) = test_state();
        let mut request = PlanRequest::new("int", DeploymentType::Application);
        request.namespaces = vec!["payments".to_string()];
        let resp = queue_plan(State(state.clone()), Json(request)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.metrics.snapshot().plans_rejected, 1);
    }

    #[tokio::test]
    async fn get_nonexistent_deployment() {
        let (state, _) = test_state();
        let resp = get_deployment(State(state), Path("nope".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn environment_deployments_newest_first() {
        let (state, _) = test_state();
        for _ in 0..2 {
            let request = PlanRequest::new("int", DeploymentType::Application);
            queue_plan(State(state.clone()), Json(request)).await.into_response();
        }
        let resp = list_environment_deployments(State(state), Path("env-int".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        let rows = body["data"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0]["created_at"].as_str() >= rows[1]["created_at"].as_str());
    }

    #[tokio::test]
    async fn cron_jobs_listed() {
        let (state, store) = test_state();
        store
            .put_cron_job(&CronJob {
                id: "nightly".to_string(),
                description: "nightly redeploy".to_string(),
                plan_options: serde_json::to_value(PlanRequest::new("int", DeploymentType::Restart))
                    .unwrap(),
                schedule: "0 3 * * *".to_string(),
                last_run: Some(Utc::now()),
                state: CronState::Idle,
                disabled: false,
                execution_order: 0,
                locked_at: None,
            })
            .unwrap();

        let resp = list_cron_jobs(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["data"][0]["id"], "nightly");
    }

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let (state, _) = test_state();
        state.metrics.deployment_scheduled();
        let resp = prometheus_metrics(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("deckhand_deployments_scheduled_total 1"));
    }
}
