//! deckhand-api: REST API for Deckhand.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/plans` | Queue a plan request |
//! | GET | `/api/v1/deployments/{id}` | Get a deployment |
//! | GET | `/api/v1/environments/{id}/deployments` | Deployments of an environment, newest first |
//! | GET | `/api/v1/cron-jobs` | List cron jobs |
//! | GET | `/metrics` | Prometheus exposition |
//! | GET | `/healthz` | Liveness |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use deckhand_metrics::Metrics;
use deckhand_plan::PlanGenerator;
use deckhand_state::Repository;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub repo: Arc<dyn Repository>,
    pub generator: Arc<PlanGenerator>,
    pub metrics: Arc<Metrics>,
}

/// Build the complete API router (REST + metrics + health).
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/plans", post(handlers::queue_plan))
        .route("/deployments/{id}", get(handlers::get_deployment))
        .route(
            "/environments/{id}/deployments",
            get(handlers::list_environment_deployments),
        )
        .route("/cron-jobs", get(handlers::list_cron_jobs))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
        .route("/healthz", get(handlers::healthz))
}
