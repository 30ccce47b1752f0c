//! Best-effort plan notifications to caller-supplied URLs.

use std::time::Duration;

use async_trait::async_trait;
use deckhand_plan::ExecutionPlan;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("callback transport error: {0}")]
    Transport(String),

    #[error("callback returned status {0}")]
    Status(u16),
}

/// Posts a plan to a URL. Failures are reported but never retried.
#[async_trait]
pub trait Callback: Send + Sync {
    async fn post(&self, url: &str, plan: &ExecutionPlan) -> Result<(), CallbackError>;
}

/// Callback configuration (`[callback]` section).
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    5
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// JSON POST over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpCallback {
    client: Client,
}

impl HttpCallback {
    pub fn new(config: &CallbackConfig) -> Result<Self, CallbackError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| CallbackError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Callback for HttpCallback {
    async fn post(&self, url: &str, plan: &ExecutionPlan) -> Result<(), CallbackError> {
        let response = self
            .client
            .post(url)
            .json(plan)
            .send()
            .await
            .map_err(|e| CallbackError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CallbackError::Status(status.as_u16()));
        }
        debug!(%url, deployment_id = %plan.deployment_id, "callback delivered");
        Ok(())
    }
}
