//! Queue orchestrator: drives a deployment through `Queued → Scheduled →
//! Completed` across the schedule and update exchanges.
//!
//! The schedule request for a namespace stays at the head of its
//! `deploy-<namespace>` lane until the executor reports back, which keeps
//! deployments to the same namespace strictly sequential. Only `update`
//! (or a no-op schedule) deletes it.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use deckhand_blob::{BlobLocation, BlobStore};
use deckhand_metrics::Metrics;
use deckhand_plan::{EntryResult, ExecutionPlan, NamespacePlan, PlanStatus};
use deckhand_queue::{
    Command, MessageAttributes, MessageHandler, MessageQueue, OutboundMessage, QueueError,
    ReceivedMessage, execution_queue_name,
};
use deckhand_state::{DeploymentState, Repository};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::callback::Callback;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::matcher::build_execution_plan;

/// Queue names used by the orchestrator (`[queue]` section).
#[derive(Debug, Clone, Deserialize)]
pub struct QueueNames {
    #[serde(default = "default_primary")]
    pub primary: String,
    /// Execution queue per cluster; `{cluster}` is replaced by the cluster name.
    #[serde(default = "default_execution_template")]
    pub execution_template: String,
}

fn default_primary() -> String {
    "deckhand".to_string()
}

fn default_execution_template() -> String {
    "executor-{cluster}".to_string()
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            execution_template: default_execution_template(),
        }
    }
}

/// What `schedule` did with a message.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleOutcome {
    /// Plan uploaded and forwarded to the executor.
    Scheduled {
        location: BlobLocation,
        plan: ExecutionPlan,
    },
    /// Dry-run or nothing to deploy; completed without a handoff.
    Completed(ExecutionPlan),
    /// Redelivery of a message whose deployment already moved on.
    Redelivered(DeploymentState),
}

/// What `update` did with a message.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Completed {
        versions_applied: usize,
        status: PlanStatus,
    },
    /// The deployment was already completed; nothing was re-applied.
    AlreadyCompleted,
}

pub struct Orchestrator {
    repo: Arc<dyn Repository>,
    queue: Arc<dyn MessageQueue>,
    blob: Arc<dyn BlobStore>,
    callback: Arc<dyn Callback>,
    queues: QueueNames,
    metrics: Arc<Metrics>,
}

impl Orchestrator {
    pub fn new(
        repo: Arc<dyn Repository>,
        queue: Arc<dyn MessageQueue>,
        blob: Arc<dyn BlobStore>,
        callback: Arc<dyn Callback>,
        queues: QueueNames,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            repo,
            queue,
            blob,
            callback,
            queues,
            metrics,
        }
    }

    /// Handle a schedule request.
    ///
    /// Any error still deletes the inbound message so the namespace lane
    /// cannot get stuck behind it. The deployment keeps whatever state it
    /// reached.
    pub async fn schedule(&self, message: &ReceivedMessage) -> OrchestratorResult<ScheduleOutcome> {
        match self.try_schedule(message).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if let Err(delete_err) = self.delete_primary(&message.receipt_token).await {
                    warn!(
                        deployment_id = %message.attributes.deployment_id,
                        error = %delete_err,
                        "failed to delete schedule message after error"
                    );
                }
                error!(
                    deployment_id = %message.attributes.deployment_id,
                    correlation_id = %message.attributes.correlation_id,
                    error = %e,
                    "schedule failed"
                );
                Err(e)
            }
        }
    }

    async fn try_schedule(&self, message: &ReceivedMessage) -> OrchestratorResult<ScheduleOutcome> {
        let deployment_id = message.attributes.deployment_id.as_str();
        let deployment = self
            .repo
            .deployment(deployment_id)
            .await?
            .ok_or_else(|| OrchestratorError::DeploymentNotFound(deployment_id.to_string()))?;

        match deployment.state {
            DeploymentState::Queued => {}
            DeploymentState::Scheduled => {
                // Still waiting on the executor; keep the lane blocked.
                self.repo
                    .record_receipt(deployment_id, &message.receipt_token)
                    .await?;
                debug!(%deployment_id, "schedule redelivered, receipt refreshed");
                return Ok(ScheduleOutcome::Redelivered(DeploymentState::Scheduled));
            }
            DeploymentState::Completed => {
                self.delete_primary(&message.receipt_token).await?;
                debug!(%deployment_id, "schedule redelivered after completion, dropped");
                return Ok(ScheduleOutcome::Redelivered(DeploymentState::Completed));
            }
        }

        self.repo
            .record_receipt(deployment_id, &message.receipt_token)
            .await?;

        let mut namespace_plan = NamespacePlan::from_value(deployment.plan_options.clone())?;
        let deployment_type = namespace_plan.deployment_type();
        let namespace = namespace_plan.options().namespace.clone();
        let entities = self
            .repo
            .live_entities(&namespace.id, deployment_type.entity_kind())
            .await?;
        let mut plan = build_execution_plan(deployment_id, &mut namespace_plan, &entities);

        if plan.is_empty() || plan.dry_run {
            plan.status = if plan.dry_run {
                PlanStatus::Dryrun
            } else {
                PlanStatus::Complete
            };
            self.delete_primary(&message.receipt_token).await?;
            self.repo
                .transition_deployment(deployment_id, DeploymentState::Completed, None)
                .await?;
            self.metrics.deployment_noop();
            info!(
                %deployment_id,
                namespace = %namespace.name,
                dry_run = plan.dry_run,
                entries = plan.entries().count(),
                "deployment completed without handoff"
            );
            self.notify(&plan).await;
            return Ok(ScheduleOutcome::Completed(plan));
        }

        plan.status = PlanStatus::Pending;
        let body = Bytes::from(serde_json::to_vec(&plan)?);
        let location = self
            .blob
            .upload(&format!("{}/{deployment_id}.json", namespace.name), body)
            .await?;

        let execution_queue = execution_queue_name(&self.queues.execution_template, &namespace.cluster_name);
        let forward = OutboundMessage::new(
            namespace.name.clone(),
            serde_json::to_string(&location)?,
            MessageAttributes {
                correlation_id: deployment.correlation_id.clone(),
                command: deployment_type.execution_command(),
                deployment_id: deployment_id.to_string(),
            },
        );
        let forwarded_id = self.queue.send(&execution_queue, forward).await?;

        self.repo
            .transition_deployment(deployment_id, DeploymentState::Scheduled, Some(&location))
            .await?;
        self.metrics.deployment_scheduled();
        info!(
            %deployment_id,
            namespace = %namespace.name,
            %execution_queue,
            message_id = %forwarded_id,
            entries = plan.entries().count(),
            plan = %location.url,
            "deployment scheduled"
        );

        self.notify(&plan).await;
        Ok(ScheduleOutcome::Scheduled { location, plan })
    }

    /// Handle an executor report.
    pub async fn update(&self, message: &ReceivedMessage) -> OrchestratorResult<UpdateOutcome> {
        let deployment_id = message.attributes.deployment_id.as_str();
        let deployment = self
            .repo
            .deployment(deployment_id)
            .await?
            .ok_or_else(|| OrchestratorError::DeploymentNotFound(deployment_id.to_string()))?;

        if deployment.state == DeploymentState::Completed {
            info!(%deployment_id, "update for completed deployment, versions not re-applied");
            self.delete_primary(&message.receipt_token).await?;
            return Ok(UpdateOutcome::AlreadyCompleted);
        }

        let location: BlobLocation = serde_json::from_str(&message.body)?;
        let mut plan: ExecutionPlan = serde_json::from_slice(&self.blob.download(&location).await?)?;

        self.repo
            .transition_deployment(deployment_id, DeploymentState::Completed, None)
            .await?;

        let mut versions_applied = 0;
        for (kind, entry) in plan.entries() {
            if entry.result != EntryResult::Succeeded {
                continue;
            }
            self.repo
                .set_deployed_version(
                    &deployment.namespace_id,
                    kind,
                    &entry.entity_id,
                    &entry.available_version,
                )
                .await?;
            versions_applied += 1;
        }
        plan.finalize_status();
        self.metrics.deployment_completed();
        info!(
            %deployment_id,
            versions_applied,
            status = ?plan.status,
            "deployment completed"
        );

        self.notify(&plan).await;

        // Deleting the original schedule request releases the namespace lane.
        match &deployment.receipt_token {
            Some(receipt) => match self.delete_primary(receipt).await {
                Ok(()) => {}
                Err(QueueError::ReceiptNotFound(_)) => {
                    warn!(%deployment_id, "original schedule message already gone");
                }
                Err(e) => return Err(e.into()),
            },
            None => warn!(%deployment_id, "no schedule receipt recorded"),
        }
        self.delete_primary(&message.receipt_token).await?;

        Ok(UpdateOutcome::Completed {
            versions_applied,
            status: plan.status,
        })
    }

    async fn delete_primary(&self, receipt_token: &str) -> Result<(), QueueError> {
        self.queue.delete(&self.queues.primary, receipt_token).await
    }

    async fn notify(&self, plan: &ExecutionPlan) {
        let Some(url) = plan.callback_url.as_deref() else {
            return;
        };
        if let Err(e) = self.callback.post(url, plan).await {
            self.metrics.callback_failed();
            warn!(deployment_id = %plan.deployment_id, %url, error = %e, "callback failed");
        }
    }
}

#[async_trait]
impl MessageHandler for Orchestrator {
    type Error = OrchestratorError;

    async fn handle(&self, message: ReceivedMessage) -> Result<(), OrchestratorError> {
        match message.attributes.command {
            Command::ScheduleDeployment => self.schedule(&message).await.map(|_| ()),
            Command::UpdateDeployment => self.update(&message).await.map(|_| ()),
            other => {
                // Never deliverable here; drop it so its lane keeps moving.
                self.delete_primary(&message.receipt_token).await?;
                Err(OrchestratorError::UnexpectedCommand {
                    command: other.to_string(),
                    queue: self.queues.primary.clone(),
                })
            }
        }
    }
}
