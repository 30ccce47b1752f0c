//! Message shapes exchanged over the primary and execution queues.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Command attribute carried by every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Command {
    /// Primary queue: build and hand off a namespace plan.
    ScheduleDeployment,
    /// Primary queue: the executor reports a finished plan.
    UpdateDeployment,
    DeployApplication,
    DeployMigration,
    RunJob,
    RestartApplication,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::ScheduleDeployment => "schedule-deployment",
            Command::UpdateDeployment => "update-deployment",
            Command::DeployApplication => "deploy-application",
            Command::DeployMigration => "deploy-migration",
            Command::RunJob => "run-job",
            Command::RestartApplication => "restart-application",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "schedule-deployment" => Ok(Command::ScheduleDeployment),
            "update-deployment" => Ok(Command::UpdateDeployment),
            "deploy-application" => Ok(Command::DeployApplication),
            "deploy-migration" => Ok(Command::DeployMigration),
            "run-job" => Ok(Command::RunJob),
            "restart-application" => Ok(Command::RestartApplication),
            other => Err(format!("unknown command: {other}")),
        }
    }
}

/// Attributes attached to every message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAttributes {
    pub correlation_id: String,
    pub command: Command,
    pub deployment_id: String,
}

/// A message about to be sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// FIFO lane; only the head of a group is ever deliverable.
    pub group_id: String,
    pub body: String,
    pub attributes: MessageAttributes,
}

impl OutboundMessage {
    pub fn new(group_id: impl Into<String>, body: impl Into<String>, attributes: MessageAttributes) -> Self {
        Self {
            group_id: group_id.into(),
            body: body.into(),
            attributes,
        }
    }
}

/// A delivered message. `receipt_token` identifies this delivery, not the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub receipt_token: String,
    pub group_id: String,
    pub body: String,
    pub attributes: MessageAttributes,
    /// 1 on first delivery.
    pub receive_count: u32,
}

/// Group id of schedule requests on the primary queue.
pub fn deploy_group(namespace: &str) -> String {
    format!("deploy-{namespace}")
}

/// Group id of executor reports on the primary queue.
///
/// Distinct from [`deploy_group`]: the schedule request stays at the head of
/// the deploy lane until the report arrives.
pub fn update_group(namespace: &str) -> String {
    format!("update-{namespace}")
}

/// Name of a cluster's execution queue, from a template containing `{cluster}`.
pub fn execution_queue_name(template: &str, cluster: &str) -> String {
    template.replace("{cluster}", cluster)
}
