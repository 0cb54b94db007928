//! Deployment models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::user::UserSummary;

/// Deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    /// Created, pipeline not yet started
    Pending,

    /// Pulling the branch from the remote
    GitPulling,

    /// Rebuilding the compose image
    Building,

    /// Bringing the compose stack up
    Deploying,

    /// Polling container health
    HealthCheck,

    Success,

    Failed,
}

impl DeploymentStatus {
    /// All statuses in which a pipeline may still be running
    pub const NON_TERMINAL: [DeploymentStatus; 5] = [
        DeploymentStatus::Pending,
        DeploymentStatus::GitPulling,
        DeploymentStatus::Building,
        DeploymentStatus::Deploying,
        DeploymentStatus::HealthCheck,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Success | DeploymentStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "PENDING",
            DeploymentStatus::GitPulling => "GIT_PULLING",
            DeploymentStatus::Building => "BUILDING",
            DeploymentStatus::Deploying => "DEPLOYING",
            DeploymentStatus::HealthCheck => "HEALTH_CHECK",
            DeploymentStatus::Success => "SUCCESS",
            DeploymentStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deployment run of one project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// Unique deployment ID
    pub id: String,

    /// Project being deployed
    pub project_id: String,

    /// User who triggered the deployment
    pub user_id: String,

    pub git_branch: String,

    pub status: DeploymentStatus,

    /// Human-readable label of the running step
    pub current_step: Option<String>,

    pub commit_before: Option<String>,
    pub commit_after: Option<String>,
    pub commit_message: Option<String>,

    /// Full newline-joined transcript, written at completion
    pub logs: Option<String>,

    /// Wall-clock seconds from start to completion
    pub duration: Option<u64>,

    /// Set only when the deployment failed
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Deployment {
    /// Create a new pending deployment
    pub fn new(id: String, project_id: String, user_id: String, git_branch: String) -> Self {
        Self {
            id,
            project_id,
            user_id,
            git_branch,
            status: DeploymentStatus::Pending,
            current_step: None,
            commit_before: None,
            commit_after: None,
            commit_message: None,
            logs: None,
            duration: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }
}

/// Partial update applied to a stored deployment
#[derive(Debug, Clone, Default)]
pub struct DeploymentUpdate {
    pub status: Option<DeploymentStatus>,
    /// `Some(None)` clears the step label
    pub current_step: Option<Option<String>>,
    pub commit_before: Option<String>,
    pub commit_after: Option<String>,
    pub commit_message: Option<String>,
    pub logs: Option<String>,
    pub duration: Option<u64>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DeploymentUpdate {
    /// Apply the update in place
    pub fn apply(self, deployment: &mut Deployment) {
        if let Some(status) = self.status {
            deployment.status = status;
        }
        if let Some(step) = self.current_step {
            deployment.current_step = step;
        }
        if self.commit_before.is_some() {
            deployment.commit_before = self.commit_before;
        }
        if self.commit_after.is_some() {
            deployment.commit_after = self.commit_after;
        }
        if self.commit_message.is_some() {
            deployment.commit_message = self.commit_message;
        }
        if self.logs.is_some() {
            deployment.logs = self.logs;
        }
        if self.duration.is_some() {
            deployment.duration = self.duration;
        }
        if self.error_message.is_some() {
            deployment.error_message = self.error_message;
        }
        // started_at is write-once
        if deployment.started_at.is_none() && self.started_at.is_some() {
            deployment.started_at = self.started_at;
        }
        if self.completed_at.is_some() {
            deployment.completed_at = self.completed_at;
        }
    }
}

/// Deployment enriched with the triggering user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentWithUser {
    #[serde(flatten)]
    pub deployment: Deployment,

    pub user: Option<UserSummary>,
}

/// A page of deployments plus the total count for the project
#[derive(Debug, Clone)]
pub struct DeploymentPage {
    pub deployments: Vec<DeploymentWithUser>,
    pub total: usize,
}
