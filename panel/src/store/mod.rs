//! Persistence interfaces used by the deployment orchestrator

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::PanelError;
use crate::models::activity::{ActivityLog, Notification};
use crate::models::deployment::{Deployment, DeploymentUpdate};
use crate::models::project::Project;
use crate::models::user::User;

#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Insert `deployment` unless its project already has a non-terminal one.
    ///
    /// The existence check and the insert happen atomically, so two callers
    /// racing for the same project cannot both succeed. Fails with
    /// `PanelError::Conflict` when a deploy is already in progress.
    async fn claim(&self, deployment: Deployment) -> Result<Deployment, PanelError>;

    async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>, PanelError>;

    /// Apply `update`. Records that already have `completed_at` are immutable.
    async fn update_deployment(
        &self,
        id: &str,
        update: DeploymentUpdate,
    ) -> Result<Deployment, PanelError>;

    /// Newest-first page plus the project's total deployment count
    async fn list_deployments(
        &self,
        project_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Deployment>, usize), PanelError>;

    async fn latest_deployment(&self, project_id: &str) -> Result<Option<Deployment>, PanelError>;

    /// Every non-terminal deployment across all projects
    async fn list_active(&self) -> Result<Vec<Deployment>, PanelError>;
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get_project(&self, id: &str) -> Result<Option<Project>, PanelError>;

    async fn set_last_deploy_at(&self, id: &str, at: DateTime<Utc>) -> Result<(), PanelError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, id: &str) -> Result<Option<User>, PanelError>;
}

#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn record_activity(&self, entry: ActivityLog) -> Result<(), PanelError>;

    async fn create_notification(&self, notification: Notification) -> Result<(), PanelError>;
}

/// Everything the orchestrator needs from persistence
pub trait Store: DeploymentStore + ProjectStore + UserStore + ActivityStore {}

impl<T> Store for T where T: DeploymentStore + ProjectStore + UserStore + ActivityStore {}
