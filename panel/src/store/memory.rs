//! In-memory store with an optional JSON snapshot on disk

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::errors::PanelError;
use crate::filesys::file::File;
use crate::models::activity::{ActivityLog, Notification};
use crate::models::deployment::{Deployment, DeploymentUpdate};
use crate::models::project::Project;
use crate::models::user::User;
use crate::store::{ActivityStore, DeploymentStore, ProjectStore, UserStore};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    projects: HashMap<String, Project>,

    #[serde(default)]
    users: HashMap<String, User>,

    /// Insertion order
    #[serde(default)]
    deployments: Vec<Deployment>,

    #[serde(default)]
    activity: Vec<ActivityLog>,

    #[serde(default)]
    notifications: Vec<Notification>,
}

impl StoreData {
    fn deployment_mut(&mut self, id: &str) -> Option<&mut Deployment> {
        self.deployments.iter_mut().find(|d| d.id == id)
    }

    /// Project deployments, newest first
    fn project_deployments(&self, project_id: &str) -> Vec<&Deployment> {
        // Reverse first so equal timestamps keep newest-inserted first
        let mut found: Vec<&Deployment> = self
            .deployments
            .iter()
            .rev()
            .filter(|d| d.project_id == project_id)
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found
    }
}

/// Store keeping all records in memory.
///
/// When opened on a snapshot file every mutation rewrites the file, so state
/// survives restarts of the daemon. A mutation whose snapshot write fails is
/// rolled back in memory too.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<StoreData>>,
    snapshot: Option<File>,
}

impl MemoryStore {
    /// Create an empty, non-persistent store
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store backed by `snapshot`, loading it if it exists
    pub async fn open(snapshot: File) -> Result<Self, PanelError> {
        let data = if snapshot.exists().await {
            let data: StoreData = snapshot.read_json().await.map_err(|e| {
                PanelError::StorageError(format!(
                    "Failed to load {}: {}",
                    snapshot.path().display(),
                    e
                ))
            })?;
            info!(
                "Loaded {} deployments from {}",
                data.deployments.len(),
                snapshot.path().display()
            );
            data
        } else {
            StoreData::default()
        };

        Ok(Self {
            data: Arc::new(RwLock::new(data)),
            snapshot: Some(snapshot),
        })
    }

    async fn persist(&self, data: &StoreData) -> Result<(), PanelError> {
        if let Some(snapshot) = &self.snapshot {
            snapshot.write_json(data).await.map_err(|e| {
                PanelError::StorageError(format!(
                    "Failed to write {}: {}",
                    snapshot.path().display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Register or replace a project, keeping its recorded `last_deploy_at`
    pub async fn upsert_project(&self, mut project: Project) -> Result<(), PanelError> {
        let mut data = self.data.write().await;
        if let Some(existing) = data.projects.get(&project.id) {
            project.last_deploy_at = project.last_deploy_at.or(existing.last_deploy_at);
        }
        debug!("Registering project {} at {}", project.id, project.path);
        data.projects.insert(project.id.clone(), project);
        self.persist(&data).await
    }

    /// Register or replace a user
    pub async fn upsert_user(&self, user: User) -> Result<(), PanelError> {
        let mut data = self.data.write().await;
        data.users.insert(user.id.clone(), user);
        self.persist(&data).await
    }

    pub async fn activities(&self) -> Vec<ActivityLog> {
        self.data.read().await.activity.clone()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.data.read().await.notifications.clone()
    }

    /// Total number of deployment records
    pub async fn deployment_count(&self) -> usize {
        self.data.read().await.deployments.len()
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn claim(&self, deployment: Deployment) -> Result<Deployment, PanelError> {
        let mut data = self.data.write().await;

        if let Some(active) = data
            .deployments
            .iter()
            .find(|d| d.project_id == deployment.project_id && d.is_active())
        {
            return Err(PanelError::Conflict(format!(
                "a deploy is already in progress ({} is {})",
                active.id, active.status
            )));
        }

        data.deployments.push(deployment.clone());
        if let Err(e) = self.persist(&data).await {
            data.deployments.pop();
            return Err(e);
        }
        Ok(deployment)
    }

    async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>, PanelError> {
        let data = self.data.read().await;
        Ok(data.deployments.iter().find(|d| d.id == id).cloned())
    }

    async fn update_deployment(
        &self,
        id: &str,
        update: DeploymentUpdate,
    ) -> Result<Deployment, PanelError> {
        let mut data = self.data.write().await;
        let deployment = data
            .deployment_mut(id)
            .ok_or_else(|| PanelError::NotFound(format!("deployment {}", id)))?;

        if deployment.completed_at.is_some() {
            return Err(PanelError::StorageError(format!(
                "deployment {} is already completed",
                id
            )));
        }

        let previous = deployment.clone();
        update.apply(deployment);
        let updated = deployment.clone();
        if let Err(e) = self.persist(&data).await {
            if let Some(deployment) = data.deployment_mut(id) {
                *deployment = previous;
            }
            return Err(e);
        }
        Ok(updated)
    }

    async fn list_deployments(
        &self,
        project_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Deployment>, usize), PanelError> {
        let data = self.data.read().await;
        let all = data.project_deployments(project_id);
        let total = all.len();
        let page = all.into_iter().skip(offset).take(limit).cloned().collect();
        Ok((page, total))
    }

    async fn latest_deployment(&self, project_id: &str) -> Result<Option<Deployment>, PanelError> {
        let data = self.data.read().await;
        Ok(data
            .project_deployments(project_id)
            .first()
            .map(|d| (*d).clone()))
    }

    async fn list_active(&self) -> Result<Vec<Deployment>, PanelError> {
        let data = self.data.read().await;
        Ok(data
            .deployments
            .iter()
            .filter(|d| d.is_active())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn get_project(&self, id: &str) -> Result<Option<Project>, PanelError> {
        Ok(self.data.read().await.projects.get(id).cloned())
    }

    async fn set_last_deploy_at(&self, id: &str, at: DateTime<Utc>) -> Result<(), PanelError> {
        let mut data = self.data.write().await;
        let project = data
            .projects
            .get_mut(id)
            .ok_or_else(|| PanelError::NotFound(format!("project {}", id)))?;
        let previous = project.last_deploy_at.replace(at);
        if let Err(e) = self.persist(&data).await {
            if let Some(project) = data.projects.get_mut(id) {
                project.last_deploy_at = previous;
            }
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_user(&self, id: &str) -> Result<Option<User>, PanelError> {
        Ok(self.data.read().await.users.get(id).cloned())
    }
}

#[async_trait]
impl ActivityStore for MemoryStore {
    async fn record_activity(&self, entry: ActivityLog) -> Result<(), PanelError> {
        let mut data = self.data.write().await;
        data.activity.push(entry);
        if let Err(e) = self.persist(&data).await {
            data.activity.pop();
            return Err(e);
        }
        Ok(())
    }

    async fn create_notification(&self, notification: Notification) -> Result<(), PanelError> {
        let mut data = self.data.write().await;
        data.notifications.push(notification);
        if let Err(e) = self.persist(&data).await {
            data.notifications.pop();
            return Err(e);
        }
        Ok(())
    }
}
