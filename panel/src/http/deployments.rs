//! Deployment API client

use panel_api::models::{DeploymentListResponse, StartDeployRequest};

use crate::errors::PanelError;
use crate::http::client::HttpClient;
use crate::models::deployment::{Deployment, DeploymentWithUser};

impl HttpClient {
    /// Trigger a deployment of `project_id`
    pub async fn start_deploy(
        &self,
        project_id: &str,
        branch: Option<String>,
    ) -> Result<Deployment, PanelError> {
        let path = format!("/api/projects/{}/deploy", project_id);
        self.post(&path, &StartDeployRequest { branch }).await
    }

    pub async fn get_deployment(&self, deployment_id: &str) -> Result<Deployment, PanelError> {
        let path = format!("/api/deployments/{}", deployment_id);
        self.get(&path).await
    }

    pub async fn get_latest_deployment(
        &self,
        project_id: &str,
    ) -> Result<Option<Deployment>, PanelError> {
        let path = format!("/api/projects/{}/deployments/latest", project_id);
        self.get(&path).await
    }

    /// One page of a project's deployment history
    pub async fn list_deployments(
        &self,
        project_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<DeploymentListResponse<DeploymentWithUser>, PanelError> {
        let path = format!(
            "/api/projects/{}/deployments?limit={}&offset={}",
            project_id, limit, offset
        );
        self.get(&path).await
    }
}
