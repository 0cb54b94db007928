//! Panel API models

use serde::{Deserialize, Serialize};

/// Default page size for deployment listings
pub const DEFAULT_DEPLOYMENT_LIMIT: usize = 20;

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Body of a start-deploy request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartDeployRequest {
    /// Branch to pull; the daemon falls back to `main`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// Query parameters of the deployment listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListDeploymentsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,

    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    DEFAULT_DEPLOYMENT_LIMIT
}

impl Default for ListDeploymentsQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_DEPLOYMENT_LIMIT,
            offset: 0,
        }
    }
}

/// A page of deployments, newest first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentListResponse<T> {
    pub deployments: Vec<T>,
    pub total: usize,
}

/// Machine-readable error body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable error code, e.g. `DEPLOY_IN_PROGRESS`
    pub error: String,
    pub message: String,
}

/// Error codes returned by the panel
pub mod codes {
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const DEPLOY_IN_PROGRESS: &str = "DEPLOY_IN_PROGRESS";
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
    pub const INTERNAL: &str = "INTERNAL_ERROR";
}
