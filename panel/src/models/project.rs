//! Project models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A project hosted on this server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,

    pub name: String,

    /// Working directory holding the git checkout and compose file
    pub path: String,

    /// Compose service name of the application container
    #[serde(default = "default_app_service")]
    pub app_service: String,

    #[serde(default)]
    pub last_deploy_at: Option<DateTime<Utc>>,
}

pub fn default_app_service() -> String {
    "app".to_string()
}

impl Project {
    pub fn new(id: impl Into<String>, name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            path: path.into(),
            app_service: default_app_service(),
            last_deploy_at: None,
        }
    }
}
