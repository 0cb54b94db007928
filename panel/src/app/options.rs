//! Application configuration options

use std::time::Duration;

use crate::deploy::orchestrator::OrchestratorOptions;
use crate::models::project::Project;
use crate::models::user::User;
use crate::storage::layout::StorageLayout;

/// Main application options
#[derive(Debug, Clone, Default)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage configuration
    pub storage: StorageOptions,

    /// Server configuration
    pub server: ServerOptions,

    /// Deployment pipeline options
    pub orchestrator: OrchestratorOptions,

    /// Projects registered at startup
    pub projects: Vec<Project>,

    /// Users registered at startup
    pub users: Vec<User>,
}

/// Lifecycle options for the panel
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown, including running deployments
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(600),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Keep a JSON snapshot of the store in the data directory
    pub persist_state: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            layout: StorageLayout::default(),
            persist_state: true,
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3100,
        }
    }
}
