//! Application state management

use std::sync::Arc;

use tracing::{info, warn};

use crate::app::options::AppOptions;
use crate::deploy::executor::ProcessRunner;
use crate::deploy::orchestrator::Orchestrator;
use crate::errors::PanelError;
use crate::events::bus::BroadcastBus;
use crate::store::memory::MemoryStore;

/// Main application state
pub struct AppState {
    /// Projects, users and deployment records
    pub store: Arc<MemoryStore>,

    /// Deployment event bus
    pub bus: Arc<BroadcastBus>,

    /// Deployment pipeline
    pub orchestrator: Orchestrator,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Self, PanelError> {
        info!("Initializing application state...");

        let store = if options.storage.persist_state {
            MemoryStore::open(options.storage.layout.state_file()).await?
        } else {
            MemoryStore::new()
        };
        let store = Arc::new(store);

        for project in &options.projects {
            store.upsert_project(project.clone()).await?;
        }
        for user in &options.users {
            store.upsert_user(user.clone()).await?;
        }
        info!(
            "Registered {} project(s) and {} user(s)",
            options.projects.len(),
            options.users.len()
        );

        let bus = Arc::new(BroadcastBus::default());
        let orchestrator = Orchestrator::new(
            store.clone(),
            Arc::new(ProcessRunner::new()),
            bus.clone(),
            options.orchestrator.clone(),
        );

        let recovered = orchestrator.recover_interrupted().await?;
        if recovered > 0 {
            warn!("Marked {} interrupted deployment(s) as failed", recovered);
        }

        Ok(Self {
            store,
            bus,
            orchestrator,
        })
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), PanelError> {
        info!("Shutting down application state...");
        self.orchestrator.shutdown().await;
        Ok(())
    }
}
