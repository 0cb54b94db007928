//! Server state

use std::sync::Arc;

use crate::deploy::orchestrator::Orchestrator;
use crate::events::bus::BroadcastBus;

/// Server state shared across handlers
pub struct ServerState {
    pub orchestrator: Orchestrator,
    pub bus: Arc<BroadcastBus>,
}

impl ServerState {
    pub fn new(orchestrator: Orchestrator, bus: Arc<BroadcastBus>) -> Self {
        Self { orchestrator, bus }
    }
}
