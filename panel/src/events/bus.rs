//! Publish/subscribe bus for deployment events

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::events::topics::Topics;
use crate::models::deployment::DeploymentStatus;

/// A single output line of a running deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogLineEvent {
    pub deployment_id: String,
    pub project_path: String,
    pub line: String,
}

/// A status transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub deployment_id: String,
    pub project_id: String,
    pub status: DeploymentStatus,
    pub current_step: Option<String>,
}

/// Terminal outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteEvent {
    pub deployment_id: String,
    pub project_id: String,
    pub status: DeploymentStatus,
    pub duration: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Event published by the deployment pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DeployEvent {
    Log(LogLineEvent),
    Status(StatusEvent),
    Complete(CompleteEvent),
}

impl DeployEvent {
    /// Topic the event is published under
    pub fn topic(&self) -> &'static str {
        match self {
            DeployEvent::Log(_) => Topics::DEPLOY_LOG,
            DeployEvent::Status(_) => Topics::DEPLOY_STATUS,
            DeployEvent::Complete(_) => Topics::DEPLOY_COMPLETE,
        }
    }

    pub fn deployment_id(&self) -> &str {
        match self {
            DeployEvent::Log(e) => &e.deployment_id,
            DeployEvent::Status(e) => &e.deployment_id,
            DeployEvent::Complete(e) => &e.deployment_id,
        }
    }
}

/// Publish side of the event bus
pub trait EventBus: Send + Sync {
    /// Publish an event to every current subscriber. Never fails.
    fn publish(&self, event: DeployEvent);
}

/// In-process bus backed by a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastBus {
    tx: broadcast::Sender<DeployEvent>,
}

impl BroadcastBus {
    /// Create a bus whose subscribers may lag by up to `capacity` events
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<DeployEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus for BroadcastBus {
    fn publish(&self, event: DeployEvent) {
        trace!("publish {} for {}", event.topic(), event.deployment_id());
        // No receivers is fine
        let _ = self.tx.send(event);
    }
}
