//! Finite State Machine for project deployments

use crate::errors::PanelError;
use crate::models::deployment::DeploymentStatus;

/// Pipeline step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    GitPull,
    Build,
    Deploy,
    HealthCheck,
}

impl PipelineStep {
    /// Steps in execution order
    pub const ALL: [PipelineStep; 4] = [
        PipelineStep::GitPull,
        PipelineStep::Build,
        PipelineStep::Deploy,
        PipelineStep::HealthCheck,
    ];

    /// Status persisted before the step runs
    pub fn status(&self) -> DeploymentStatus {
        match self {
            PipelineStep::GitPull => DeploymentStatus::GitPulling,
            PipelineStep::Build => DeploymentStatus::Building,
            PipelineStep::Deploy => DeploymentStatus::Deploying,
            PipelineStep::HealthCheck => DeploymentStatus::HealthCheck,
        }
    }

    /// Label stored as `currentStep`
    pub fn label(&self) -> &'static str {
        match self {
            PipelineStep::GitPull => "Pulling latest changes",
            PipelineStep::Build => "Building image",
            PipelineStep::Deploy => "Starting containers",
            PipelineStep::HealthCheck => "Checking container health",
        }
    }
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// A pipeline step is about to run
    StepStarted(PipelineStep),

    /// All steps completed
    Succeeded,

    /// A step failed
    Failed(String),
}

/// Check whether `from -> to` is allowed
pub fn is_valid_transition(from: DeploymentStatus, to: DeploymentStatus) -> bool {
    use DeploymentStatus::*;

    match (from, to) {
        (Pending, GitPulling)
        | (GitPulling, Building)
        | (Building, Deploying)
        | (Deploying, HealthCheck)
        | (HealthCheck, Success) => true,
        (from, Failed) => !from.is_terminal(),
        _ => false,
    }
}

/// Validate a transition, returning an error for anything outside the table
pub fn check_transition(from: DeploymentStatus, to: DeploymentStatus) -> Result<(), PanelError> {
    if is_valid_transition(from, to) {
        Ok(())
    } else {
        Err(PanelError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Deployment FSM
///
/// Tracks the in-flight status of one pipeline run so that the orchestrator
/// never persists an out-of-order status.
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    status: DeploymentStatus,
    error: Option<String>,
}

impl DeploymentFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            status: DeploymentStatus::Pending,
            error: None,
        }
    }

    /// Get current status
    pub fn status(&self) -> DeploymentStatus {
        self.status
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<DeploymentStatus, PanelError> {
        let next = match &event {
            DeploymentEvent::StepStarted(step) => step.status(),
            DeploymentEvent::Succeeded => DeploymentStatus::Success,
            DeploymentEvent::Failed(_) => DeploymentStatus::Failed,
        };

        check_transition(self.status, next)?;

        if let DeploymentEvent::Failed(err) = event {
            self.error = Some(err);
        }
        self.status = next;
        Ok(next)
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
