//! Deployment orchestrator
//!
//! Runs the pull -> build -> up -> health-check pipeline for one project at a
//! time, persisting every status transition and broadcasting progress.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::deploy::compose;
use crate::deploy::executor::CommandRunner;
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, PipelineStep};
use crate::deploy::git;
use crate::deploy::health::{self, HealthPollSettings};
use crate::deploy::transcript::Transcript;
use crate::errors::PanelError;
use crate::events::bus::{CompleteEvent, DeployEvent, EventBus, StatusEvent};
use crate::models::activity::{ActivityLog, Notification, NotificationKind};
use crate::models::deployment::{
    Deployment, DeploymentPage, DeploymentStatus, DeploymentUpdate, DeploymentWithUser,
};
use crate::models::project::Project;
use crate::models::user::UserSummary;
use crate::store::{ActivityStore, DeploymentStore, ProjectStore, Store, UserStore};
use crate::utils::{generate_uuid, short_hash, truncate_chars};

/// Branch deployed when the caller names none
pub const DEFAULT_BRANCH: &str = "main";

/// Longest stored commit message
pub const MAX_COMMIT_MESSAGE_CHARS: usize = 500;

/// Longest stored error message
pub const MAX_ERROR_MESSAGE_CHARS: usize = 1000;

/// Largest page returned by `get_deployments`
pub const MAX_PAGE_SIZE: usize = 100;

/// Error recorded for pipelines a previous process never finished
pub const INTERRUPTED_MESSAGE: &str = "Deployment interrupted by panel restart";

/// Error recorded when the pipeline task panics
pub const CRASHED_MESSAGE: &str = "Deployment pipeline crashed";

/// Prefix of the error recorded when the final state could not be written
pub const UNRECORDED_MESSAGE: &str = "Deployment outcome could not be recorded";

/// Orchestrator options
#[derive(Debug, Clone, Default)]
pub struct OrchestratorOptions {
    pub health_poll: HealthPollSettings,
}

/// Owns the deployment state machine for every project
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn Store>,
    runner: Arc<dyn CommandRunner>,
    bus: Arc<dyn EventBus>,
    options: OrchestratorOptions,
    tasks: Arc<Mutex<JoinSet<()>>>,
}

/// Mutable state of one pipeline run
struct PipelineRun {
    deployment_id: String,
    user_id: String,
    branch: String,
    project: Project,
    fsm: DeploymentFsm,
    transcript: Transcript,
    pipeline_started: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    commit_after: Option<String>,
}

impl PipelineRun {
    /// Completion timestamp and whole seconds since `started_at`
    fn finish_times(&mut self) -> (DateTime<Utc>, DateTime<Utc>, u64) {
        let completed_at = Utc::now();
        let started_at = *self.started_at.get_or_insert(self.pipeline_started);
        (started_at, completed_at, elapsed_secs(started_at, completed_at))
    }
}

/// Whole seconds between two instants, rounded to nearest
pub fn elapsed_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    let millis = (to - from).num_milliseconds().max(0) as u64;
    (millis + 500) / 1000
}

/// Reject branch names git would read as options or that escape refs
fn validate_branch(branch: &str) -> Result<(), PanelError> {
    let valid = !branch.is_empty()
        && !branch.starts_with('-')
        && !branch.contains("..")
        && !branch.chars().any(|c| c.is_whitespace() || c.is_control());
    if valid {
        Ok(())
    } else {
        Err(PanelError::ValidationError(format!(
            "invalid branch name: {:?}",
            branch
        )))
    }
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        runner: Arc<dyn CommandRunner>,
        bus: Arc<dyn EventBus>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            store,
            runner,
            bus,
            options,
            tasks: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Start a deployment of `project_id` and return the pending record.
    ///
    /// The pipeline runs detached; its outcome is only observable through the
    /// stored record and the event bus.
    pub async fn start_deploy(
        &self,
        project_id: &str,
        user_id: &str,
        branch: Option<String>,
    ) -> Result<Deployment, PanelError> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| PanelError::NotFound(format!("project {}", project_id)))?;

        let branch = branch
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string());
        validate_branch(&branch)?;

        let deployment = self
            .store
            .claim(Deployment::new(
                generate_uuid(),
                project.id.clone(),
                user_id.to_string(),
                branch,
            ))
            .await?;

        info!(
            deployment_id = %deployment.id,
            project_id = %project.id,
            "Starting deployment of branch {}",
            deployment.git_branch
        );

        self.spawn_pipeline(deployment.clone(), project).await;
        Ok(deployment)
    }

    /// Most recent deployments of a project with their triggering users
    pub async fn get_deployments(
        &self,
        project_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<DeploymentPage, PanelError> {
        let limit = limit.min(MAX_PAGE_SIZE);
        let (deployments, total) = self
            .store
            .list_deployments(project_id, limit, offset)
            .await?;

        let mut users: HashMap<String, Option<UserSummary>> = HashMap::new();
        let mut enriched = Vec::with_capacity(deployments.len());
        for deployment in deployments {
            let user = match users.get(&deployment.user_id) {
                Some(user) => user.clone(),
                None => {
                    let user = self
                        .store
                        .get_user(&deployment.user_id)
                        .await?
                        .map(|u| UserSummary::from(&u));
                    users.insert(deployment.user_id.clone(), user.clone());
                    user
                }
            };
            enriched.push(DeploymentWithUser { deployment, user });
        }

        Ok(DeploymentPage {
            deployments: enriched,
            total,
        })
    }

    /// Newest deployment of a project, if any
    pub async fn get_latest_deployment(
        &self,
        project_id: &str,
    ) -> Result<Option<Deployment>, PanelError> {
        self.store.latest_deployment(project_id).await
    }

    pub async fn get_deployment(&self, deployment_id: &str) -> Result<Deployment, PanelError> {
        self.store
            .get_deployment(deployment_id)
            .await?
            .ok_or_else(|| PanelError::NotFound(format!("deployment {}", deployment_id)))
    }

    /// Fail every deployment a previous process left non-terminal.
    ///
    /// Must run before any new pipeline is started.
    pub async fn recover_interrupted(&self) -> Result<usize, PanelError> {
        let stale = self.store.list_active().await?;
        for deployment in &stale {
            warn!(
                deployment_id = %deployment.id,
                "Deployment was {} when the panel stopped, marking failed",
                deployment.status
            );
            self.mark_abandoned(deployment, INTERRUPTED_MESSAGE).await?;
        }
        Ok(stale.len())
    }

    /// Number of pipelines still running
    pub async fn running_count(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Wait for every running pipeline to finish
    pub async fn shutdown(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock().await);
        if !tasks.is_empty() {
            info!("Waiting for {} running deployment(s)...", tasks.len());
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("Deployment task failed to join: {}", e);
            }
        }
    }

    async fn spawn_pipeline(&self, deployment: Deployment, project: Project) {
        let this = self.clone();
        let mut tasks = self.tasks.lock().await;

        // Drop results of pipelines that already finished
        while tasks.try_join_next().is_some() {}

        tasks.spawn(async move {
            let deployment_id = deployment.id.clone();
            let outcome = AssertUnwindSafe(this.run_pipeline(deployment, project))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(
                        deployment_id = %deployment_id,
                        "Failed to record deployment outcome: {}", e
                    );
                    let reason = truncate_chars(
                        &format!("{}: {}", UNRECORDED_MESSAGE, e),
                        MAX_ERROR_MESSAGE_CHARS,
                    );
                    this.abandon_if_active(&deployment_id, &reason).await;
                }
                Err(_) => {
                    error!(deployment_id = %deployment_id, "Deployment pipeline panicked");
                    this.abandon_if_active(&deployment_id, CRASHED_MESSAGE).await;
                }
            }
        });
    }

    /// Fail a record the pipeline left non-terminal
    async fn abandon_if_active(&self, deployment_id: &str, reason: &str) {
        let result = match self.store.get_deployment(deployment_id).await {
            Ok(Some(d)) if d.is_active() => self.mark_abandoned(&d, reason).await,
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            error!(
                deployment_id = %deployment_id,
                "Failed to record abandoned deployment: {}", e
            );
        }
    }

    /// Pipeline body. Only fails when the terminal state itself cannot be written.
    async fn run_pipeline(&self, deployment: Deployment, project: Project) -> Result<(), PanelError> {
        let mut run = PipelineRun {
            transcript: Transcript::new(&deployment.id, &project.path, self.bus.clone()),
            deployment_id: deployment.id,
            user_id: deployment.user_id,
            branch: deployment.git_branch,
            project,
            fsm: DeploymentFsm::new(),
            pipeline_started: Utc::now(),
            started_at: None,
            commit_after: None,
        };

        match self.execute_steps(&mut run).await {
            Ok(()) => self.finish_success(&mut run).await,
            Err(e) => self.finish_failure(&mut run, &e).await,
        }
    }

    async fn execute_steps(&self, run: &mut PipelineRun) -> Result<(), PanelError> {
        let runner = self.runner.as_ref();
        let dir = PathBuf::from(&run.project.path);

        let commit_before = {
            let transcript = &mut run.transcript;
            git::current_commit(runner, &dir, &mut |s, l| transcript.output(s, l)).await?
        };

        self.transition(run, PipelineStep::GitPull).await?;
        run.transcript
            .push(format!("==> Pulling branch {}", run.branch));
        let pulled = {
            let transcript = &mut run.transcript;
            git::pull(runner, &dir, &run.branch, &mut |s, l| transcript.output(s, l)).await?
        };
        let commit_message = truncate_chars(&pulled.commit_message, MAX_COMMIT_MESSAGE_CHARS);
        self.store
            .update_deployment(
                &run.deployment_id,
                DeploymentUpdate {
                    commit_before: Some(commit_before),
                    commit_after: Some(pulled.commit_after.clone()),
                    commit_message: Some(commit_message),
                    ..Default::default()
                },
            )
            .await?;
        run.commit_after = Some(pulled.commit_after);

        self.transition(run, PipelineStep::Build).await?;
        run.transcript.push("==> Building image (no cache)");
        {
            let transcript = &mut run.transcript;
            compose::build_no_cache(runner, &dir, &mut |s, l| transcript.output(s, l)).await?;
        }

        self.transition(run, PipelineStep::Deploy).await?;
        run.transcript.push("==> Starting containers");
        {
            let transcript = &mut run.transcript;
            compose::up_detached(runner, &dir, &mut |s, l| transcript.output(s, l)).await?;
        }

        self.transition(run, PipelineStep::HealthCheck).await?;
        run.transcript.push(format!(
            "==> Waiting for service {} to become healthy",
            run.project.app_service
        ));
        {
            let transcript = &mut run.transcript;
            health::wait_until_healthy(
                runner,
                &dir,
                &run.project.app_service,
                &self.options.health_poll,
                tokio::time::sleep,
                &mut |line| transcript.push(line),
            )
            .await?;
        }

        Ok(())
    }

    /// Persist and publish the status of `step`
    async fn transition(&self, run: &mut PipelineRun, step: PipelineStep) -> Result<(), PanelError> {
        let status = run.fsm.process(DeploymentEvent::StepStarted(step))?;
        let started_at = *run.started_at.get_or_insert_with(Utc::now);

        self.store
            .update_deployment(
                &run.deployment_id,
                DeploymentUpdate {
                    status: Some(status),
                    current_step: Some(Some(step.label().to_string())),
                    started_at: Some(started_at),
                    ..Default::default()
                },
            )
            .await?;

        self.bus.publish(DeployEvent::Status(StatusEvent {
            deployment_id: run.deployment_id.clone(),
            project_id: run.project.id.clone(),
            status,
            current_step: Some(step.label().to_string()),
        }));
        Ok(())
    }

    async fn finish_success(&self, run: &mut PipelineRun) -> Result<(), PanelError> {
        run.fsm.process(DeploymentEvent::Succeeded)?;
        let (started_at, completed_at, duration) = run.finish_times();
        run.transcript
            .push(format!("✓ Deployment succeeded in {}s", duration));

        self.store
            .update_deployment(
                &run.deployment_id,
                DeploymentUpdate {
                    status: Some(DeploymentStatus::Success),
                    current_step: Some(None),
                    logs: Some(run.transcript.text()),
                    duration: Some(duration),
                    started_at: Some(started_at),
                    completed_at: Some(completed_at),
                    ..Default::default()
                },
            )
            .await?;

        if let Err(e) = self
            .store
            .set_last_deploy_at(&run.project.id, completed_at)
            .await
        {
            error!(
                project_id = %run.project.id,
                "Failed to update last deploy time: {}", e
            );
        }

        self.bus.publish(DeployEvent::Complete(CompleteEvent {
            deployment_id: run.deployment_id.clone(),
            project_id: run.project.id.clone(),
            status: DeploymentStatus::Success,
            duration,
            error: None,
        }));

        info!(
            deployment_id = %run.deployment_id,
            "Deployment of {} succeeded in {}s", run.project.name, duration
        );

        let commit = run.commit_after.as_deref().map(short_hash).unwrap_or("unknown");
        self.record_outcome(
            run,
            "DEPLOY_SUCCESS",
            NotificationKind::Success,
            "Deployment succeeded".to_string(),
            format!(
                "{} deployed commit {} in {}s",
                run.project.name, commit, duration
            ),
        )
        .await;
        Ok(())
    }

    async fn finish_failure(&self, run: &mut PipelineRun, err: &PanelError) -> Result<(), PanelError> {
        let message = err.to_string();
        let error_message = truncate_chars(&message, MAX_ERROR_MESSAGE_CHARS);
        run.fsm
            .process(DeploymentEvent::Failed(error_message.clone()))?;
        let (started_at, completed_at, duration) = run.finish_times();
        run.transcript
            .push(format!("✗ Deployment failed: {}", message));

        self.store
            .update_deployment(
                &run.deployment_id,
                DeploymentUpdate {
                    status: Some(DeploymentStatus::Failed),
                    current_step: Some(None),
                    logs: Some(run.transcript.text()),
                    duration: Some(duration),
                    error_message: Some(error_message.clone()),
                    started_at: Some(started_at),
                    completed_at: Some(completed_at),
                    ..Default::default()
                },
            )
            .await?;

        self.bus.publish(DeployEvent::Complete(CompleteEvent {
            deployment_id: run.deployment_id.clone(),
            project_id: run.project.id.clone(),
            status: DeploymentStatus::Failed,
            duration,
            error: Some(error_message.clone()),
        }));

        warn!(
            deployment_id = %run.deployment_id,
            "Deployment of {} failed after {}s: {}", run.project.name, duration, error_message
        );

        self.record_outcome(
            run,
            "DEPLOY_FAILED",
            NotificationKind::Error,
            "Deployment failed".to_string(),
            format!("{} failed to deploy: {}", run.project.name, error_message),
        )
        .await;
        Ok(())
    }

    /// Best-effort audit entry and notification; failures are only logged
    async fn record_outcome(
        &self,
        run: &PipelineRun,
        action: &str,
        kind: NotificationKind,
        title: String,
        message: String,
    ) {
        let activity = ActivityLog::new(&run.user_id, action, &run.project.id, message.clone());
        if let Err(e) = self.store.record_activity(activity).await {
            warn!(deployment_id = %run.deployment_id, "Failed to record activity: {}", e);
        }

        let notification = Notification::new(&run.user_id, kind, title, message);
        if let Err(e) = self.store.create_notification(notification).await {
            warn!(deployment_id = %run.deployment_id, "Failed to create notification: {}", e);
        }
    }

    /// Move a non-terminal record straight to FAILED
    async fn mark_abandoned(&self, deployment: &Deployment, reason: &str) -> Result<(), PanelError> {
        let completed_at = Utc::now();
        let started_at = deployment.started_at.unwrap_or(deployment.created_at);
        let duration = elapsed_secs(started_at, completed_at);

        self.store
            .update_deployment(
                &deployment.id,
                DeploymentUpdate {
                    status: Some(DeploymentStatus::Failed),
                    current_step: Some(None),
                    duration: Some(duration),
                    error_message: Some(reason.to_string()),
                    started_at: Some(started_at),
                    completed_at: Some(completed_at),
                    ..Default::default()
                },
            )
            .await?;

        self.bus.publish(DeployEvent::Complete(CompleteEvent {
            deployment_id: deployment.id.clone(),
            project_id: deployment.project_id.clone(),
            status: DeploymentStatus::Failed,
            duration,
            error: Some(reason.to_string()),
        }));
        Ok(())
    }
}
