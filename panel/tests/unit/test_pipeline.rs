//! Deployment pipeline scenarios driven through a scripted command runner

use std::sync::Arc;
use std::time::Duration;

use vpanel::deploy::health::HealthPollSettings;
use vpanel::deploy::orchestrator::{
    elapsed_secs, Orchestrator, OrchestratorOptions, INTERRUPTED_MESSAGE, MAX_ERROR_MESSAGE_CHARS,
    UNRECORDED_MESSAGE,
};
use vpanel::errors::PanelError;
use vpanel::events::bus::{BroadcastBus, DeployEvent};
use vpanel::filesys::file::File;
use vpanel::models::activity::NotificationKind;
use vpanel::models::deployment::{Deployment, DeploymentStatus, DeploymentUpdate};
use vpanel::models::project::Project;
use vpanel::store::memory::MemoryStore;
use vpanel::store::{DeploymentStore, ProjectStore};

use crate::support::*;

fn logs(deployment: &Deployment) -> &str {
    deployment.logs.as_deref().unwrap_or_default()
}

#[tokio::test]
async fn test_successful_deploy_records_commits_and_outcome() {
    let harness = Harness::new(ScriptedRunner::happy_path()).await;
    let mut rx = harness.bus.subscribe();

    let deployment = harness.deploy_to_completion().await;

    assert_eq!(deployment.status, DeploymentStatus::Success);
    assert_eq!(deployment.git_branch, "main");
    assert_eq!(deployment.commit_before.as_deref(), Some("abc123"));
    assert_eq!(deployment.commit_after.as_deref(), Some("def456"));
    assert_eq!(deployment.commit_message.as_deref(), Some("fix bug"));
    assert!(deployment.current_step.is_none());
    assert!(deployment.error_message.is_none());

    let started_at = deployment.started_at.unwrap();
    let completed_at = deployment.completed_at.unwrap();
    assert!(started_at >= deployment.created_at);
    assert_eq!(deployment.duration, Some(elapsed_secs(started_at, completed_at)));

    let logs = logs(&deployment);
    assert!(logs.contains("[stdout] Updating abc123..def456"));
    assert!(logs.contains("[stderr] Container shop-app-1 Started"));
    assert!(logs.contains("  shop-app-1: state=running health=healthy"));
    assert!(logs.lines().last().unwrap().starts_with("✓ Deployment succeeded in "));

    let project = harness.store.get_project(PROJECT_ID).await.unwrap().unwrap();
    assert_eq!(project.last_deploy_at, Some(completed_at));

    let activities = harness.store.activities().await;
    assert_eq!(activities.len(), 1);
    assert_eq!(activities[0].action, "DEPLOY_SUCCESS");
    assert!(activities[0].details.contains("def456"));

    let notifications = harness.store.notifications().await;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, NotificationKind::Success);
    assert_eq!(notifications[0].user_id, USER_ID);

    assert_eq!(
        harness.runner.calls(),
        vec![
            "git rev-parse HEAD",
            "git pull origin main",
            "git rev-parse HEAD",
            "git log -1 --pretty=%B",
            "docker compose build --no-cache",
            "docker compose up -d",
            "docker compose ps --format json",
        ]
    );

    let events = drain(&mut rx);
    let statuses: Vec<DeploymentStatus> = events
        .iter()
        .filter_map(|e| match e {
            DeployEvent::Status(s) => Some(s.status),
            _ => None,
        })
        .collect();
    assert_eq!(
        statuses,
        vec![
            DeploymentStatus::GitPulling,
            DeploymentStatus::Building,
            DeploymentStatus::Deploying,
            DeploymentStatus::HealthCheck,
        ]
    );
    match events.last() {
        Some(DeployEvent::Complete(complete)) => {
            assert_eq!(complete.status, DeploymentStatus::Success);
            assert_eq!(Some(complete.duration), deployment.duration);
            assert!(complete.error.is_none());
        }
        other => panic!("expected completion event, got {:?}", other),
    }

    let log_lines: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            DeployEvent::Log(l) => {
                assert_eq!(l.project_path, PROJECT_PATH);
                Some(l.line.clone())
            }
            _ => None,
        })
        .collect();
    assert_eq!(log_lines.join("\n"), logs);
}

#[tokio::test]
async fn test_build_failure_fails_deployment() {
    let runner = ScriptedRunner::happy_path()
        .on(BUILD, vec![Reply::fail(1, &["no space left on device"])]);
    let harness = Harness::new(runner).await;
    let mut rx = harness.bus.subscribe();

    let deployment = harness.deploy_to_completion().await;

    assert_eq!(deployment.status, DeploymentStatus::Failed);
    let error = deployment.error_message.as_deref().unwrap();
    assert!(error.contains("exited with code 1"));
    assert!(error.contains("no space left"));
    assert!(deployment.completed_at.is_some());
    assert!(deployment.duration.is_some());
    assert!(deployment.current_step.is_none());

    let logs = logs(&deployment);
    assert!(logs.contains("[stderr] no space left on device"));
    assert!(logs.lines().last().unwrap().starts_with("✗ Deployment failed: "));

    // later steps never ran
    assert_eq!(harness.runner.count(UP), 0);
    assert_eq!(harness.runner.count(PS), 0);

    let project = harness.store.get_project(PROJECT_ID).await.unwrap().unwrap();
    assert!(project.last_deploy_at.is_none());

    assert_eq!(harness.store.activities().await[0].action, "DEPLOY_FAILED");
    assert_eq!(
        harness.store.notifications().await[0].kind,
        NotificationKind::Error
    );

    match drain(&mut rx).last() {
        Some(DeployEvent::Complete(complete)) => {
            assert_eq!(complete.status, DeploymentStatus::Failed);
            assert_eq!(complete.error.as_deref(), Some(error));
        }
        other => panic!("expected completion event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_pull_failure_skips_build() {
    let runner = ScriptedRunner::happy_path().on(
        GIT_PULL,
        vec![Reply::fail(128, &["fatal: couldn't find remote ref main"])],
    );
    let harness = Harness::new(runner).await;

    let deployment = harness.deploy_to_completion().await;

    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert!(deployment.commit_after.is_none());
    assert!(deployment
        .error_message
        .unwrap()
        .contains("couldn't find remote ref"));
    assert_eq!(harness.runner.count(BUILD), 0);
}

#[tokio::test]
async fn test_rev_parse_failure_fails_before_first_step() {
    let runner = ScriptedRunner::happy_path().on(
        REV_PARSE,
        vec![Reply::fail(128, &["fatal: not a git repository"])],
    );
    let harness = Harness::new(runner).await;
    let mut rx = harness.bus.subscribe();

    let deployment = harness.deploy_to_completion().await;

    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert!(deployment
        .error_message
        .as_deref()
        .unwrap()
        .contains("not a git repository"));
    let started_at = deployment.started_at.unwrap();
    assert!(started_at >= deployment.created_at);
    assert_eq!(
        deployment.duration,
        Some(elapsed_secs(started_at, deployment.completed_at.unwrap()))
    );
    assert!(deployment.commit_before.is_none());
    assert_eq!(harness.runner.calls(), vec!["git rev-parse HEAD"]);
    assert_eq!(harness.runner.count(GIT_PULL), 0);

    let events = drain(&mut rx);
    assert!(!events.iter().any(|e| matches!(e, DeployEvent::Status(_))));
    match events.last() {
        Some(DeployEvent::Complete(complete)) => {
            assert_eq!(complete.status, DeploymentStatus::Failed)
        }
        other => panic!("expected completion event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_second_deploy_conflicts_while_building() {
    let gate = closed_gate();
    let runner = ScriptedRunner::happy_path()
        .on(BUILD, vec![Reply::ok(&["building"]).gated(gate.clone())]);
    let harness = Harness::new(runner).await;

    let first = harness
        .orchestrator
        .start_deploy(PROJECT_ID, USER_ID, None)
        .await
        .unwrap();
    assert_eq!(first.status, DeploymentStatus::Pending);
    harness
        .wait_for_status(&first.id, DeploymentStatus::Building)
        .await;

    let err = harness
        .orchestrator
        .start_deploy(PROJECT_ID, USER_ID, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PanelError::Conflict(_)));
    assert_eq!(harness.store.deployment_count().await, 1);

    gate.add_permits(1);
    harness.orchestrator.shutdown().await;

    let finished = harness.store.get_deployment(&first.id).await.unwrap().unwrap();
    assert_eq!(finished.status, DeploymentStatus::Success);

    // the project is free again once the first run is terminal
    let second = harness
        .orchestrator
        .start_deploy(PROJECT_ID, USER_ID, None)
        .await;
    assert!(second.is_ok());
    gate.add_permits(1);
    harness.orchestrator.shutdown().await;
    assert_eq!(harness.store.deployment_count().await, 2);
}

#[tokio::test]
async fn test_concurrent_starts_create_one_record() {
    let gate = closed_gate();
    let runner = ScriptedRunner::happy_path()
        .on(BUILD, vec![Reply::ok(&[]).gated(gate.clone())]);
    let harness = Harness::new(runner).await;

    let mut starts = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let orchestrator = harness.orchestrator.clone();
        starts.spawn(async move { orchestrator.start_deploy(PROJECT_ID, USER_ID, None).await });
    }

    let mut accepted = 0;
    let mut conflicts = 0;
    while let Some(result) = starts.join_next().await {
        match result.unwrap() {
            Ok(_) => accepted += 1,
            Err(PanelError::Conflict(_)) => conflicts += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(conflicts, 7);
    assert_eq!(harness.store.deployment_count().await, 1);

    gate.add_permits(1);
    harness.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_other_projects_deploy_concurrently() {
    let gate = closed_gate();
    let runner = ScriptedRunner::happy_path()
        .on(BUILD, vec![Reply::ok(&[]).gated(gate.clone())]);
    let harness = Harness::new(runner).await;
    harness
        .store
        .upsert_project(vpanel::models::project::Project::new("p-2", "blog", "/srv/blog"))
        .await
        .unwrap();

    let first = harness
        .orchestrator
        .start_deploy(PROJECT_ID, USER_ID, None)
        .await
        .unwrap();
    let second = harness
        .orchestrator
        .start_deploy("p-2", USER_ID, None)
        .await
        .unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(harness.orchestrator.running_count().await, 2);

    gate.add_permits(2);
    harness.orchestrator.shutdown().await;
}

#[tokio::test]
async fn test_health_succeeds_on_third_attempt() {
    let runner = ScriptedRunner::happy_path().on(
        PS,
        vec![
            Reply::ok(&[APP_STARTING]),
            Reply::ok(&[APP_STARTING]),
            Reply::ok(&[APP_HEALTHY]),
            Reply::ok(&[APP_UNHEALTHY]),
        ],
    );
    let harness = Harness::new(runner).await;

    let deployment = harness.deploy_to_completion().await;

    assert_eq!(deployment.status, DeploymentStatus::Success);
    assert_eq!(harness.runner.count(PS), 3);

    let logs = logs(&deployment);
    assert!(logs.contains("Health check attempt 1/24 - waiting..."));
    assert!(logs.contains("Health check attempt 2/24 - waiting..."));
    assert!(!logs.contains("Health check attempt 3/24"));
    assert!(logs.contains("shop-app-1: state=running health=starting"));
}

#[tokio::test]
async fn test_health_query_errors_are_retried() {
    let runner = ScriptedRunner::happy_path().on(
        PS,
        vec![
            Reply::fail(1, &["Cannot connect to the Docker daemon"]),
            Reply::ok(&["not json"]),
            Reply::ok(&[APP_HEALTHY]),
        ],
    );
    let harness = Harness::new(runner).await;

    let deployment = harness.deploy_to_completion().await;

    assert_eq!(deployment.status, DeploymentStatus::Success);
    assert_eq!(harness.runner.count(PS), 3);
}

#[tokio::test]
async fn test_health_timeout_after_all_attempts() {
    let runner = ScriptedRunner::happy_path().on(PS, vec![Reply::ok(&[APP_UNHEALTHY])]);
    let harness = Harness::new(runner).await;

    let deployment = harness.deploy_to_completion().await;

    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert_eq!(harness.runner.count(PS), 24);
    assert_eq!(
        deployment.error_message.as_deref(),
        Some("Health check timed out after 24 attempts")
    );
    assert!(logs(&deployment).contains("Health check attempt 24/24 - waiting..."));
}

#[tokio::test]
async fn test_zero_attempt_policy_still_queries_once() {
    let store = Arc::new(seeded_store().await);
    let runner = Arc::new(ScriptedRunner::happy_path());
    let orchestrator = Orchestrator::new(
        store.clone(),
        runner.clone(),
        Arc::new(BroadcastBus::default()),
        OrchestratorOptions {
            health_poll: HealthPollSettings {
                max_attempts: 0,
                interval: Duration::ZERO,
            },
        },
    );

    let started = orchestrator
        .start_deploy(PROJECT_ID, USER_ID, None)
        .await
        .unwrap();
    orchestrator.shutdown().await;

    let deployment = store.get_deployment(&started.id).await.unwrap().unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Success);
    assert_eq!(runner.count(PS), 1);
}

#[tokio::test]
async fn test_commit_message_is_truncated() {
    let long_message = "x".repeat(600);
    let runner = ScriptedRunner::happy_path()
        .on(GIT_LOG, vec![Reply::ok(&[long_message.as_str()])]);
    let harness = Harness::new(runner).await;

    let deployment = harness.deploy_to_completion().await;

    assert_eq!(deployment.status, DeploymentStatus::Success);
    assert_eq!(deployment.commit_message.unwrap().chars().count(), 500);
}

#[tokio::test]
async fn test_error_message_is_truncated() {
    let long_error = format!("Failed to run docker: {}", "e".repeat(3000));
    let runner = ScriptedRunner::happy_path().on(BUILD, vec![Reply::launch_error(long_error)]);
    let harness = Harness::new(runner).await;

    let deployment = harness.deploy_to_completion().await;

    assert_eq!(deployment.status, DeploymentStatus::Failed);
    let error = deployment.error_message.as_deref().unwrap();
    assert_eq!(error.chars().count(), MAX_ERROR_MESSAGE_CHARS);
    assert!(error.starts_with("Failed to run docker: eee"));

    // the transcript keeps the full message
    assert!(logs(&deployment).len() > 3000);
}

#[tokio::test]
async fn test_audit_failures_do_not_change_outcome() {
    let store = Arc::new(FaultyStore::failing_audit(seeded_store().await));
    let runner = Arc::new(ScriptedRunner::happy_path());
    let bus = Arc::new(BroadcastBus::default());
    let orchestrator = orchestrator_with(store.clone(), runner, bus);

    let started = orchestrator
        .start_deploy(PROJECT_ID, USER_ID, None)
        .await
        .unwrap();
    orchestrator.shutdown().await;

    let deployment = store.inner.get_deployment(&started.id).await.unwrap().unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Success);
    assert!(store.inner.activities().await.is_empty());
}

#[tokio::test]
async fn test_unwritable_outcome_is_recorded_as_failure() {
    let store = Arc::new(FaultyStore::failing_terminal_writes(seeded_store().await, 1));
    let runner = Arc::new(ScriptedRunner::happy_path());
    let bus = Arc::new(BroadcastBus::default());
    let mut rx = bus.subscribe();
    let orchestrator = orchestrator_with(store.clone(), runner, bus);

    let started = orchestrator
        .start_deploy(PROJECT_ID, USER_ID, None)
        .await
        .unwrap();
    orchestrator.shutdown().await;

    let deployment = store.inner.get_deployment(&started.id).await.unwrap().unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert!(deployment.completed_at.is_some());
    assert!(deployment
        .error_message
        .as_deref()
        .unwrap()
        .starts_with(UNRECORDED_MESSAGE));

    match drain(&mut rx).last() {
        Some(DeployEvent::Complete(complete)) => {
            assert_eq!(complete.status, DeploymentStatus::Failed)
        }
        other => panic!("expected completion event, got {:?}", other),
    }

    // the project is not left locked
    let next = orchestrator
        .start_deploy(PROJECT_ID, USER_ID, None)
        .await
        .unwrap();
    orchestrator.shutdown().await;
    let next = store.inner.get_deployment(&next.id).await.unwrap().unwrap();
    assert_eq!(next.status, DeploymentStatus::Success);
}

#[tokio::test]
async fn test_failed_claim_write_does_not_lock_project() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let store = Arc::new(MemoryStore::open(File::new(&path)).await.unwrap());
    store
        .upsert_project(Project::new(PROJECT_ID, "shop", PROJECT_PATH))
        .await
        .unwrap();
    let runner = Arc::new(ScriptedRunner::happy_path());
    let orchestrator =
        orchestrator_with(store.clone(), runner.clone(), Arc::new(BroadcastBus::default()));

    // a non-empty directory cannot be replaced by the snapshot
    std::fs::remove_file(&path).unwrap();
    std::fs::create_dir_all(path.join("blocker")).unwrap();

    let err = orchestrator
        .start_deploy(PROJECT_ID, USER_ID, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PanelError::StorageError(_)));
    assert_eq!(store.deployment_count().await, 0);
    assert!(runner.calls().is_empty());

    std::fs::remove_dir_all(&path).unwrap();
    let started = orchestrator
        .start_deploy(PROJECT_ID, USER_ID, None)
        .await
        .unwrap();
    orchestrator.shutdown().await;

    let deployment = store.get_deployment(&started.id).await.unwrap().unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Success);
}

#[tokio::test]
async fn test_custom_branch_is_pulled() {
    let harness = Harness::new(ScriptedRunner::happy_path()).await;

    let started = harness
        .orchestrator
        .start_deploy(PROJECT_ID, USER_ID, Some("release/1.2".to_string()))
        .await
        .unwrap();
    harness.orchestrator.shutdown().await;

    assert_eq!(started.git_branch, "release/1.2");
    assert!(harness
        .runner
        .calls()
        .contains(&"git pull origin release/1.2".to_string()));
}

#[tokio::test]
async fn test_invalid_branch_is_rejected() {
    let harness = Harness::new(ScriptedRunner::happy_path()).await;

    let err = harness
        .orchestrator
        .start_deploy(PROJECT_ID, USER_ID, Some("--upload-pack=sh".to_string()))
        .await
        .unwrap_err();

    assert!(matches!(err, PanelError::ValidationError(_)));
    assert_eq!(harness.store.deployment_count().await, 0);
    assert!(harness.runner.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_project_is_not_found() {
    let harness = Harness::new(ScriptedRunner::happy_path()).await;

    let err = harness
        .orchestrator
        .start_deploy("missing", USER_ID, None)
        .await
        .unwrap_err();

    assert!(matches!(err, PanelError::NotFound(_)));
    assert_eq!(harness.store.deployment_count().await, 0);
}

#[tokio::test]
async fn test_history_is_newest_first_with_users() {
    let harness = Harness::new(ScriptedRunner::happy_path()).await;
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(harness.deploy_to_completion().await.id);
    }

    let page = harness
        .orchestrator
        .get_deployments(PROJECT_ID, 2, 0)
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.deployments.len(), 2);
    assert_eq!(page.deployments[0].deployment.id, ids[2]);
    assert_eq!(page.deployments[1].deployment.id, ids[1]);
    assert_eq!(page.deployments[0].user.as_ref().unwrap().name, "Ada");

    let latest = harness
        .orchestrator
        .get_latest_deployment(PROJECT_ID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.id, ids[2]);

    let fetched = harness.orchestrator.get_deployment(&ids[0]).await.unwrap();
    assert_eq!(fetched.status, DeploymentStatus::Success);
    assert!(matches!(
        harness.orchestrator.get_deployment("nope").await,
        Err(PanelError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_recover_interrupted_fails_stale_records() {
    let harness = Harness::new(ScriptedRunner::happy_path()).await;
    let stale = harness
        .store
        .claim(Deployment::new(
            "d-stale".to_string(),
            PROJECT_ID.to_string(),
            USER_ID.to_string(),
            "main".to_string(),
        ))
        .await
        .unwrap();
    harness
        .store
        .update_deployment(
            &stale.id,
            DeploymentUpdate {
                status: Some(DeploymentStatus::Building),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let recovered = harness.orchestrator.recover_interrupted().await.unwrap();
    assert_eq!(recovered, 1);

    let record = harness.store.get_deployment("d-stale").await.unwrap().unwrap();
    assert_eq!(record.status, DeploymentStatus::Failed);
    assert_eq!(record.error_message.as_deref(), Some(INTERRUPTED_MESSAGE));
    assert!(record.completed_at.is_some());

    // nothing left to recover, and the project accepts deploys again
    assert_eq!(harness.orchestrator.recover_interrupted().await.unwrap(), 0);
    assert_eq!(
        harness.deploy_to_completion().await.status,
        DeploymentStatus::Success
    );
}
