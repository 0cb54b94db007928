//! HTTP API tests against the router and a live listener

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use vpanel::errors::PanelError;
use vpanel::http::client::HttpClient;
use vpanel::models::deployment::DeploymentStatus;
use vpanel::server::serve::router;
use vpanel::server::state::ServerState;

use crate::support::*;

fn app(harness: &Harness) -> Router {
    router(Arc::new(ServerState::new(
        harness.orchestrator.clone(),
        harness.bus.clone(),
    )))
}

fn deploy_request(project_id: &str, user_id: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/api/projects/{}/deploy", project_id))
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(user_id) = user_id {
        builder = builder.header("X-User-Id", user_id);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_health_endpoint() {
    let harness = Harness::new(ScriptedRunner::happy_path()).await;
    let (status, body) = send(&app(&harness), get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "vpanel");
}

#[tokio::test]
async fn test_deploy_requires_user_header() {
    let harness = Harness::new(ScriptedRunner::happy_path()).await;
    let (status, body) = send(&app(&harness), deploy_request(PROJECT_ID, None, "{}")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BAD_REQUEST");
    assert_eq!(harness.store.deployment_count().await, 0);
}

#[tokio::test]
async fn test_deploy_unknown_project() {
    let harness = Harness::new(ScriptedRunner::happy_path()).await;
    let (status, body) = send(
        &app(&harness),
        deploy_request("missing", Some(USER_ID), "{}"),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NOT_FOUND");
}

#[tokio::test]
async fn test_deploy_lifecycle_over_http() {
    let gate = closed_gate();
    let runner = ScriptedRunner::happy_path()
        .on(BUILD, vec![Reply::ok(&[]).gated(gate.clone())]);
    let harness = Harness::new(runner).await;
    let app = app(&harness);

    // empty body falls back to main
    let (status, created) = send(&app, deploy_request(PROJECT_ID, Some(USER_ID), "")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["status"], "PENDING");
    assert_eq!(created["gitBranch"], "main");
    assert_eq!(created["projectId"], PROJECT_ID);
    let id = created["id"].as_str().unwrap().to_string();

    harness.wait_for_status(&id, DeploymentStatus::Building).await;
    let (status, conflict) = send(
        &app,
        deploy_request(PROJECT_ID, Some(USER_ID), r#"{"branch":"main"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(conflict["error"], "DEPLOY_IN_PROGRESS");

    gate.add_permits(1);
    harness.orchestrator.shutdown().await;

    let (status, latest) = send(
        &app,
        get(&format!("/api/projects/{}/deployments/latest", PROJECT_ID)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(latest["id"], id.as_str());
    assert_eq!(latest["status"], "SUCCESS");
    assert_eq!(latest["commitAfter"], "def456");

    let (status, list) = send(
        &app,
        get(&format!("/api/projects/{}/deployments?limit=5", PROJECT_ID)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["total"], 1);
    assert_eq!(list["deployments"][0]["id"], id.as_str());
    assert_eq!(list["deployments"][0]["user"]["name"], "Ada");

    let (status, single) = send(&app, get(&format!("/api/deployments/{}", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(single["currentStep"], Value::Null);
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let harness = Harness::new(ScriptedRunner::happy_path()).await;
    let (status, body) = send(
        &app(&harness),
        deploy_request(PROJECT_ID, Some(USER_ID), "{branch"),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BAD_REQUEST");
    assert_eq!(harness.store.deployment_count().await, 0);
}

#[tokio::test]
async fn test_latest_is_null_without_deployments() {
    let harness = Harness::new(ScriptedRunner::happy_path()).await;
    let (status, body) = send(
        &app(&harness),
        get(&format!("/api/projects/{}/deployments/latest", PROJECT_ID)),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn test_unknown_deployment_is_404() {
    let harness = Harness::new(ScriptedRunner::happy_path()).await;
    let (status, body) = send(&app(&harness), get("/api/deployments/nope")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NOT_FOUND");
}

#[tokio::test]
async fn test_events_endpoint_streams_sse() {
    let harness = Harness::new(ScriptedRunner::happy_path()).await;
    let response = app(&harness)
        .oneshot(get("/api/events?topic=deploy:*"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );
    assert_eq!(harness.bus.subscriber_count(), 1);
}

#[tokio::test]
async fn test_events_endpoint_rejects_unknown_topic() {
    let harness = Harness::new(ScriptedRunner::happy_path()).await;
    let (status, body) = send(&app(&harness), get("/api/events?topic=deploy:logs")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "BAD_REQUEST");
    assert_eq!(harness.bus.subscriber_count(), 0);
}

#[tokio::test]
async fn test_client_against_live_server() {
    let gate = closed_gate();
    let runner = ScriptedRunner::happy_path()
        .on(BUILD, vec![Reply::ok(&[]).gated(gate.clone())]);
    let harness = Harness::new(runner).await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app(&harness);
    let server = tokio::spawn(async move { axum::serve(listener, router).await });

    let client =
        HttpClient::with_user_id(&format!("http://{}/", addr), USER_ID.to_string()).unwrap();
    assert_eq!(client.base_url(), format!("http://{}", addr));

    let started = client
        .start_deploy(PROJECT_ID, Some("main".to_string()))
        .await
        .unwrap();
    harness
        .wait_for_status(&started.id, DeploymentStatus::Building)
        .await;

    let err = client.start_deploy(PROJECT_ID, None).await.unwrap_err();
    assert!(matches!(err, PanelError::Conflict(_)));

    let err = client.start_deploy("missing", None).await.unwrap_err();
    assert!(matches!(err, PanelError::NotFound(_)));

    gate.add_permits(1);
    harness.orchestrator.shutdown().await;

    let finished = client.get_deployment(&started.id).await.unwrap();
    assert_eq!(finished.status, DeploymentStatus::Success);

    let page = client.list_deployments(PROJECT_ID, 10, 0).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.deployments[0].deployment.id, started.id);

    server.abort();
}
