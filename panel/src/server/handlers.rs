//! HTTP request handlers

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use futures::stream::{self, Stream};
use panel_api::models::{
    DeploymentListResponse, HealthResponse, ListDeploymentsQuery, StartDeployRequest,
    VersionResponse,
};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::errors::PanelError;
use crate::events::bus::DeployEvent;
use crate::events::topics::Topics;
use crate::server::error::ApiError;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Header naming the user who triggers a deploy
pub const USER_ID_HEADER: &str = "x-user-id";

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "vpanel".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

fn user_id(headers: &HeaderMap) -> Result<String, PanelError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| PanelError::ValidationError("missing X-User-Id header".to_string()))
}

/// An empty body means "deploy the default branch"
fn parse_start_request(body: &[u8]) -> Result<StartDeployRequest, PanelError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(StartDeployRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| PanelError::ValidationError(format!("invalid request body: {}", e)))
}

/// Start a deployment; the pipeline keeps running after the response
pub async fn start_deploy_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user_id(&headers)?;
    let request = parse_start_request(&body)?;

    let deployment = state
        .orchestrator
        .start_deploy(&project_id, &user_id, request.branch)
        .await?;

    Ok((StatusCode::CREATED, Json(deployment)))
}

/// Deployment history of a project
pub async fn list_deployments_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
    Query(query): Query<ListDeploymentsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state
        .orchestrator
        .get_deployments(&project_id, query.limit, query.offset)
        .await?;

    Ok(Json(DeploymentListResponse {
        deployments: page.deployments,
        total: page.total,
    }))
}

/// Newest deployment of a project, `null` when there is none
pub async fn latest_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(project_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let latest = state
        .orchestrator
        .get_latest_deployment(&project_id)
        .await?;
    Ok(Json(latest))
}

pub async fn get_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(deployment_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let deployment = state.orchestrator.get_deployment(&deployment_id).await?;
    Ok(Json(deployment))
}

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    /// Topic filter, e.g. `deploy:log` or `deploy:*`
    pub topic: Option<String>,
}

fn to_sse(event: &DeployEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_default();
    Event::default().event(event.topic()).data(data)
}

/// Live stream of deployment events
pub async fn events_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let filter = query.topic.unwrap_or_else(|| "*".to_string());
    if !Topics::is_valid_filter(&filter) {
        return Err(PanelError::ValidationError(format!("unknown topic {}", filter)).into());
    }
    debug!("New event subscriber (topic filter {})", filter);

    let rx = state.bus.subscribe();
    let events = stream::unfold((rx, filter), |(mut rx, filter)| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if Topics::matches(&filter, event.topic()) {
                        let sse = to_sse(&event);
                        return Some((Ok(sse), (rx, filter)));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Event subscriber lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
