//! Mapping of panel errors onto HTTP responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use panel_api::models::{codes, ErrorResponse};
use tracing::error;

use crate::errors::PanelError;

/// Error returned by request handlers
#[derive(Debug)]
pub struct ApiError(pub PanelError);

impl From<PanelError> for ApiError {
    fn from(err: PanelError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            PanelError::NotFound(_) => (StatusCode::NOT_FOUND, codes::NOT_FOUND),
            PanelError::Conflict(_) => (StatusCode::CONFLICT, codes::DEPLOY_IN_PROGRESS),
            PanelError::ValidationError(_) => (StatusCode::BAD_REQUEST, codes::BAD_REQUEST),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, codes::INTERNAL),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }

        let body = ErrorResponse {
            error: code.to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
