//! HTTP client implementation

use std::time::Duration;

use panel_api::models::{codes, ErrorResponse};
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use crate::errors::PanelError;
use crate::server::handlers::USER_ID_HEADER;

/// HTTP client for the panel API
pub struct HttpClient {
    client: Client,
    base_url: String,
    user_id: Option<String>,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str) -> Result<Self, PanelError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            user_id: None,
        })
    }

    /// Create a new HTTP client acting on behalf of `user_id`
    pub fn with_user_id(base_url: &str, user_id: String) -> Result<Self, PanelError> {
        let mut client = Self::new(base_url)?;
        client.user_id = Some(user_id);
        Ok(client)
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn with_user(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.user_id {
            Some(user_id) => request.header(USER_ID_HEADER, user_id),
            None => request,
        }
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, PanelError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self.with_user(self.client.get(&url)).send().await?;
        Self::parse(response).await
    }

    /// Make a POST request
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, PanelError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let response = self
            .with_user(self.client.post(&url).json(body))
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, PanelError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        error!("HTTP request failed: {} - {}", status, body);

        Err(match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(err) if err.error == codes::DEPLOY_IN_PROGRESS => PanelError::Conflict(err.message),
            Ok(err) if err.error == codes::NOT_FOUND => PanelError::NotFound(err.message),
            Ok(err) if err.error == codes::BAD_REQUEST => {
                PanelError::ValidationError(err.message)
            }
            Ok(err) => PanelError::ServerError(format!("{}: {}", status, err.message)),
            Err(_) => PanelError::ServerError(format!("{}: {}", status, body)),
        })
    }
}
