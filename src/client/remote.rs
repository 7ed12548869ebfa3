//! HTTP client for the resident server.

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::handlers::{
    HealthResponse, SearchRequest, ShutdownResponse, UpdateRequest, UpdateResponse,
};
use crate::retrieval::SearchHit;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    base_url: String,
    health_timeout: Duration,
    search_timeout: Duration,
    update_timeout: Duration,
    shutdown_timeout: Duration,
}

impl RemoteClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            // Loopback only; a system proxy would never reach the server
            .no_proxy()
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url(),
            health_timeout: config.health_timeout,
            search_timeout: config.search_timeout,
            update_timeout: config.update_timeout,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET /health with the short liveness timeout.
    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .timeout(self.health_timeout)
            .send()
            .await?;
        decode(response).await
    }

    /// True if the server answers `/health` in time.
    pub async fn is_live(&self) -> bool {
        match self.health().await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(url = %self.base_url, error = %e, "Liveness probe failed");
                false
            }
        }
    }

    pub async fn search(&self, query: &str, top_k: i64) -> Result<Vec<SearchHit>> {
        let request = SearchRequest {
            query: query.to_string(),
            top_k: Some(top_k),
        };
        self.post("/search", &request, self.search_timeout).await
    }

    pub async fn update(&self, force: bool) -> Result<UpdateResponse> {
        self.post("/update", &UpdateRequest { force }, self.update_timeout)
            .await
    }

    pub async fn shutdown(&self) -> Result<ShutdownResponse> {
        let response = self
            .http
            .post(format!("{}/shutdown", self.base_url))
            .timeout(self.shutdown_timeout)
            .send()
            .await?;
        decode(response).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<T> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .timeout(timeout)
            .send()
            .await?;
        decode(response).await
    }
}

/// Turn a response into `T`, or into the `AppError` the server reported.
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let message = match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => format!("server returned {}", status),
    };
    Err(error_for_status(status, message))
}

fn error_for_status(status: StatusCode, message: String) -> AppError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            AppError::ValidationError(message)
        }
        StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS => AppError::ResourceError(message),
        _ => AppError::ModelError(message),
    }
}
