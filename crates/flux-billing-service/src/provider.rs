//! Generation provider client.
//!
//! The provider creates the generation job and writes the local job record as
//! a side effect; it answers with its own reference for the job. Job creation
//! is not idempotent, so a request is sent at most once and never retried.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use flux_billing_core::{BillingError, GenerationRequest, UserId};

/// Error type for provider calls.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The request never reached the provider. Nothing was created.
    #[error("provider unreachable: {0}")]
    Unreachable(String),

    /// The provider answered with a non-success status. Nothing was created.
    #[error("provider rejected request: {status} - {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body or status text.
        message: String,
    },

    /// The request was sent but the outcome is unknown (timeout, dropped
    /// connection, unreadable success body). A job may exist upstream.
    #[error("provider outcome unknown: {0}")]
    UnknownOutcome(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<ProviderError> for BillingError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::UnknownOutcome(msg) => Self::UpstreamInconsistency(msg),
            other => Self::Upstream(other.to_string()),
        }
    }
}

/// Creates generation jobs.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Create a job for `user_id` and return the provider's reference for it.
    async fn create_job(
        &self,
        user_id: &UserId,
        request: &GenerationRequest,
    ) -> Result<String, ProviderError>;
}

/// Body sent to `POST /flux/create`.
#[derive(Debug, Serialize)]
struct CreateJobRequest<'a> {
    model: &'static str,
    input_prompt: &'a str,
    aspect_ratio: &'static str,
    is_private: i32,
    user_id: &'a str,
    locale: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateJobResponse {
    replicate_id: String,
}

/// HTTP client for the Flux generation API.
#[derive(Debug, Clone)]
pub struct FluxClient {
    client: Client,
    base_url: String,
    api_token: String,
}

impl FluxClient {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - API URL (e.g., `"https://api.example.com"`)
    /// * `api_token` - value for the `API-TOKEN` header
    /// * `timeout` - total request timeout
    pub fn new(
        base_url: impl Into<String>,
        api_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token: api_token.into(),
        })
    }
}

fn classify_send_error(err: &reqwest::Error) -> ProviderError {
    if err.is_connect() || err.is_builder() {
        ProviderError::Unreachable(err.to_string())
    } else {
        ProviderError::UnknownOutcome(err.to_string())
    }
}

#[async_trait]
impl GenerationProvider for FluxClient {
    async fn create_job(
        &self,
        user_id: &UserId,
        request: &GenerationRequest,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/flux/create", self.base_url);
        let body = CreateJobRequest {
            model: request.model.provider_name(),
            input_prompt: &request.input_prompt,
            aspect_ratio: request.aspect_ratio.as_str(),
            is_private: request.is_private,
            user_id: user_id.as_str(),
            locale: &request.locale,
        };

        let response = self
            .client
            .post(&url)
            .header("API-TOKEN", &self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_send_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .ok()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| format!("HTTP {status}"));
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let created: CreateJobResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::UnknownOutcome(e.to_string()))?;

        tracing::debug!(user_id = %user_id, provider_ref = %created.replicate_id, "Provider job created");
        Ok(created.replicate_id)
    }
}
