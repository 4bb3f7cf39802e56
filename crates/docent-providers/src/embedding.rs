//! OpenAI-compatible embeddings client.
//!
//! One query string in, one vector out. Rate limits and server errors are
//! retried with exponential backoff; anything else fails fast as
//! `EmbeddingUnavailable`.

use async_trait::async_trait;
use docent_core::config::EmbeddingConfig;
use docent_core::error::{DocentError, Result};
use docent_core::traits::EmbeddingClient;
use docent_core::types::EmbeddingVector;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::provider_registry::{AuthStyle, ProviderConfig};

/// Embeddings client for any provider exposing `/embeddings`.
pub struct OpenAiEmbeddingClient {
    name: String,
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: usize,
    /// Whether `dimensions` is sent with each request.
    request_dimensions: bool,
    max_retries: usize,
    base_backoff: Duration,
}

impl OpenAiEmbeddingClient {
    /// Build a client for a registry provider.
    ///
    /// Fails with `Config` when the provider serves no embeddings and with
    /// `ApiKeyMissing` when an authenticated provider has no key.
    pub fn from_registry(registry: &ProviderConfig, config: &EmbeddingConfig) -> Result<Self> {
        let path = registry.embeddings_path.ok_or_else(|| {
            DocentError::Config(format!(
                "provider '{}' does not serve embeddings",
                registry.name
            ))
        })?;

        let api_key = if !config.api_key.is_empty() {
            config.api_key.clone()
        } else {
            registry.env_api_key().unwrap_or_default()
        };
        if registry.auth_style != AuthStyle::None && api_key.trim().is_empty() {
            return Err(DocentError::ApiKeyMissing(registry.name.into()));
        }

        let base_url = if !config.endpoint.is_empty() {
            config.endpoint.trim_end_matches('/').to_string()
        } else {
            registry.resolved_base_url()
        };

        Self::new(
            registry.name,
            format!("{base_url}{path}"),
            api_key,
            config,
        )
    }

    /// Build a client for an explicit endpoint URL (the full `/embeddings` URL).
    pub fn new(
        name: &str,
        endpoint: String,
        api_key: String,
        config: &EmbeddingConfig,
    ) -> Result<Self> {
        if config.model.trim().is_empty() {
            return Err(DocentError::Config("embedding model is empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DocentError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            name: name.to_string(),
            client,
            endpoint,
            api_key: api_key.trim().to_string(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            request_dimensions: config.request_dimensions,
            max_retries: config.max_retries.max(1),
            base_backoff: Duration::from_millis(500),
        })
    }

    /// Shorten the backoff base (tests talk to local listeners).
    pub fn with_base_backoff(mut self, backoff: Duration) -> Self {
        self.base_backoff = backoff;
        self
    }

    fn should_retry(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    fn is_retryable_error(err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect() || err.is_body() || err.is_request()
    }

    fn retry_backoff(&self, attempt: usize) -> Duration {
        let capped = attempt.min(5) as u32;
        self.base_backoff * (1 << capped)
    }

    async fn request_once(&self, text: &str) -> std::result::Result<Vec<f32>, Attempt> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: [text],
            dimensions: self.request_dimensions.then_some(self.dimensions),
        };
        let mut req = self.client.post(&self.endpoint).json(&request);
        if !self.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(err) if Self::is_retryable_error(&err) => {
                return Err(Attempt::Retry(format!("request failed: {err}")));
            }
            Err(err) => return Err(Attempt::Fatal(format!("request failed: {err}"))),
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            let message = format!("{} embeddings request failed ({status}): {body}", self.name);
            return Err(if Self::should_retry(status) {
                Attempt::Retry(message)
            } else {
                Attempt::Fatal(message)
            });
        }

        let parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| Attempt::Fatal(format!("failed to parse embedding response: {e}")))?;
        parsed
            .data
            .into_iter()
            .min_by_key(|entry| entry.index)
            .map(|entry| entry.embedding)
            .ok_or_else(|| Attempt::Fatal("embedding response carried no data".into()))
    }
}

enum Attempt {
    Retry(String),
    Fatal(String),
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        let mut attempt = 0usize;
        let values = loop {
            match self.request_once(text).await {
                Ok(values) => break values,
                Err(Attempt::Retry(message)) if attempt + 1 < self.max_retries => {
                    attempt += 1;
                    let delay = self.retry_backoff(attempt);
                    tracing::debug!(
                        "Embedding attempt {attempt} failed, retrying in {}ms: {message}",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(Attempt::Retry(message) | Attempt::Fatal(message)) => {
                    return Err(DocentError::EmbeddingUnavailable(message));
                }
            }
        };

        let vector = EmbeddingVector::new(values);
        vector.ensure_dimensions(self.dimensions)?;
        Ok(vector)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}
