//! Unified OpenAI-compatible streaming chat provider.
//!
//! A single struct that streams chat completions from ALL OpenAI-compatible
//! APIs. Different providers are distinguished only by endpoint URL, auth
//! style, and API key.

use async_trait::async_trait;
use docent_core::config::{FallbackConfig, LlmConfig};
use docent_core::error::{DocentError, Result};
use docent_core::traits::{ChatProvider, TextStream};
use docent_core::types::{GenerateOptions, ModelInfo, RenderedPrompt};
use serde_json::{Value, json};
use std::time::Duration;

use crate::provider_registry::{AuthStyle, ProviderConfig};
use crate::sse;

/// Endpoint-level settings shared by the primary provider and fallbacks.
#[derive(Debug, Clone)]
pub struct ChatEndpoint {
    pub api_key: String,
    pub endpoint: String,
    /// Replaces the per-call model (fallbacks usually name models differently).
    pub model_override: Option<String>,
    pub connect_timeout: Duration,
    pub first_byte_timeout: Duration,
    pub idle_timeout: Duration,
}

impl ChatEndpoint {
    pub fn primary(config: &LlmConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            endpoint: config.endpoint.clone(),
            model_override: None,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            first_byte_timeout: Duration::from_secs(config.first_byte_timeout_secs),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
        }
    }

    pub fn fallback(fallback: &FallbackConfig, config: &LlmConfig) -> Self {
        Self {
            api_key: fallback.api_key.clone(),
            endpoint: fallback.endpoint.clone(),
            model_override: Some(fallback.model.clone()),
            ..Self::primary(config)
        }
    }
}

/// A unified provider that works with any OpenAI-compatible API.
pub struct OpenAiCompatibleProvider {
    /// Provider name (e.g., "openai", "groq", "openrouter").
    name: String,
    /// API key for authentication.
    api_key: String,
    /// Base URL for the API (e.g., "https://api.openai.com/v1").
    base_url: String,
    /// Path for chat completions (e.g., "/chat/completions").
    chat_path: String,
    /// Path for listing models (e.g., "/models").
    models_path: String,
    /// Authentication style.
    auth_style: AuthStyle,
    /// Catalog returned by `list_models` when the live listing fails.
    default_models: Vec<ModelInfo>,
    model_override: Option<String>,
    first_byte_timeout: Duration,
    idle_timeout: Duration,
    /// HTTP client.
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    /// Create from a known provider config.
    ///
    /// Resolution order:
    /// - API key: `endpoint.api_key` > provider env vars
    /// - Base URL: `endpoint.endpoint` > env override > registry default
    ///
    /// Fails with `ApiKeyMissing` when an authenticated provider has no key,
    /// so credentials problems surface at startup.
    pub fn from_registry(registry: &ProviderConfig, endpoint: &ChatEndpoint) -> Result<Self> {
        let api_key = if !endpoint.api_key.is_empty() {
            endpoint.api_key.clone()
        } else {
            registry.env_api_key().unwrap_or_default()
        };
        if registry.auth_style != AuthStyle::None && api_key.is_empty() {
            return Err(DocentError::ApiKeyMissing(registry.name.into()));
        }

        let base_url = if !endpoint.endpoint.is_empty() {
            endpoint.endpoint.trim_end_matches('/').to_string()
        } else {
            registry.resolved_base_url()
        };

        let default_models = registry
            .default_models
            .iter()
            .map(|m| m.to_model_info(registry.name))
            .collect();

        Ok(Self {
            name: registry.name.to_string(),
            api_key,
            base_url,
            chat_path: registry.chat_path.to_string(),
            models_path: registry.models_path.to_string(),
            auth_style: registry.auth_style,
            default_models,
            model_override: endpoint.model_override.clone(),
            first_byte_timeout: endpoint.first_byte_timeout,
            idle_timeout: endpoint.idle_timeout,
            client: build_client(endpoint.connect_timeout)?,
        })
    }

    /// Create for a custom endpoint (e.g., "custom:https://my-server.com/v1").
    pub fn custom(target: &str, endpoint: &ChatEndpoint) -> Result<Self> {
        let base_url = target
            .strip_prefix("custom:")
            .unwrap_or(target)
            .trim_end_matches('/')
            .to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(DocentError::Config(format!(
                "custom provider needs an http(s) URL, got '{base_url}'"
            )));
        }

        let api_key = if !endpoint.api_key.is_empty() {
            endpoint.api_key.clone()
        } else {
            std::env::var("CUSTOM_API_KEY").unwrap_or_default()
        };

        let auth_style = if api_key.is_empty() {
            AuthStyle::None
        } else {
            AuthStyle::Bearer
        };

        Ok(Self {
            name: "custom".to_string(),
            api_key,
            base_url,
            chat_path: "/chat/completions".to_string(),
            models_path: "/models".to_string(),
            auth_style,
            default_models: vec![],
            model_override: endpoint.model_override.clone(),
            first_byte_timeout: endpoint.first_byte_timeout,
            idle_timeout: endpoint.idle_timeout,
            client: build_client(endpoint.connect_timeout)?,
        })
    }

    /// Build the auth header for the request.
    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth_style {
            AuthStyle::Bearer if !self.api_key.is_empty() => {
                req.header("Authorization", format!("Bearer {}", self.api_key))
            }
            _ => req,
        }
    }

    fn model<'a>(&'a self, options: &'a GenerateOptions) -> &'a str {
        self.model_override.as_deref().unwrap_or(&options.model)
    }

    /// Request body for a streamed completion.
    fn request_body(&self, prompt: &RenderedPrompt, options: &GenerateOptions) -> Value {
        json!({
            "model": self.model(options),
            "messages": prompt.messages,
            "temperature": options.temperature,
            "max_tokens": options.max_output_tokens,
            "stream": true,
        })
    }

    /// Fail with a configuration error when the provider lists its models and
    /// `model` is not among them. A listing that cannot be fetched only warns.
    pub async fn verify_model(&self, model: &str) -> Result<()> {
        let model = self.model_override.as_deref().unwrap_or(model);
        match self.fetch_models().await {
            Ok(models) if !models.is_empty() && !models.iter().any(|m| m.id == model) => {
                Err(DocentError::Config(format!(
                    "unknown model '{model}' for provider {}",
                    self.name
                )))
            }
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::warn!("⚠️ Could not verify model '{model}' on {}: {e}", self.name);
                Ok(())
            }
        }
    }

    async fn fetch_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}{}", self.base_url, self.models_path);
        let resp = self
            .apply_auth(self.client.get(&url))
            .timeout(self.first_byte_timeout)
            .send()
            .await
            .map_err(|e| DocentError::Http(format!("{} model listing failed: {e}", self.name)))?;
        if !resp.status().is_success() {
            return Err(DocentError::Http(format!(
                "{} model listing returned {}",
                self.name,
                resp.status()
            )));
        }
        let json: Value = resp
            .json()
            .await
            .map_err(|e| DocentError::Http(e.to_string()))?;
        Ok(json["data"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| {
                        Some(ModelInfo {
                            id: m["id"].as_str()?.to_string(),
                            name: m["id"].as_str()?.to_string(),
                            provider: self.name.clone(),
                            context_length: m["context_length"].as_u64().unwrap_or(4096) as u32,
                            max_output_tokens: None,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn build_client(connect_timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .user_agent(concat!("docent/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| DocentError::Http(format!("failed to build HTTP client: {e}")))
}

#[async_trait]
impl ChatProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream_generate(
        &self,
        prompt: &RenderedPrompt,
        options: &GenerateOptions,
    ) -> Result<TextStream> {
        let body = self.request_body(prompt, options);
        let url = format!("{}{}", self.base_url, self.chat_path);
        let req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body);
        let req = self.apply_auth(req);

        tracing::debug!(
            "Opening stream: provider={}, model={}, max_tokens={}",
            self.name,
            self.model(options),
            options.max_output_tokens
        );

        // Only the wait for response headers is bounded here; the body is
        // governed by the idle timeout inside the decoder.
        let resp = match tokio::time::timeout(self.first_byte_timeout, req.send()).await {
            Err(_) => {
                return Err(DocentError::ProviderTimeout(format!(
                    "{} did not respond within {}s",
                    self.name,
                    self.first_byte_timeout.as_secs()
                )));
            }
            Ok(Err(e)) if e.is_timeout() => {
                return Err(DocentError::ProviderTimeout(format!("{}: {e}", self.name)));
            }
            Ok(Err(e)) => {
                return Err(DocentError::ProviderUnavailable(format!(
                    "{} connection failed ({url}): {e}",
                    self.name
                )));
            }
            Ok(Ok(resp)) => resp,
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(DocentError::ProviderUnavailable(format!(
                "{} API error {status}: {text}",
                self.name
            )));
        }

        Ok(sse::decode_text_stream(resp.bytes_stream(), self.idle_timeout))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        match self.fetch_models().await {
            Ok(models) if !models.is_empty() => Ok(models),
            _ => Ok(self.default_models.clone()),
        }
    }

    async fn health_check(&self) -> Result<bool> {
        if self.auth_style != AuthStyle::None {
            // For cloud providers, just check if API key is set
            return Ok(!self.api_key.is_empty());
        }

        // For local servers (ollama, llamacpp), try to connect
        let url = format!("{}{}", self.base_url, self.models_path);
        let resp = self.client.get(&url).send().await;
        Ok(resp.is_ok())
    }
}
