//! # Docent Providers
//!
//! Network adapters for the two model capabilities Docent needs: turning a
//! query into an embedding and streaming a chat completion.
//!
//! Every supported backend speaks the OpenAI wire format, so a single
//! `OpenAiCompatibleProvider` covers OpenAI, OpenRouter, DeepSeek, Groq,
//! Mistral, Together, Ollama, llama.cpp and vLLM. Fallback providers
//! configured under `[[llm.fallbacks]]` are wrapped in a `FailoverProvider`.

pub mod embedding;
pub mod failover;
pub mod openai_compatible;
pub mod provider_registry;
pub mod sse;

use docent_core::config::{EmbeddingConfig, LlmConfig};
use docent_core::error::{DocentError, Result};
use docent_core::traits::{ChatProvider, EmbeddingClient};

pub use failover::await_first_delta;
use openai_compatible::{ChatEndpoint, OpenAiCompatibleProvider};

fn build_chat(provider_name: &str, endpoint: &ChatEndpoint) -> Result<OpenAiCompatibleProvider> {
    if provider_name.starts_with("custom:") {
        // Custom endpoint: "custom:https://my-server.com/v1"
        return OpenAiCompatibleProvider::custom(provider_name, endpoint);
    }
    let registry = provider_registry::get_provider_config(provider_name)
        .ok_or_else(|| DocentError::ProviderNotFound(provider_name.into()))?;
    OpenAiCompatibleProvider::from_registry(registry, endpoint)
}

/// Create the chat provider from configuration.
///
/// Returns a plain provider when no fallbacks are configured, otherwise a
/// failover chain with the primary first.
pub fn create_provider(config: &LlmConfig) -> Result<Box<dyn ChatProvider>> {
    let primary = build_chat(&config.provider, &ChatEndpoint::primary(config))?;
    if config.fallbacks.is_empty() {
        return Ok(Box::new(primary));
    }

    let mut chain: Vec<Box<dyn ChatProvider>> = vec![Box::new(primary)];
    for fallback in &config.fallbacks {
        let provider = build_chat(&fallback.provider, &ChatEndpoint::fallback(fallback, config))?;
        chain.push(Box::new(provider));
    }
    tracing::debug!("Failover chain with {} providers", chain.len());
    Ok(Box::new(failover::FailoverProvider::new(chain)?))
}

/// Create the primary chat provider and check that it serves the configured model.
pub async fn verify_chat_model(config: &LlmConfig) -> Result<()> {
    build_chat(&config.provider, &ChatEndpoint::primary(config))?
        .verify_model(&config.model)
        .await
}

/// Create the embedding client from configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingClient>> {
    let name = config.provider.as_str();
    if let Some(url) = name.strip_prefix("custom:") {
        let url = url.trim_end_matches('/');
        let endpoint = if url.ends_with("/embeddings") {
            url.to_string()
        } else {
            format!("{url}/embeddings")
        };
        let api_key = if config.api_key.is_empty() {
            std::env::var("CUSTOM_API_KEY").unwrap_or_default()
        } else {
            config.api_key.clone()
        };
        return Ok(Box::new(embedding::OpenAiEmbeddingClient::new(
            "custom", endpoint, api_key, config,
        )?));
    }

    let registry = provider_registry::get_provider_config(name)
        .ok_or_else(|| DocentError::ProviderNotFound(name.into()))?;
    Ok(Box::new(embedding::OpenAiEmbeddingClient::from_registry(
        registry, config,
    )?))
}

/// List all available provider names.
pub fn available_providers() -> Vec<&'static str> {
    let mut names = provider_registry::all_provider_names();
    names.push("custom");
    names
}
