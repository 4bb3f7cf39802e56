use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::error::Result;
use crate::types::{GenerateOptions, ModelInfo, RenderedPrompt};

/// Lazy, forward-only sequence of generated text deltas.
///
/// An `Err` item ends generation early; dropping the stream cancels the
/// underlying request.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A streaming chat-completion backend.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Open a completion stream. Errors returned here happen before any output
    /// (`ProviderUnavailable` / `ProviderTimeout`).
    async fn stream_generate(
        &self,
        prompt: &RenderedPrompt,
        options: &GenerateOptions,
    ) -> Result<TextStream>;

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(vec![])
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
