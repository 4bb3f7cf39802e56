//! Pipeline Orchestrator: one entry point from raw query to answer stream.
//!
//! ```text
//! Validating ──✗──▶ Rejected
//!     │
//!     ▼
//! Retrieving ──(failure: degrade to empty context)──┐
//!     │                                             │
//!     ▼                                             ▼
//! Assembling ──▶ Generating ──▶ Done (hooks fired)
//! ```
//!
//! Shared collaborators are opened once and held behind `Arc`s; a cloned
//! `Pipeline` serves concurrent requests and the connections close only
//! when the last clone drops.

use docent_core::config::{DocentConfig, EmptyContextPolicy};
use docent_core::error::{DocentError, Result};
use docent_core::traits::{ChatProvider, CompletionHook, EmbeddingClient, VectorIndex};
use docent_core::types::{
    ContextBundle, GenerateOptions, Query, RawQuery, RetrievalResult, RetrievalStage, StreamEvent,
};
use futures::Stream;
use std::fmt;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::Instrument;

use crate::hooks::{JsonlAuditHook, LogHook};
use crate::prompt::PromptAssembler;
use crate::retriever::{DEFAULT_K, Retriever};
use crate::streamer::{CompletionContext, GenerationStream, GenerationStreamer};

/// Stages a request moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Validating,
    Rejected,
    Retrieving,
    Assembling,
    Generating,
    Done,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validating => "validating",
            Self::Rejected => "rejected",
            Self::Retrieving => "retrieving",
            Self::Assembling => "assembling",
            Self::Generating => "generating",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Per-request behaviour, resolved from configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub k: NonZeroUsize,
    pub options: GenerateOptions,
    pub max_context_chars: Option<usize>,
    /// Whole-request wall-clock bound.
    pub timeout: Duration,
    pub empty_context: EmptyContextPolicy,
    pub canned_answer: String,
}

impl PipelineSettings {
    pub fn from_config(config: &DocentConfig) -> Result<Self> {
        let k = NonZeroUsize::new(config.retrieval.k)
            .ok_or_else(|| DocentError::Config("retrieval.k must be at least 1".into()))?;
        Ok(Self {
            k,
            options: GenerateOptions {
                model: config.llm.model.clone(),
                temperature: config.llm.temperature,
                max_output_tokens: config.llm.max_tokens,
            },
            max_context_chars: config.retrieval.max_context_chars,
            timeout: Duration::from_secs(config.pipeline.timeout_secs),
            empty_context: config.pipeline.empty_context,
            canned_answer: config.pipeline.canned_answer.clone(),
        })
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            options: GenerateOptions {
                model: "openai/gpt-4o-mini".into(),
                temperature: 0.7,
                max_output_tokens: 1024,
            },
            max_context_chars: None,
            timeout: Duration::from_secs(60),
            empty_context: EmptyContextPolicy::Generate,
            canned_answer: "I could not find anything in the knowledge base that answers this question."
                .into(),
        }
    }
}

struct Shared {
    retriever: Retriever,
    assembler: PromptAssembler,
    streamer: GenerationStreamer,
    hooks: Vec<Arc<dyn CompletionHook>>,
    settings: PipelineSettings,
}

/// The RAG pipeline. Cheap to clone.
#[derive(Clone)]
pub struct Pipeline {
    shared: Arc<Shared>,
}

impl Pipeline {
    /// Open every collaborator named by `config`. Missing credentials,
    /// unknown providers and dimension mismatches fail here.
    pub async fn connect(config: &DocentConfig) -> Result<Self> {
        config.validate()?;
        let embedder: Arc<dyn EmbeddingClient> =
            Arc::from(docent_providers::create_embedder(&config.embedding)?);
        let index: Arc<dyn VectorIndex> =
            Arc::from(docent_index::open_index(&config.index, embedder.dimensions()).await?);
        let provider: Arc<dyn ChatProvider> =
            Arc::from(docent_providers::create_provider(&config.llm)?);

        let mut hooks: Vec<Arc<dyn CompletionHook>> = vec![Arc::new(LogHook)];
        if !config.pipeline.audit_log.trim().is_empty() {
            let path = shellexpand::tilde(&config.pipeline.audit_log).to_string();
            hooks.push(Arc::new(JsonlAuditHook::open(std::path::Path::new(&path))?));
        }

        tracing::info!(
            "🚀 Pipeline ready: embed={} ({} dims), index={} ({}), llm={}/{}",
            embedder.name(),
            embedder.dimensions(),
            index.name(),
            index.metric(),
            provider.name(),
            config.llm.model
        );
        Self::from_parts(
            embedder,
            index,
            provider,
            hooks,
            PipelineSettings::from_config(config)?,
        )
    }

    /// Assemble a pipeline from already-open collaborators.
    pub fn from_parts(
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        provider: Arc<dyn ChatProvider>,
        hooks: Vec<Arc<dyn CompletionHook>>,
        settings: PipelineSettings,
    ) -> Result<Self> {
        if embedder.dimensions() != index.dimensions() {
            return Err(DocentError::DimensionMismatch {
                expected: index.dimensions(),
                actual: embedder.dimensions(),
            });
        }
        settings.options.validate()?;
        if settings.timeout.is_zero() {
            return Err(DocentError::Config("pipeline timeout must be positive".into()));
        }

        Ok(Self {
            shared: Arc::new(Shared {
                retriever: Retriever::new(embedder, index),
                assembler: PromptAssembler::new(settings.max_context_chars),
                streamer: GenerationStreamer::new(provider),
                hooks,
                settings,
            }),
        })
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.shared.settings
    }

    pub fn retriever(&self) -> &Retriever {
        &self.shared.retriever
    }

    pub fn provider(&self) -> &Arc<dyn ChatProvider> {
        self.shared.streamer.provider()
    }

    /// Answer a query with the configured `k`.
    pub async fn handle(&self, raw: impl Into<RawQuery>) -> Result<AnswerStream> {
        self.handle_with_k(raw, self.shared.settings.k).await
    }

    /// Answer a query, retrieving `k` passages.
    ///
    /// Errors returned here happen before any output: `InvalidInput`,
    /// configuration errors, `ProviderUnavailable` and `ProviderTimeout`.
    /// Failures after the first fragment arrive in-band as
    /// `StreamEvent::Interrupted`.
    pub async fn handle_with_k(
        &self,
        raw: impl Into<RawQuery>,
        k: NonZeroUsize,
    ) -> Result<AnswerStream> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("request", id = %request_id);
        self.run(raw.into(), k, request_id).instrument(span).await
    }

    async fn run(&self, raw: RawQuery, k: NonZeroUsize, request_id: String) -> Result<AnswerStream> {
        let shared = &self.shared;
        let deadline = tokio::time::Instant::now() + shared.settings.timeout;

        transition(PipelineState::Validating);
        let query = match Query::parse(raw) {
            Ok(query) => query,
            Err(e) => {
                transition(PipelineState::Rejected);
                tracing::info!("Query rejected: {e}");
                return Err(e);
            }
        };

        transition(PipelineState::Retrieving);
        let retrieval =
            match tokio::time::timeout_at(deadline, shared.retriever.retrieve(&query, k)).await {
                Ok(result) => result?,
                Err(_) => RetrievalResult::failed(
                    RetrievalStage::Deadline,
                    "request deadline elapsed during retrieval",
                ),
            };
        if let Some(failure) = &retrieval.failure {
            tracing::warn!(
                "⚠️ Retrieval failed at {:?} stage, answering without context: {}",
                failure.stage,
                failure.message
            );
        }

        transition(PipelineState::Assembling);
        let bundle = shared.assembler.fit(ContextBundle::from_result(&retrieval));
        let context = CompletionContext::new(request_id.clone(), shared.settings.options.model.clone())
            .with_hooks(shared.hooks.clone());

        if bundle.is_empty() && shared.settings.empty_context == EmptyContextPolicy::Canned {
            tracing::info!("No context found, returning canned answer");
            let context = CompletionContext {
                model: "canned".into(),
                ..context
            };
            transition(PipelineState::Generating);
            return Ok(AnswerStream {
                request_id,
                retrieval,
                stream: GenerationStream::from_text(shared.settings.canned_answer.clone(), context),
            });
        }
        let prompt = shared.assembler.assemble(&bundle, &query);

        transition(PipelineState::Generating);
        let opened = tokio::time::timeout_at(
            deadline,
            shared.streamer.stream(&prompt, &shared.settings.options, context),
        )
        .await;
        let stream = match opened {
            Ok(stream) => stream?,
            Err(_) => {
                return Err(DocentError::ProviderTimeout(
                    "request deadline elapsed before the model responded".into(),
                ));
            }
        };

        Ok(AnswerStream {
            request_id,
            retrieval,
            stream: stream.with_deadline(deadline),
        })
    }
}

fn transition(state: PipelineState) {
    tracing::debug!("→ {state}");
}

/// A streamed answer plus what it was grounded on.
pub struct AnswerStream {
    request_id: String,
    retrieval: RetrievalResult,
    stream: GenerationStream,
}

impl AnswerStream {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Passages the answer is grounded on (empty when retrieval degraded).
    pub fn retrieval(&self) -> &RetrievalResult {
        &self.retrieval
    }

    pub fn is_degraded(&self) -> bool {
        self.retrieval.is_degraded()
    }

    /// Drain the stream, returning the final text or `(partial, reason)`.
    pub async fn collect_text(self) -> std::result::Result<String, (String, String)> {
        self.stream.collect_text().await
    }
}

impl Stream for AnswerStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.stream).poll_next(cx);
        if matches!(
            &polled,
            Poll::Ready(Some(StreamEvent::Done { .. } | StreamEvent::Interrupted { .. }))
        ) {
            tracing::debug!(id = %this.request_id, "→ {}", PipelineState::Done);
        }
        polled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let mut config = DocentConfig::default();
        config.retrieval.k = 6;
        config.pipeline.timeout_secs = 5;
        let settings = PipelineSettings::from_config(&config).unwrap();
        assert_eq!(settings.k.get(), 6);
        assert_eq!(settings.timeout, Duration::from_secs(5));
        assert_eq!(settings.options.max_output_tokens, 1024);

        config.retrieval.k = 0;
        assert!(PipelineSettings::from_config(&config).is_err());
    }

    #[test]
    fn test_state_names() {
        assert_eq!(PipelineState::Retrieving.to_string(), "retrieving");
        assert_eq!(PipelineState::Rejected.to_string(), "rejected");
    }
}
