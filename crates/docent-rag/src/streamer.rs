//! Generation Streamer: relays provider deltas as ordered fragments.
//!
//! `GenerationStream` is a pull-based `Stream<Item = StreamEvent>`: the
//! provider is only polled when the consumer asks for the next event, so
//! transport backpressure reaches the socket unchanged. Every stream ends
//! with exactly one terminal event (`Done` or `Interrupted`) unless the
//! consumer drops it first.
//!
//! Completion hooks run exactly once per stream:
//! - after `Done` with outcome `Finished`
//! - after `Interrupted` with outcome `Interrupted` or `TimedOut`
//! - from `Drop` with outcome `Cancelled` when the consumer gives up early

use docent_core::error::{DocentError, Result};
use docent_core::traits::{ChatProvider, Completion, CompletionHook, CompletionOutcome, TextStream};
use docent_core::types::{GenerateOptions, RenderedPrompt, StreamEvent, StreamFragment};
use docent_providers::await_first_delta;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

/// Who is asking, for completion bookkeeping.
#[derive(Clone)]
pub struct CompletionContext {
    pub request_id: String,
    pub model: String,
    pub hooks: Vec<Arc<dyn CompletionHook>>,
}

impl CompletionContext {
    pub fn new(request_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            model: model.into(),
            hooks: Vec::new(),
        }
    }

    pub fn with_hooks(mut self, hooks: Vec<Arc<dyn CompletionHook>>) -> Self {
        self.hooks = hooks;
        self
    }
}

/// Opens generation streams against one chat provider.
#[derive(Clone)]
pub struct GenerationStreamer {
    provider: Arc<dyn ChatProvider>,
}

impl GenerationStreamer {
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<dyn ChatProvider> {
        &self.provider
    }

    /// Open a stream and wait for the first fragment.
    ///
    /// Anything that goes wrong before that fragment is an error here, never
    /// an in-band interruption: `Config` for bad options, `ProviderUnavailable`
    /// or `ProviderTimeout` when the provider does not answer.
    pub async fn stream(
        &self,
        prompt: &RenderedPrompt,
        options: &GenerateOptions,
        context: CompletionContext,
    ) -> Result<GenerationStream> {
        options.validate()?;
        let opened = self.provider.stream_generate(prompt, options).await?;
        let inner = await_first_delta(opened).await?;
        tracing::debug!("Stream opened on {}", self.provider.name());
        Ok(GenerationStream::new(inner, context))
    }
}

/// Incremental answer with completion bookkeeping attached.
pub struct GenerationStream {
    inner: Option<TextStream>,
    deadline: Option<Pin<Box<tokio::time::Sleep>>>,
    text: String,
    fragments: usize,
    started: Instant,
    /// Taken when the hooks fire; `None` means the stream has ended.
    context: Option<CompletionContext>,
}

impl GenerationStream {
    pub fn new(inner: TextStream, context: CompletionContext) -> Self {
        Self {
            inner: Some(inner),
            deadline: None,
            text: String::new(),
            fragments: 0,
            started: Instant::now(),
            context: Some(context),
        }
    }

    /// A stream that delivers `text` as a single fragment, for answers that
    /// need no model call.
    pub fn from_text(text: impl Into<String>, context: CompletionContext) -> Self {
        let text: String = text.into();
        Self::new(
            Box::pin(futures::stream::iter([Ok::<_, DocentError>(text)])),
            context,
        )
    }

    /// Interrupt the stream with outcome `TimedOut` once `deadline` passes.
    pub fn with_deadline(mut self, deadline: tokio::time::Instant) -> Self {
        self.deadline = Some(Box::pin(tokio::time::sleep_until(deadline)));
        self
    }

    /// Text delivered so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_finished(&self) -> bool {
        self.context.is_none()
    }

    /// Drop the provider stream (cancelling the request) and run the hooks.
    fn finish(&mut self, outcome: CompletionOutcome) {
        self.inner = None;
        self.deadline = None;
        let Some(context) = self.context.take() else {
            return;
        };
        let completion = Completion {
            request_id: context.request_id,
            model: context.model,
            text: self.text.clone(),
            outcome,
            fragments: self.fragments,
            elapsed: self.started.elapsed(),
        };
        tracing::debug!("Stream done: {:?}", completion.outcome);
        for hook in &context.hooks {
            if let Err(e) = hook.on_complete(&completion) {
                tracing::warn!("⚠️ Completion hook '{}' failed: {e}", hook.name());
            }
        }
    }

    fn interrupt(&mut self, outcome: CompletionOutcome, reason: String) -> StreamEvent {
        self.finish(outcome);
        StreamEvent::Interrupted {
            partial: self.text.clone(),
            reason,
        }
    }

    /// Drain the stream, returning the final text or the interruption.
    pub async fn collect_text(mut self) -> std::result::Result<String, (String, String)> {
        use futures::StreamExt;
        while let Some(event) = self.next().await {
            match event {
                StreamEvent::Fragment(_) => {}
                StreamEvent::Done { text } => return Ok(text),
                StreamEvent::Interrupted { partial, reason } => return Err((partial, reason)),
            }
        }
        Ok(self.text.clone())
    }
}

impl Stream for GenerationStream {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        let this = self.get_mut();

        if let Some(deadline) = this.deadline.as_mut()
            && deadline.as_mut().poll(cx).is_ready()
        {
            let event = this.interrupt(
                CompletionOutcome::TimedOut,
                "request deadline exceeded".into(),
            );
            return Poll::Ready(Some(event));
        }

        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        loop {
            return match inner.as_mut().poll_next(cx) {
                Poll::Pending => Poll::Pending,
                // Empty deltas carry nothing; keep pulling
                Poll::Ready(Some(Ok(delta))) if delta.is_empty() => continue,
                Poll::Ready(Some(Ok(delta))) => {
                    this.text.push_str(&delta);
                    let index = this.fragments;
                    this.fragments += 1;
                    Poll::Ready(Some(StreamEvent::Fragment(StreamFragment {
                        index,
                        text: delta,
                    })))
                }
                Poll::Ready(Some(Err(e))) => {
                    let reason = e.to_string();
                    let event = this.interrupt(
                        CompletionOutcome::Interrupted {
                            reason: reason.clone(),
                        },
                        reason,
                    );
                    Poll::Ready(Some(event))
                }
                Poll::Ready(None) => {
                    this.finish(CompletionOutcome::Finished);
                    Poll::Ready(Some(StreamEvent::Done {
                        text: this.text.clone(),
                    }))
                }
            };
        }
    }
}

impl Drop for GenerationStream {
    fn drop(&mut self) {
        if self.context.is_some() {
            self.finish(CompletionOutcome::Cancelled);
        }
    }
}
