//! Provider Failover: automatic fallback when the primary cannot open a stream.
//!
//! Lightweight failover chain: try primary → fallback₁ → fallback₂.
//! A fallback is only tried before any output exists: a provider counts as
//! answering once its first non-empty delta arrives. After that a failure
//! belongs to the consumer; switching providers then would splice two
//! different answers together.

use async_trait::async_trait;
use docent_core::error::{DocentError, Result};
use docent_core::traits::{ChatProvider, TextStream};
use docent_core::types::{GenerateOptions, ModelInfo, RenderedPrompt};
use futures::StreamExt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Per-provider health tracking.
struct ProviderSlot {
    provider: Box<dyn ChatProvider>,
    /// Consecutive failure count.
    failures: AtomicU32,
    /// Timestamp of last failure (unix secs, 0 = never failed).
    last_failure: AtomicU64,
    /// Max failures before skip (default: 3).
    max_failures: u32,
    /// Cool-down period in seconds before retrying a failed provider.
    cooldown_secs: u64,
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl ProviderSlot {
    fn new(provider: Box<dyn ChatProvider>) -> Self {
        Self {
            provider,
            failures: AtomicU32::new(0),
            last_failure: AtomicU64::new(0),
            max_failures: 3,
            cooldown_secs: 60,
        }
    }

    /// Check if this provider is healthy (below failure threshold or cooldown expired).
    fn is_healthy_at(&self, now: u64) -> bool {
        let fails = self.failures.load(Ordering::Relaxed);
        if fails < self.max_failures {
            return true;
        }
        let last = self.last_failure.load(Ordering::Relaxed);
        now.saturating_sub(last) > self.cooldown_secs
    }

    fn is_healthy(&self) -> bool {
        self.is_healthy_at(now_secs())
    }

    fn record_success(&self) {
        self.failures.store(0, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.last_failure.store(now_secs(), Ordering::Relaxed);
    }
}

/// Tries providers in order, skipping unhealthy ones.
pub struct FailoverProvider {
    slots: Vec<ProviderSlot>,
}

impl FailoverProvider {
    /// Create a failover chain from a list of providers.
    /// First provider is primary, rest are fallbacks.
    pub fn new(providers: Vec<Box<dyn ChatProvider>>) -> Result<Self> {
        if providers.is_empty() {
            return Err(DocentError::Config(
                "failover chain needs at least one provider".into(),
            ));
        }
        Ok(Self {
            slots: providers.into_iter().map(ProviderSlot::new).collect(),
        })
    }

    /// Number of providers in the chain.
    pub fn chain_len(&self) -> usize {
        self.slots.len()
    }

    /// Get health status of all providers.
    pub fn health_status(&self) -> Vec<(&str, bool, u32)> {
        self.slots
            .iter()
            .map(|s| {
                (
                    s.provider.name(),
                    s.is_healthy(),
                    s.failures.load(Ordering::Relaxed),
                )
            })
            .collect()
    }
}

/// Wait for the first non-empty delta and return a stream that replays it.
///
/// A failure seen before any text means the provider never answered, so it
/// is reported as `ProviderUnavailable` (or passed through when it already is
/// a pre-output or configuration error). A stream that ends without text
/// comes back as an empty stream.
pub async fn await_first_delta(mut stream: TextStream) -> Result<TextStream> {
    loop {
        return match stream.next().await {
            Some(Ok(delta)) if delta.is_empty() => continue,
            Some(Ok(delta)) => Ok(Box::pin(
                futures::stream::iter([Ok::<_, DocentError>(delta)]).chain(stream),
            )),
            Some(Err(DocentError::GenerationInterrupted(message))) => {
                Err(DocentError::ProviderUnavailable(message))
            }
            Some(Err(e)) if is_transient(&e) || e.is_configuration() => Err(e),
            Some(Err(e)) => Err(DocentError::ProviderUnavailable(e.to_string())),
            None => Ok(Box::pin(futures::stream::empty::<Result<String>>())),
        };
    }
}

/// Errors worth trying the next provider for. Configuration problems would
/// fail identically everywhere and are surfaced as-is.
fn is_transient(err: &DocentError) -> bool {
    matches!(
        err,
        DocentError::ProviderUnavailable(_) | DocentError::ProviderTimeout(_) | DocentError::Http(_)
    )
}

#[async_trait]
impl ChatProvider for FailoverProvider {
    fn name(&self) -> &str {
        // Return primary provider name
        self.slots
            .first()
            .map(|s| s.provider.name())
            .unwrap_or("failover")
    }

    async fn stream_generate(
        &self,
        prompt: &RenderedPrompt,
        options: &GenerateOptions,
    ) -> Result<TextStream> {
        let mut last_error = None;

        for (idx, slot) in self.slots.iter().enumerate() {
            if !slot.is_healthy() {
                tracing::debug!(
                    "⏭️ Skipping unhealthy provider: {} ({} failures)",
                    slot.provider.name(),
                    slot.failures.load(Ordering::Relaxed)
                );
                continue;
            }

            let opened = match slot.provider.stream_generate(prompt, options).await {
                Ok(stream) => await_first_delta(stream).await,
                Err(e) => Err(e),
            };
            match opened {
                Ok(stream) => {
                    if idx > 0 {
                        tracing::info!(
                            "🔄 Failover: {} → {} (first delta received)",
                            self.slots[0].provider.name(),
                            slot.provider.name()
                        );
                    }
                    slot.record_success();
                    return Ok(stream);
                }
                Err(e) if is_transient(&e) => {
                    slot.record_failure();
                    tracing::warn!(
                        "⚠️ Provider {} failed (attempt {}): {}",
                        slot.provider.name(),
                        slot.failures.load(Ordering::Relaxed),
                        e
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            DocentError::ProviderUnavailable("all providers unhealthy".into())
        }))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        // Aggregate models from all healthy providers
        let mut all = Vec::new();
        for slot in &self.slots {
            if slot.is_healthy()
                && let Ok(models) = slot.provider.list_models().await
            {
                all.extend(models);
            }
        }
        Ok(all)
    }

    async fn health_check(&self) -> Result<bool> {
        // Healthy if at least one provider is healthy
        for slot in &self.slots {
            if slot.is_healthy()
                && let Ok(true) = slot.provider.health_check().await
            {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
