use async_trait::async_trait;

use crate::error::Result;
use crate::types::{EmbeddingVector, Metric, ScoredPassage};

/// Read-only nearest-neighbour search over a persisted collection of passages.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Dimensionality the index was populated with.
    fn dimensions(&self) -> usize;

    fn metric(&self) -> Metric;

    /// Up to `k` hits. An empty index yields an empty vec, not an error;
    /// connectivity problems yield `IndexUnavailable`.
    async fn search(&self, vector: &EmbeddingVector, k: usize) -> Result<Vec<ScoredPassage>>;

    /// Number of stored passages.
    async fn count(&self) -> Result<usize>;
}
