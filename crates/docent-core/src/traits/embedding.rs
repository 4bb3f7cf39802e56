use async_trait::async_trait;

use crate::error::Result;
use crate::types::EmbeddingVector;

/// Turns free text into an embedding vector.
///
/// Implementations are shared process-wide and must be safe for concurrent use.
/// Any retry policy belongs to the implementation.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    fn name(&self) -> &str;

    /// Dimensionality of the vectors this client produces.
    fn dimensions(&self) -> usize;

    /// Fails with `EmbeddingUnavailable` on network, auth or quota errors.
    async fn embed(&self, text: &str) -> Result<EmbeddingVector>;
}
