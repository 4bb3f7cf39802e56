//! Retriever: query → embedding → nearest passages.
//!
//! Transient collaborator failures degrade to an empty result carrying a
//! `RetrievalFailure`; only configuration problems (dimension mismatch and
//! the like) are returned as errors. No retries happen here.

use docent_core::error::Result;
use docent_core::traits::{EmbeddingClient, VectorIndex};
use docent_core::types::{Query, RetrievalResult, RetrievalStage, ScoredPassage};
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Default number of passages to retrieve.
pub const DEFAULT_K: NonZeroUsize = match NonZeroUsize::new(4) {
    Some(k) => k,
    None => unreachable!(),
};

#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingClient>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingClient> {
        &self.embedder
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Retrieve up to `k` passages, most similar first.
    pub async fn retrieve(&self, query: &Query, k: NonZeroUsize) -> Result<RetrievalResult> {
        let vector = match self.embedder.embed(query.as_str()).await {
            Ok(vector) => vector,
            Err(e) if e.is_configuration() => return Err(e),
            Err(e) => {
                tracing::warn!("⚠️ Embedding via {} failed: {e}", self.embedder.name());
                return Ok(RetrievalResult::failed(RetrievalStage::Embedding, e.to_string()));
            }
        };
        vector.ensure_dimensions(self.index.dimensions())?;

        let hits = match self.index.search(&vector, k.get()).await {
            Ok(hits) => hits,
            Err(e) if e.is_configuration() => return Err(e),
            Err(e) => {
                tracing::warn!("⚠️ Search on {} index failed: {e}", self.index.name());
                return Ok(RetrievalResult::failed(RetrievalStage::Search, e.to_string()));
            }
        };

        let passages = rank(hits, k.get());
        tracing::debug!(
            "Retrieved {} passages (top score {:?})",
            passages.len(),
            passages.first().map(|p| p.score)
        );
        Ok(RetrievalResult::found(passages))
    }
}

/// Order by non-increasing score and keep at most `k`.
///
/// Backends are not trusted to return hits in order. The sort is stable, so
/// ties keep the backend's order. Non-finite scores cannot be ranked and are
/// dropped.
pub fn rank(mut hits: Vec<ScoredPassage>, k: usize) -> Vec<ScoredPassage> {
    hits.retain(|p| p.score.is_finite());
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docent_core::error::DocentError;
    use docent_core::types::{EmbeddingVector, Metric};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedEmbedder {
        dims: usize,
        fail: Option<fn() -> DocentError>,
    }

    #[async_trait]
    impl EmbeddingClient for FixedEmbedder {
        fn name(&self) -> &str {
            "fixed"
        }
        fn dimensions(&self) -> usize {
            self.dims
        }
        async fn embed(&self, _text: &str) -> Result<EmbeddingVector> {
            match self.fail {
                Some(err) => Err(err()),
                None => Ok(EmbeddingVector::new(vec![1.0; self.dims])),
            }
        }
    }

    struct ListIndex {
        hits: Vec<ScoredPassage>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl VectorIndex for ListIndex {
        fn name(&self) -> &str {
            "list"
        }
        fn dimensions(&self) -> usize {
            2
        }
        fn metric(&self) -> Metric {
            Metric::Cosine
        }
        async fn search(&self, _vector: &EmbeddingVector, _k: usize) -> Result<Vec<ScoredPassage>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.hits.clone())
        }
        async fn count(&self) -> Result<usize> {
            Ok(self.hits.len())
        }
    }

    fn retriever(embedder: FixedEmbedder, hits: Vec<ScoredPassage>) -> (Retriever, Arc<ListIndex>) {
        let index = Arc::new(ListIndex {
            hits,
            calls: AtomicUsize::new(0),
        });
        (Retriever::new(Arc::new(embedder), index.clone()), index)
    }

    fn k(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[tokio::test]
    async fn test_resorts_and_truncates() {
        let (retriever, _) = retriever(
            FixedEmbedder { dims: 2, fail: None },
            vec![
                ScoredPassage::new("c", 0.3),
                ScoredPassage::new("a", 0.9),
                ScoredPassage::new("d", 0.1),
                ScoredPassage::new("b", 0.5),
            ],
        );
        let query = Query::parse("q").unwrap();
        let result = retriever.retrieve(&query, k(3)).await.unwrap();
        let texts: Vec<_> = result.passages.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
        assert!(!result.is_degraded());
    }

    #[tokio::test]
    async fn test_embedding_failure_degrades() {
        let (retriever, index) = retriever(
            FixedEmbedder {
                dims: 2,
                fail: Some(|| DocentError::EmbeddingUnavailable("quota".into())),
            },
            vec![ScoredPassage::new("a", 0.9)],
        );
        let result = retriever
            .retrieve(&Query::parse("q").unwrap(), DEFAULT_K)
            .await
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(result.failure.unwrap().stage, RetrievalStage::Embedding);
        assert_eq!(index.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_fatal() {
        let (retriever, _) = retriever(FixedEmbedder { dims: 3, fail: None }, vec![]);
        let err = retriever
            .retrieve(&Query::parse("q").unwrap(), DEFAULT_K)
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_rank_keeps_ties_stable_and_drops_nan() {
        let ranked = rank(
            vec![
                ScoredPassage::new("first", 0.5),
                ScoredPassage::new("nan", f32::NAN),
                ScoredPassage::new("second", 0.5),
            ],
            4,
        );
        let texts: Vec<_> = ranked.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
    }
}
