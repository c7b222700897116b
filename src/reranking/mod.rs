use std::sync::Arc;

use crate::deadline::Deadline;
use crate::embeddings::Embedder;
use crate::error::{QaError, Result};
use crate::index::space::cosine;

/// Rescores candidates against a query. Implementations must be
/// deterministic and return one score in `[0, 1]` per candidate, in order.
///
/// When no reranker is configured the pipeline keeps the index's normalized
/// similarities (identity reranking).
pub trait Reranker: Send + Sync {
    fn rerank(&self, query: &str, candidates: &[&str], deadline: Deadline) -> Result<Vec<f32>>;
}

/// Cosine reranker over the configured embedder. A cheap cross-check of the
/// ANN scores; scores map through `(cos + 1) / 2`.
pub struct EmbeddingReranker {
    embedder: Arc<dyn Embedder>,
}

impl EmbeddingReranker {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

impl Reranker for EmbeddingReranker {
    fn rerank(&self, query: &str, candidates: &[&str], deadline: Deadline) -> Result<Vec<f32>> {
        let q = self.embedder.embed(query, deadline)?;
        let mut scores = Vec::with_capacity(candidates.len());
        for text in candidates {
            deadline.check("rerank")?;
            let v = self.embedder.embed(text, deadline)?;
            scores.push(((cosine(&q, &v) + 1.0) / 2.0).clamp(0.0, 1.0));
        }
        Ok(scores)
    }
}

/// Validate a reranker's output shape before trusting it.
pub fn validate_scores(scores: &[f32], expected: usize) -> Result<()> {
    if scores.len() != expected {
        return Err(QaError::Internal(format!(
            "reranker returned {} scores for {} candidates",
            scores.len(),
            expected
        )));
    }
    if scores.iter().any(|s| !(0.0..=1.0).contains(s)) {
        return Err(QaError::Internal(
            "reranker returned a score outside [0, 1]".into(),
        ));
    }
    Ok(())
}
