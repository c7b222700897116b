pub mod external;

pub use external::HttpEmbedder;

use std::num::NonZeroUsize;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::deadline::Deadline;
use crate::error::{QaError, Result};
use crate::index::space::l2_normalize;

/// Capability contract for the embedding provider.
///
/// Implementations must be deterministic for the same input text; the fuzzy
/// cache and the judge's agreement scoring depend on it.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str, deadline: Deadline) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;

    /// Batch embedding; providers with a batch endpoint may override.
    fn embed_batch(&self, texts: &[&str], deadline: Deadline) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t, deadline)).collect()
    }
}

/// Deterministic hashed-token embedder.
///
/// Lowercased alphanumeric tokens are hashed into `dimension` buckets and
/// the result is L2-normalized. No model, no I/O; serves tests and
/// air-gapped deployments where semantic quality is not required.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str, _deadline: Deadline) -> Result<Vec<f32>> {
        if self.dimension == 0 {
            return Err(QaError::Internal("embedder dimension is zero".into()));
        }
        let mut v = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let lowered = token.to_lowercase();
            let h = xxhash_rust::xxh3::xxh3_64(lowered.as_bytes());
            v[(h % self.dimension as u64) as usize] += 1.0;
        }
        l2_normalize(&mut v);
        Ok(v)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// LRU-caching wrapper over any embedder, keyed by the exact input text.
pub struct CachingEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Mutex<lru::LruCache<String, Vec<f32>>>,
}

impl CachingEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, cache_size: usize) -> Self {
        let cap = NonZeroUsize::new(cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(lru::LruCache::new(cap)),
        }
    }
}

impl Embedder for CachingEmbedder {
    fn embed(&self, text: &str, deadline: Deadline) -> Result<Vec<f32>> {
        if let Some(hit) = self.cache.lock().get(text) {
            return Ok(hit.clone());
        }
        let v = self.inner.embed(text, deadline)?;
        self.cache.lock().put(text.to_string(), v.clone());
        Ok(v)
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}
