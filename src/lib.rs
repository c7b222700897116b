//! Grounded question answering over an indexed corpus: HNSW retrieval,
//! evidence gating, multi-solver reasoning with a deterministic judge, and a
//! semantic answer cache.

pub mod admin;
pub mod app;
pub mod cache;
pub mod config;
pub mod deadline;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod reranking;
pub mod types;

// Re-export the primary surface for convenience.
pub use app::App;
pub use config::QaConfig;
pub use deadline::Deadline;
pub use error::{QaError, Result};
pub use types::{
    Citation, IndexRequest, IndexResponse, MatchType, QueryRequest, QueryResponse, Verification,
};

pub use cache::{Fact, FactsStats};
pub use embeddings::{CachingEmbedder, Embedder, HashingEmbedder};
pub use index::space::SimilaritySpace;
pub use llm::{GenerationOptions, LanguageModel, StubBehavior, StubLanguageModel};
pub use reranking::{EmbeddingReranker, Reranker};
