use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Primitive-or-nested metadata value attached to documents by callers.
/// Arbitrary objects are deliberately not representable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Map(BTreeMap<String, MetadataValue>),
}

pub type UserMetadata = BTreeMap<String, MetadataValue>;

/// Store-managed metadata, filled in at index time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetadata {
    pub content_length: usize,
    /// Epoch seconds.
    pub indexed_at: i64,
}

/// An indexed document as held by the metadata store. The embedding lives in
/// the vector index; replacing a document by `doc_id` replaces both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: String,
    pub text: String,
    #[serde(default)]
    pub user_metadata: UserMetadata,
    pub system_metadata: SystemMetadata,
}

/// A grounded reference into the corpus. `chunk_id` is 0 for documents
/// stored whole; pre-chunked corpora index each chunk under its own doc id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub doc_id: String,
    pub chunk_id: u32,
    pub score: f32,
}

/// One ANN search result. `similarity` is normalized to `[0, 1]` regardless
/// of the index's similarity space; `rank` is 0-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub similarity: f32,
    pub rank: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Fuzzy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Query API request. Unset fields take configured defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_multi_agent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_verification: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_fuzzy_cache: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fuzzy_threshold: Option<f32>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// Query API response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub confidence: f32,
    pub latency_ms: u64,
    pub from_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_type: Option<MatchType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<Verification>,
    /// True for a follower request that was coalesced onto an identical
    /// in-flight computation.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub coalesced: bool,
}

/// Index API request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRequest {
    pub doc_id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: UserMetadata,
}

/// Index API response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexResponse {
    pub ok: bool,
    pub doc_id: String,
    pub chunks: usize,
}

/// Outcome of a single `add_document`. Duplicate ids are updates, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted,
    Updated,
}

/// One item of a batch ingest.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub doc_id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub user_metadata: UserMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchError {
    pub doc_id: String,
    pub error: String,
}

/// Per-item-atomic batch ingest report. Partial success is explicit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub errors: Vec<BatchError>,
    pub elapsed_ms: u64,
}

/// Output of one solver call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverOutput {
    pub solver_id: usize,
    pub answer: String,
    /// Doc ids the answer cited inline, in order of first occurrence.
    pub raw_citations: Vec<String>,
    /// Self-reported confidence; 0.5 when the model omitted it.
    pub confidence: f32,
    pub temperature: f32,
}

impl SolverOutput {
    /// An empty output standing in for a timed-out or failed solver.
    pub fn empty(solver_id: usize, temperature: f32) -> Self {
        Self {
            solver_id,
            answer: String::new(),
            raw_citations: Vec::new(),
            confidence: 0.0,
            temperature,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.answer.trim().is_empty()
    }
}

/// A retrieved passage handed to solvers and the judge.
#[derive(Debug, Clone)]
pub struct Passage {
    pub doc_id: String,
    pub text: String,
    /// Post-rerank normalized score in `[0, 1]`.
    pub score: f32,
}
