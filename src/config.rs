use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::index::space::SimilaritySpace;

/// Aggregate configuration for the answering core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaConfig {
    pub data_dir: PathBuf,
    pub index: IndexConfig,
    pub cache: CacheConfig,
    pub retrieval: RetrievalConfig,
    pub solver: SolverConfig,
    pub judge: JudgeConfig,
    pub timeouts: TimeoutConfig,
    pub features: FeatureFlags,
}

/// HNSW index parameters. `dimension`, `capacity`, `m`, `ef_construction`,
/// `space`, and `seed` are fixed at construction; `ef_search` is tunable at
/// runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub dimension: usize,
    pub capacity: usize,
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub space: SimilaritySpace,
    pub seed: u64,
}

/// Facts-store (semantic answer cache) parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub capacity: usize,
    /// Facts below this confidence are never cached.
    pub min_confidence: f32,
    /// Default cosine threshold for fuzzy hits; overridable per request.
    pub fuzzy_threshold: f32,
    /// Eviction score weight on staleness seconds.
    pub stale_weight: f32,
    /// Eviction score weight on access count (one access buys
    /// `access_weight` seconds of freshness).
    pub access_weight: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Passages handed to solvers after reranking.
    pub top_k: usize,
    /// The ANN search fetches `top_k * candidate_multiplier` candidates for
    /// the reranker to rescore.
    pub candidate_multiplier: usize,
    /// Evidence-gate threshold; below it the pipeline refuses.
    pub evidence_threshold: f32,
    /// Maximum accepted document text length in bytes.
    pub max_text_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Parallel solver calls in multi-agent mode. Bounded at 8.
    pub num_solvers: usize,
    /// Monotonic sampling-temperature schedule; solver `i` takes entry `i`,
    /// extended by +0.1 steps (capped at 1.0) past the end.
    pub temperature_schedule: Vec<f32>,
    pub max_tokens: usize,
}

/// Judge scoring weights. Selection scores
/// `confidence_weight·c + grounding_weight·g + agreement_weight·a`; the final
/// confidence swaps agreement for the gate's evidence aggregate, weighted by
/// `evidence_weight`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    pub confidence_weight: f32,
    pub grounding_weight: f32,
    pub agreement_weight: f32,
    pub evidence_weight: f32,
    /// Cosine similarity above which two solver answers agree.
    pub agreement_threshold: f32,
}

/// Per-stage budgets in milliseconds. Every timeout increments
/// `timeouts_total` for its stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub embed_ms: u64,
    pub search_ms: u64,
    pub solver_ms: u64,
    pub pool_ms: u64,
    pub request_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub use_multi_agent: bool,
    pub enable_verification: bool,
    pub enable_fuzzy_cache: bool,
    pub enable_reranking: bool,
}

impl QaConfig {
    /// Validate config values, returning errors for clearly broken
    /// configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.index.dimension == 0 {
            return Err("index.dimension must be > 0".into());
        }
        if self.index.capacity == 0 {
            return Err("index.capacity must be > 0".into());
        }
        if self.index.m < 2 {
            return Err("index.m must be >= 2".into());
        }
        if self.index.ef_construction < self.index.m {
            return Err("index.ef_construction must be >= index.m".into());
        }
        if self.index.ef_search == 0 {
            return Err("index.ef_search must be > 0".into());
        }
        if self.retrieval.top_k == 0 {
            return Err("retrieval.top_k must be > 0".into());
        }
        if self.retrieval.candidate_multiplier == 0 {
            return Err("retrieval.candidate_multiplier must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.retrieval.evidence_threshold) {
            return Err("retrieval.evidence_threshold must be in [0.0, 1.0]".into());
        }
        if !(0.0..=1.0).contains(&self.cache.min_confidence) {
            return Err("cache.min_confidence must be in [0.0, 1.0]".into());
        }
        if !(0.0..=1.0).contains(&self.cache.fuzzy_threshold) {
            return Err("cache.fuzzy_threshold must be in [0.0, 1.0]".into());
        }
        if self.solver.num_solvers == 0 || self.solver.num_solvers > 8 {
            return Err("solver.num_solvers must be in 1..=8".into());
        }
        if self
            .solver
            .temperature_schedule
            .windows(2)
            .any(|w| w[1] < w[0])
        {
            return Err("solver.temperature_schedule must be monotonic".into());
        }
        if self.timeouts.request_ms == 0 {
            return Err("timeouts.request_ms must be > 0".into());
        }
        Ok(())
    }

    /// Load config from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for QaConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("uttar-rag");

        Self {
            data_dir,
            index: IndexConfig {
                dimension: 384,
                capacity: 100_000,
                m: 16,
                ef_construction: 200,
                ef_search: 64,
                space: SimilaritySpace::Cosine,
                seed: 0x5eed_cafe,
            },
            cache: CacheConfig {
                capacity: 10_000,
                min_confidence: 0.70,
                fuzzy_threshold: 0.85,
                stale_weight: 1.0,
                access_weight: 3600.0,
            },
            retrieval: RetrievalConfig {
                top_k: 5,
                candidate_multiplier: 4,
                evidence_threshold: 0.70,
                max_text_len: 256 * 1024,
            },
            solver: SolverConfig {
                num_solvers: 3,
                temperature_schedule: vec![0.0, 0.3, 0.7],
                max_tokens: 1024,
            },
            judge: JudgeConfig {
                confidence_weight: 0.5,
                grounding_weight: 0.3,
                agreement_weight: 0.2,
                evidence_weight: 0.2,
                agreement_threshold: 0.8,
            },
            timeouts: TimeoutConfig {
                embed_ms: 5_000,
                search_ms: 2_000,
                solver_ms: 15_000,
                pool_ms: 25_000,
                request_ms: 30_000,
            },
            features: FeatureFlags {
                use_multi_agent: false,
                enable_verification: true,
                enable_fuzzy_cache: true,
                enable_reranking: true,
            },
        }
    }
}
