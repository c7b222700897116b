//! Top-level application record: owns all long-lived state and exposes the
//! ingest, query, and admin surfaces. External capabilities (embedder,
//! language model, reranker) are injected at construction; tests build a
//! fresh `App` per case with stub providers.

use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;

use crate::admin::{AdminStats, KillSwitch};
use crate::cache::{Fact, FactsStats, FactsStore};
use crate::config::QaConfig;
use crate::deadline::Deadline;
use crate::embeddings::Embedder;
use crate::error::{QaError, Result};
use crate::index::metadata::MetadataStore;
use crate::index::{IndexParams, VectorIndex};
use crate::llm::LanguageModel;
use crate::metrics::{Metrics, TimeoutStage};
use crate::pipeline::Pipeline;
use crate::reranking::Reranker;
use crate::types::{
    BatchError, BatchItem, BatchReport, IndexRequest, IndexResponse, QueryRequest, QueryResponse,
};

pub struct App {
    config: QaConfig,
    index: Arc<VectorIndex>,
    store: Arc<MetadataStore>,
    cache: Arc<FactsStore>,
    embedder: Arc<dyn Embedder>,
    metrics: Arc<Metrics>,
    kill: Arc<KillSwitch>,
    pipeline: Pipeline,
}

impl App {
    pub fn new(
        config: QaConfig,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LanguageModel>,
        reranker: Option<Arc<dyn Reranker>>,
    ) -> Result<Self> {
        config.validate().map_err(QaError::InvalidInput)?;
        if embedder.dimension() != config.index.dimension {
            return Err(QaError::InvalidInput(format!(
                "embedder dimension {} does not match index dimension {}",
                embedder.dimension(),
                config.index.dimension
            )));
        }

        let index = Arc::new(VectorIndex::new(IndexParams::from(&config.index)));
        let store = Arc::new(MetadataStore::new());
        let cache = Arc::new(FactsStore::new(config.cache.clone()));
        let metrics = Arc::new(Metrics::new());
        let kill = Arc::new(KillSwitch::new());
        let pipeline = Pipeline::new(
            config.clone(),
            index.clone(),
            store.clone(),
            cache.clone(),
            embedder.clone(),
            llm,
            reranker,
            metrics.clone(),
            kill.clone(),
        );
        tracing::info!(
            dimension = config.index.dimension,
            capacity = config.index.capacity,
            space = ?config.index.space,
            "application initialized"
        );
        Ok(Self {
            config,
            index,
            store,
            cache,
            embedder,
            metrics,
            kill,
            pipeline,
        })
    }

    fn validate_text(&self, request: &IndexRequest) -> Result<()> {
        if request.doc_id.is_empty() {
            return Err(QaError::InvalidInput("doc_id must be non-empty".into()));
        }
        if request.text.trim().is_empty() {
            return Err(QaError::InvalidInput("text must be non-empty".into()));
        }
        if request.text.len() > self.config.retrieval.max_text_len {
            return Err(QaError::InvalidInput(format!(
                "text is {} bytes; limit is {}",
                request.text.len(),
                self.config.retrieval.max_text_len
            )));
        }
        Ok(())
    }

    fn embed_for_ingest(&self, text: &str) -> Result<Vec<f32>> {
        self.embedder
            .embed(text, Deadline::within_ms(self.config.timeouts.embed_ms))
            .map_err(|e| {
                if matches!(e, QaError::UpstreamTimeout { .. } | QaError::Canceled { .. }) {
                    self.metrics.timeout(TimeoutStage::Embed);
                }
                e
            })
    }

    /// Ingest one document. Documents are stored whole (`chunks = 1`);
    /// pre-chunked corpora index each chunk under its own doc id.
    pub fn index_document(&self, request: IndexRequest) -> Result<IndexResponse> {
        self.validate_text(&request)?;
        let embedding = self.embed_for_ingest(&request.text)?;
        self.index.add_document(
            &self.store,
            &request.doc_id,
            &embedding,
            &request.text,
            request.metadata,
        )?;
        self.metrics.set_documents(self.index.len());
        Ok(IndexResponse {
            ok: true,
            doc_id: request.doc_id,
            chunks: 1,
        })
    }

    /// Batch ingest: embeddings are computed in parallel, then the whole
    /// batch is applied under one index write lock. Failures are per-item.
    pub fn index_batch(&self, requests: Vec<IndexRequest>) -> BatchReport {
        let total = requests.len();
        let started = std::time::Instant::now();

        let embedded: Vec<std::result::Result<BatchItem, BatchError>> = requests
            .into_par_iter()
            .map(|request| {
                let doc_id = request.doc_id.clone();
                match self
                    .validate_text(&request)
                    .and_then(|_| self.embed_for_ingest(&request.text))
                {
                    Ok(embedding) => Ok(BatchItem {
                        doc_id,
                        text: request.text,
                        embedding,
                        user_metadata: request.metadata,
                    }),
                    Err(e) => Err(BatchError {
                        doc_id,
                        error: e.to_string(),
                    }),
                }
            })
            .collect();
        let mut items = Vec::with_capacity(embedded.len());
        let mut errors = Vec::new();
        for result in embedded {
            match result {
                Ok(item) => items.push(item),
                Err(e) => errors.push(e),
            }
        }

        let mut report = self.index.add_batch(&self.store, items);
        report.total = total;
        report.failed += errors.len();
        errors.append(&mut report.errors);
        report.errors = errors;
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        self.metrics.set_documents(self.index.len());
        report
    }

    /// Answer a question. See the pipeline module for the state machine.
    pub fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        self.pipeline.answer(request)
    }

    /// Remove a document. The ANN node lingers until the next snapshot
    /// cycle but never appears in results.
    pub fn delete_document(&self, doc_id: &str) -> bool {
        let removed = self.index.remove(doc_id);
        self.store.delete(doc_id);
        self.metrics.set_documents(self.index.len());
        removed
    }

    /// Drop all documents and cached answers.
    pub fn clear(&self) {
        self.index.clear(&self.store);
        self.cache.clear();
        self.metrics.set_documents(0);
        self.metrics.set_cache_size(0);
    }

    pub fn save_snapshot(&self, path: &Path) -> Result<()> {
        self.index.save(&self.store, path)
    }

    pub fn load_snapshot(&self, path: &Path) -> Result<()> {
        self.index.load(&self.store, path)?;
        self.metrics.set_documents(self.index.len());
        Ok(())
    }

    pub fn set_ef_search(&self, ef: usize) {
        self.index.set_ef_search(ef);
    }

    pub fn document_count(&self) -> usize {
        self.index.len()
    }

    // Admin & control plane.

    pub fn trigger_kill(&self) {
        self.kill.trigger();
    }

    pub fn release_kill(&self) {
        self.kill.release();
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        self.metrics.set_cache_size(0);
    }

    pub fn facts(&self, limit: usize) -> Vec<Fact> {
        self.cache.list(limit)
    }

    pub fn facts_stats(&self) -> FactsStats {
        self.cache.stats()
    }

    pub fn stats(&self) -> AdminStats {
        AdminStats {
            documents: self.index.len(),
            index_generation: self.index.generation(),
            kill_switch_active: self.kill.is_active(),
            cache: self.cache.stats(),
            metrics: self.metrics.snapshot(),
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}
