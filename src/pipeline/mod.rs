//! Answer pipeline: cache lookup → retrieve → rerank → gate → solve →
//! judge → cache write-through.
//!
//! Per-request state machine with a global deadline, a kill-switch check at
//! admission, and single-flight coalescing of identical cold-cache
//! questions. Every transition updates metrics. Error paths never write to
//! the cache.

pub mod gate;
pub mod judge;
pub mod solver;

use std::sync::Arc;
use std::time::Instant;

use crate::admin::KillSwitch;
use crate::cache::single_flight::{Role, SingleFlight};
use crate::cache::{question_key, CacheHit, FactsStore};
use crate::config::QaConfig;
use crate::deadline::Deadline;
use crate::embeddings::Embedder;
use crate::error::{QaError, Result};
use crate::index::metadata::MetadataStore;
use crate::index::VectorIndex;
use crate::llm::LanguageModel;
use crate::metrics::{Metrics, Stage, TimeoutStage};
use crate::reranking::{validate_scores, Reranker};
use crate::types::{Passage, QueryRequest, QueryResponse};

use solver::SolverPool;

/// Request options resolved against configured defaults.
struct Effective {
    top_k: usize,
    use_multi_agent: bool,
    enable_verification: bool,
    enable_fuzzy_cache: bool,
    confidence_threshold: f32,
    fuzzy_threshold: f32,
}

pub struct Pipeline {
    config: QaConfig,
    index: Arc<VectorIndex>,
    store: Arc<MetadataStore>,
    cache: Arc<FactsStore>,
    embedder: Arc<dyn Embedder>,
    reranker: Option<Arc<dyn Reranker>>,
    pool: SolverPool,
    metrics: Arc<Metrics>,
    kill: Arc<KillSwitch>,
    single_flight: SingleFlight,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: QaConfig,
        index: Arc<VectorIndex>,
        store: Arc<MetadataStore>,
        cache: Arc<FactsStore>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LanguageModel>,
        reranker: Option<Arc<dyn Reranker>>,
        metrics: Arc<Metrics>,
        kill: Arc<KillSwitch>,
    ) -> Self {
        let pool = SolverPool::new(llm, config.solver.clone());
        Self {
            config,
            index,
            store,
            cache,
            embedder,
            reranker,
            pool,
            metrics,
            kill,
            single_flight: SingleFlight::new(),
        }
    }

    fn resolve(&self, request: &QueryRequest) -> Effective {
        let f = &self.config.features;
        Effective {
            top_k: request.top_k.unwrap_or(self.config.retrieval.top_k),
            use_multi_agent: request.use_multi_agent.unwrap_or(f.use_multi_agent),
            enable_verification: request.enable_verification.unwrap_or(f.enable_verification),
            enable_fuzzy_cache: request.enable_fuzzy_cache.unwrap_or(f.enable_fuzzy_cache),
            confidence_threshold: request
                .confidence_threshold
                .unwrap_or(self.config.cache.min_confidence),
            fuzzy_threshold: request
                .fuzzy_threshold
                .unwrap_or(self.config.cache.fuzzy_threshold),
        }
    }

    /// Answer one request. A refusal is a successful response, not an
    /// error; errors carry a kind the boundary maps to an HTTP status.
    pub fn answer(&self, request: &QueryRequest) -> Result<QueryResponse> {
        if self.kill.is_active() {
            return Err(QaError::ServiceUnavailable);
        }
        let question = request.query.trim();
        if question.is_empty() {
            return Err(QaError::InvalidInput("query must be non-empty".into()));
        }

        let started = Instant::now();
        let request_id = uuid::Uuid::new_v4();
        let deadline = Deadline::within_ms(self.config.timeouts.request_ms);
        let params = self.resolve(request);
        self.metrics.query();
        tracing::debug!(%request_id, question, "query admitted");

        // Exact cache tier needs no embedding; check before coalescing.
        if let Some(hit) = self.cache.lookup_exact(question) {
            self.metrics.cache_hit(hit.match_type);
            return Ok(self.cached_response(hit, started));
        }

        match self.single_flight.begin(question_key(question)) {
            Role::Follower(flight) => {
                tracing::debug!(%request_id, "coalescing onto identical in-flight question");
                if let Some(mut response) = flight.wait(deadline) {
                    response.coalesced = true;
                    response.from_cache = false;
                    response.latency_ms = started.elapsed().as_millis() as u64;
                    self.metrics.observe_latency(Stage::Total, response.latency_ms);
                    return Ok(response);
                }
                // Leader failed or we timed out waiting; compute alone.
                self.answer_cold(question, &params, deadline, started, request_id)
            }
            Role::Leader(token) => {
                let result = self.answer_cold(question, &params, deadline, started, request_id);
                self.single_flight
                    .complete(token, result.as_ref().ok().cloned());
                result
            }
        }
    }

    fn cached_response(&self, hit: CacheHit, started: Instant) -> QueryResponse {
        let latency_ms = started.elapsed().as_millis() as u64;
        self.metrics.observe_latency(Stage::Total, latency_ms);
        self.metrics.set_cache_size(self.cache.len());
        QueryResponse {
            answer: hit.fact.answer,
            citations: hit.fact.citations,
            confidence: hit.fact.confidence,
            latency_ms,
            from_cache: true,
            match_type: Some(hit.match_type),
            similarity: Some(hit.similarity),
            verification: None,
            coalesced: false,
        }
    }

    /// The cache-miss path: embed, retrieve, rerank, gate, solve, judge,
    /// write through.
    fn answer_cold(
        &self,
        question: &str,
        params: &Effective,
        deadline: Deadline,
        started: Instant,
        request_id: uuid::Uuid,
    ) -> Result<QueryResponse> {
        let timeouts = &self.config.timeouts;

        // EMBED_QUERY
        let embedding = self
            .embedder
            .embed(question, deadline.stage(timeouts.embed_ms))
            .map_err(|e| {
                if matches!(e, QaError::UpstreamTimeout { .. } | QaError::Canceled { .. }) {
                    self.metrics.timeout(TimeoutStage::Embed);
                }
                e
            })?;

        // Fuzzy cache tier, now that the embedding exists.
        if params.enable_fuzzy_cache {
            if let Some(hit) = self.cache.lookup_fuzzy(&embedding, params.fuzzy_threshold) {
                self.metrics.cache_hit(hit.match_type);
                tracing::debug!(%request_id, similarity = hit.similarity, "fuzzy cache hit");
                return Ok(self.cached_response(hit, started));
            }
        }
        self.check_request_deadline(deadline)?;

        // RETRIEVE
        let retrieve_started = Instant::now();
        let fetch = params.top_k * self.config.retrieval.candidate_multiplier;
        let hits = self
            .index
            .search(
                &self.store,
                &embedding,
                fetch,
                0.0,
                Some(deadline.stage(timeouts.search_ms)),
            )
            .map_err(|e| {
                if matches!(e, QaError::Canceled { .. }) {
                    self.metrics.timeout(TimeoutStage::Search);
                }
                e
            })?;
        let mut candidates: Vec<Passage> = hits
            .iter()
            .filter_map(|hit| {
                self.store.get(&hit.doc_id).map(|doc| Passage {
                    doc_id: hit.doc_id.clone(),
                    text: doc.text,
                    score: hit.similarity,
                })
            })
            .collect();
        self.metrics.observe_latency(
            Stage::Retrieve,
            retrieve_started.elapsed().as_millis() as u64,
        );

        // RERANK (identity when unconfigured)
        let rerank_started = Instant::now();
        if let Some(reranker) = self
            .reranker
            .as_ref()
            .filter(|_| self.config.features.enable_reranking && !candidates.is_empty())
        {
            let texts: Vec<&str> = candidates.iter().map(|p| p.text.as_str()).collect();
            let scores = reranker.rerank(question, &texts, deadline)?;
            validate_scores(&scores, candidates.len())?;
            for (passage, score) in candidates.iter_mut().zip(scores) {
                passage.score = score;
            }
            candidates.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.doc_id.cmp(&b.doc_id))
            });
        }
        candidates.truncate(params.top_k);
        self.metrics
            .observe_latency(Stage::Rerank, rerank_started.elapsed().as_millis() as u64);
        self.check_request_deadline(deadline)?;

        // GATE
        let scores: Vec<f32> = candidates.iter().map(|p| p.score).collect();
        let decision = gate::evaluate(&scores, self.config.retrieval.evidence_threshold);
        if !decision.pass {
            self.metrics.refusal();
            tracing::info!(
                %request_id,
                evidence = decision.evidence,
                candidates = candidates.len(),
                "evidence gate refused"
            );
            return Ok(self.finish(
                QueryResponse {
                    answer: gate::REFUSAL_ANSWER.to_string(),
                    citations: Vec::new(),
                    confidence: decision.evidence,
                    latency_ms: 0,
                    from_cache: false,
                    match_type: None,
                    similarity: None,
                    verification: None,
                    coalesced: false,
                },
                started,
            ));
        }

        // SOLVE
        let solve_started = Instant::now();
        let n_solvers = if params.use_multi_agent {
            self.config.solver.num_solvers
        } else {
            1
        };
        let outcome = self
            .pool
            .dispatch(
                question,
                &candidates,
                n_solvers,
                timeouts.solver_ms,
                deadline.stage(timeouts.pool_ms),
            )
            .map_err(|e| {
                if matches!(e, QaError::UpstreamTimeout { stage: "pool" }) {
                    self.metrics.timeout(TimeoutStage::Pool);
                }
                e
            })?;
        for _ in 0..outcome.call_timeouts {
            self.metrics.timeout(TimeoutStage::Solver);
        }
        for _ in 0..outcome.call_errors {
            self.metrics.solver_error();
        }
        if outcome.pool_timed_out {
            self.metrics.timeout(TimeoutStage::Pool);
        }
        self.metrics
            .observe_latency(Stage::Solve, solve_started.elapsed().as_millis() as u64);
        self.check_request_deadline(deadline)?;

        // JUDGE
        let verdict = judge::judge(
            &outcome.outputs,
            &candidates,
            decision.evidence,
            self.embedder.as_ref(),
            &self.config.judge,
            deadline,
        )?;
        tracing::info!(
            %request_id,
            winner = verdict.winner_id,
            confidence = verdict.confidence,
            citations = verdict.citations.len(),
            verified = verdict.verification.verified,
            "answer selected"
        );

        // CACHE_WRITE (skipped on every error path above)
        if verdict.confidence >= params.confidence_threshold {
            self.cache.insert(
                question,
                embedding,
                verdict.answer.clone(),
                verdict.citations.clone(),
                verdict.confidence,
            );
        }

        Ok(self.finish(
            QueryResponse {
                answer: verdict.answer,
                citations: verdict.citations,
                confidence: verdict.confidence,
                latency_ms: 0,
                from_cache: false,
                match_type: None,
                similarity: None,
                verification: params.enable_verification.then_some(verdict.verification),
                coalesced: false,
            },
            started,
        ))
    }

    fn check_request_deadline(&self, deadline: Deadline) -> Result<()> {
        deadline.check("request").map_err(|e| {
            self.metrics.timeout(TimeoutStage::Request);
            e
        })
    }

    /// Stamp latency, fold gauges, and record the confidence EWMA.
    fn finish(&self, mut response: QueryResponse, started: Instant) -> QueryResponse {
        response.latency_ms = started.elapsed().as_millis() as u64;
        self.metrics.observe_latency(Stage::Total, response.latency_ms);
        self.metrics.record_confidence(response.confidence);
        self.metrics.set_documents(self.index.len());
        self.metrics.set_cache_size(self.cache.len());
        response
    }
}
