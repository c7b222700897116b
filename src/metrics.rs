//! Request-path metrics: counters, bucketed latency histograms, and gauges.
//!
//! Everything here is lock-free atomics except the confidence EWMA. The
//! crate only maintains the numbers; scraping/export lives at the boundary.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::MatchType;

/// Pipeline stages with latency histograms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Retrieve,
    Rerank,
    Solve,
    Total,
}

/// Stages whose deadline expiries are counted separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStage {
    Embed,
    Search,
    Solver,
    Pool,
    Request,
}

const BUCKET_BOUNDS_MS: [u64; 13] = [1, 2, 5, 10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000];

#[derive(Default)]
struct Histogram {
    // One bucket per bound, plus overflow.
    buckets: [AtomicU64; BUCKET_BOUNDS_MS.len() + 1],
    sum_ms: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    fn observe(&self, ms: u64) {
        let idx = BUCKET_BOUNDS_MS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(BUCKET_BOUNDS_MS.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            bounds_ms: BUCKET_BOUNDS_MS.to_vec(),
            buckets: self
                .buckets
                .iter()
                .map(|b| b.load(Ordering::Relaxed))
                .collect(),
            sum_ms: self.sum_ms.load(Ordering::Relaxed),
            count: self.count.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    pub bounds_ms: Vec<u64>,
    /// One count per bound, plus a final overflow bucket.
    pub buckets: Vec<u64>,
    pub sum_ms: u64,
    pub count: u64,
}

const EWMA_ALPHA: f64 = 0.1;

#[derive(Default)]
pub struct Metrics {
    queries_total: AtomicU64,
    cache_hits_exact: AtomicU64,
    cache_hits_fuzzy: AtomicU64,
    refusals_total: AtomicU64,
    solver_errors_total: AtomicU64,

    timeouts_embed: AtomicU64,
    timeouts_search: AtomicU64,
    timeouts_solver: AtomicU64,
    timeouts_pool: AtomicU64,
    timeouts_request: AtomicU64,

    latency_retrieve: Histogram,
    latency_rerank: Histogram,
    latency_solve: Histogram,
    latency_total: Histogram,

    documents: AtomicU64,
    cache_size: AtomicU64,
    avg_confidence: Mutex<Option<f64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(&self) {
        self.queries_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_hit(&self, match_type: MatchType) {
        let counter = match match_type {
            MatchType::Exact => &self.cache_hits_exact,
            MatchType::Fuzzy => &self.cache_hits_fuzzy,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn refusal(&self) {
        self.refusals_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn solver_error(&self) {
        self.solver_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    fn timeout_counter(&self, stage: TimeoutStage) -> &AtomicU64 {
        match stage {
            TimeoutStage::Embed => &self.timeouts_embed,
            TimeoutStage::Search => &self.timeouts_search,
            TimeoutStage::Solver => &self.timeouts_solver,
            TimeoutStage::Pool => &self.timeouts_pool,
            TimeoutStage::Request => &self.timeouts_request,
        }
    }

    pub fn timeout(&self, stage: TimeoutStage) {
        self.timeout_counter(stage).fetch_add(1, Ordering::Relaxed);
    }

    pub fn timeouts(&self, stage: TimeoutStage) -> u64 {
        self.timeout_counter(stage).load(Ordering::Relaxed)
    }

    pub fn observe_latency(&self, stage: Stage, ms: u64) {
        let histogram = match stage {
            Stage::Retrieve => &self.latency_retrieve,
            Stage::Rerank => &self.latency_rerank,
            Stage::Solve => &self.latency_solve,
            Stage::Total => &self.latency_total,
        };
        histogram.observe(ms);
    }

    pub fn set_documents(&self, n: usize) {
        self.documents.store(n as u64, Ordering::Relaxed);
    }

    pub fn set_cache_size(&self, n: usize) {
        self.cache_size.store(n as u64, Ordering::Relaxed);
    }

    /// Fold one final confidence into the EWMA gauge.
    pub fn record_confidence(&self, confidence: f32) {
        let mut ewma = self.avg_confidence.lock();
        *ewma = Some(match *ewma {
            None => confidence as f64,
            Some(old) => EWMA_ALPHA * confidence as f64 + (1.0 - EWMA_ALPHA) * old,
        });
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries_total: self.queries_total.load(Ordering::Relaxed),
            cache_hits_exact: self.cache_hits_exact.load(Ordering::Relaxed),
            cache_hits_fuzzy: self.cache_hits_fuzzy.load(Ordering::Relaxed),
            refusals_total: self.refusals_total.load(Ordering::Relaxed),
            solver_errors_total: self.solver_errors_total.load(Ordering::Relaxed),
            timeouts_embed: self.timeouts_embed.load(Ordering::Relaxed),
            timeouts_search: self.timeouts_search.load(Ordering::Relaxed),
            timeouts_solver: self.timeouts_solver.load(Ordering::Relaxed),
            timeouts_pool: self.timeouts_pool.load(Ordering::Relaxed),
            timeouts_request: self.timeouts_request.load(Ordering::Relaxed),
            latency_retrieve: self.latency_retrieve.snapshot(),
            latency_rerank: self.latency_rerank.snapshot(),
            latency_solve: self.latency_solve.snapshot(),
            latency_total: self.latency_total.snapshot(),
            documents: self.documents.load(Ordering::Relaxed),
            cache_size: self.cache_size.load(Ordering::Relaxed),
            avg_confidence: self.avg_confidence.lock().unwrap_or(0.0) as f32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub queries_total: u64,
    pub cache_hits_exact: u64,
    pub cache_hits_fuzzy: u64,
    pub refusals_total: u64,
    pub solver_errors_total: u64,
    pub timeouts_embed: u64,
    pub timeouts_search: u64,
    pub timeouts_solver: u64,
    pub timeouts_pool: u64,
    pub timeouts_request: u64,
    pub latency_retrieve: HistogramSnapshot,
    pub latency_rerank: HistogramSnapshot,
    pub latency_solve: HistogramSnapshot,
    pub latency_total: HistogramSnapshot,
    pub documents: u64,
    pub cache_size: u64,
    pub avg_confidence: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let m = Metrics::new();
        m.query();
        m.query();
        m.cache_hit(MatchType::Exact);
        m.cache_hit(MatchType::Fuzzy);
        m.refusal();
        m.timeout(TimeoutStage::Solver);

        let snap = m.snapshot();
        assert_eq!(snap.queries_total, 2);
        assert_eq!(snap.cache_hits_exact, 1);
        assert_eq!(snap.cache_hits_fuzzy, 1);
        assert_eq!(snap.refusals_total, 1);
        assert_eq!(snap.timeouts_solver, 1);
        assert_eq!(snap.timeouts_embed, 0);
    }

    #[test]
    fn test_histogram_buckets() {
        let m = Metrics::new();
        m.observe_latency(Stage::Retrieve, 3);
        m.observe_latency(Stage::Retrieve, 30);
        m.observe_latency(Stage::Retrieve, 999_999);

        let h = m.snapshot().latency_retrieve;
        assert_eq!(h.count, 3);
        assert_eq!(h.sum_ms, 3 + 30 + 999_999);
        // 3 ms lands in the `<= 5` bucket, 30 ms in `<= 50`, the outlier in
        // the overflow bucket.
        assert_eq!(h.buckets[2], 1);
        assert_eq!(h.buckets[5], 1);
        assert_eq!(h.buckets[h.buckets.len() - 1], 1);
    }

    #[test]
    fn test_confidence_ewma() {
        let m = Metrics::new();
        m.record_confidence(0.8);
        assert!((m.snapshot().avg_confidence - 0.8).abs() < 1e-6);
        m.record_confidence(0.4);
        // 0.1·0.4 + 0.9·0.8
        assert!((m.snapshot().avg_confidence - 0.76).abs() < 1e-4);
    }
}
