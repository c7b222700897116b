//! Facts store: a capacity-bounded semantic cache of answered questions.
//!
//! Two lookup tiers: an exact tier keyed by a hash of the normalized
//! question text, and a fuzzy tier that scans cached question embeddings by
//! cosine similarity. Exact lookups touch only the read lock.

pub mod single_flight;

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::index::space::cosine;
use crate::types::{Citation, MatchType};

/// A cached answer, as surfaced to callers and the admin plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub question_text: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub question_embedding: Vec<f32>,
    pub answer: String,
    pub citations: Vec<Citation>,
    pub confidence: f32,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Epoch milliseconds.
    pub last_access: i64,
    pub access_count: u64,
}

struct FactEntry {
    question_text: String,
    question_embedding: Vec<f32>,
    answer: String,
    citations: Vec<Citation>,
    confidence: f32,
    created_at: i64,
    last_access: AtomicI64,
    access_count: AtomicU64,
}

impl FactEntry {
    fn touch(&self, now: i64) {
        self.last_access.store(now, Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> Fact {
        Fact {
            question_text: self.question_text.clone(),
            question_embedding: self.question_embedding.clone(),
            answer: self.answer.clone(),
            citations: self.citations.clone(),
            confidence: self.confidence,
            created_at: self.created_at,
            last_access: self.last_access.load(Ordering::Relaxed),
            access_count: self.access_count.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheHit {
    pub fact: Fact,
    pub match_type: MatchType,
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactsStats {
    pub count: usize,
    pub avg_confidence: f32,
    pub total_accesses: u64,
}

/// Normalized form of a question: lowercased, punctuation stripped,
/// whitespace collapsed.
pub fn normalize_question(question: &str) -> String {
    let mut out = String::with_capacity(question.len());
    let mut pending_space = false;
    for c in question.chars() {
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            for lower in c.to_lowercase() {
                out.push(lower);
            }
        } else {
            pending_space = true;
        }
    }
    out
}

/// Exact-tier cache key.
pub fn question_key(question: &str) -> u64 {
    xxhash_rust::xxh3::xxh3_64(normalize_question(question).as_bytes())
}

pub struct FactsStore {
    config: CacheConfig,
    facts: RwLock<HashMap<u64, FactEntry>>,
}

impl FactsStore {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            facts: RwLock::new(HashMap::new()),
        }
    }

    pub fn fuzzy_threshold(&self) -> f32 {
        self.config.fuzzy_threshold
    }

    /// Exact-tier lookup; read lock only.
    pub fn lookup_exact(&self, question: &str) -> Option<CacheHit> {
        let facts = self.facts.read();
        let entry = facts.get(&question_key(question))?;
        entry.touch(chrono::Utc::now().timestamp_millis());
        Some(CacheHit {
            fact: entry.snapshot(),
            match_type: MatchType::Exact,
            similarity: 1.0,
        })
    }

    /// Fuzzy-tier lookup: best cosine match over cached question embeddings,
    /// returned when it clears `threshold`.
    pub fn lookup_fuzzy(&self, question_embedding: &[f32], threshold: f32) -> Option<CacheHit> {
        let facts = self.facts.read();
        let mut best: Option<(f32, u64)> = None;
        for (&key, entry) in facts.iter() {
            let sim = cosine(question_embedding, &entry.question_embedding);
            let better = match best {
                None => true,
                // Tie-break on the lower key for determinism.
                Some((bs, bk)) => sim > bs || (sim == bs && key < bk),
            };
            if better {
                best = Some((sim, key));
            }
        }
        let (similarity, key) = best?;
        if similarity < threshold {
            return None;
        }
        let entry = &facts[&key];
        entry.touch(chrono::Utc::now().timestamp_millis());
        Some(CacheHit {
            fact: entry.snapshot(),
            match_type: MatchType::Fuzzy,
            similarity,
        })
    }

    /// Insert a fact. Returns false (and caches nothing) below the
    /// configured confidence floor. Evicts the least valuable entry when
    /// over capacity.
    pub fn insert(
        &self,
        question_text: &str,
        question_embedding: Vec<f32>,
        answer: String,
        citations: Vec<Citation>,
        confidence: f32,
    ) -> bool {
        if confidence < self.config.min_confidence {
            tracing::debug!(
                confidence,
                floor = self.config.min_confidence,
                "answer below cache confidence floor, not cached"
            );
            return false;
        }
        let now = chrono::Utc::now().timestamp_millis();
        let entry = FactEntry {
            question_text: question_text.to_string(),
            question_embedding,
            answer,
            citations,
            confidence,
            created_at: now,
            last_access: AtomicI64::new(now),
            access_count: AtomicU64::new(0),
        };

        let mut facts = self.facts.write();
        facts.insert(question_key(question_text), entry);
        while facts.len() > self.config.capacity {
            if let Some(victim) = self.eviction_victim(&facts, now) {
                facts.remove(&victim);
                tracing::debug!(key = victim, "evicted cache entry");
            } else {
                break;
            }
        }
        true
    }

    /// Entry with the greatest `α·staleness_secs − β·access_count`: the
    /// stalest, least-used fact. Ties go to the oldest entry, then the
    /// lowest key.
    fn eviction_victim(&self, facts: &HashMap<u64, FactEntry>, now: i64) -> Option<u64> {
        facts
            .iter()
            .map(|(&key, entry)| {
                let staleness_secs =
                    (now - entry.last_access.load(Ordering::Relaxed)).max(0) as f32 / 1_000.0;
                let accesses = entry.access_count.load(Ordering::Relaxed) as f32;
                let score = self.config.stale_weight * staleness_secs
                    - self.config.access_weight * accesses;
                (score, entry.created_at, key)
            })
            .max_by(|a, b| {
                a.0.partial_cmp(&b.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(b.1.cmp(&a.1))
                    .then(b.2.cmp(&a.2))
            })
            .map(|(_, _, key)| key)
    }

    pub fn clear(&self) {
        let mut facts = self.facts.write();
        let dropped = facts.len();
        facts.clear();
        tracing::info!(dropped, "facts store cleared");
    }

    pub fn len(&self) -> usize {
        self.facts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> FactsStats {
        let facts = self.facts.read();
        let count = facts.len();
        let avg_confidence = if count == 0 {
            0.0
        } else {
            facts.values().map(|f| f.confidence).sum::<f32>() / count as f32
        };
        let total_accesses = facts
            .values()
            .map(|f| f.access_count.load(Ordering::Relaxed))
            .sum();
        FactsStats {
            count,
            avg_confidence,
            total_accesses,
        }
    }

    /// Most recently created facts first.
    pub fn list(&self, limit: usize) -> Vec<Fact> {
        let facts = self.facts.read();
        let mut all: Vec<Fact> = facts.values().map(|f| f.snapshot()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.question_text.cmp(&b.question_text)));
        all.truncate(limit);
        all
    }
}
