//! Judge: deterministic selection over solver outputs and citation
//! verification of the winner.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::JudgeConfig;
use crate::deadline::Deadline;
use crate::embeddings::Embedder;
use crate::error::{QaError, Result};
use crate::index::space::cosine;
use crate::types::{Citation, Passage, SolverOutput, Verification};

static CITATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([A-Za-z0-9][A-Za-z0-9_.:\-]*)\]").expect("citation regex is valid"));

/// Doc ids cited inline as `[doc_id]`, deduplicated in order of first
/// occurrence.
pub fn extract_citation_ids(answer: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut ids = Vec::new();
    for cap in CITATION_RE.captures_iter(answer) {
        if let Some(m) = cap.get(1) {
            let id = m.as_str().to_string();
            if seen.insert(id.clone()) {
                ids.push(id);
            }
        }
    }
    ids
}

#[derive(Debug, Clone)]
pub struct Verdict {
    pub winner_id: usize,
    pub answer: String,
    /// Citations surviving verification against the retrieved set.
    pub citations: Vec<Citation>,
    /// Final confidence:
    /// `clamp(0,1, cw·confidence + gw·grounding + ew·evidence)`.
    pub confidence: f32,
    pub verification: Verification,
    pub grounding: f32,
    pub selection_score: f32,
}

/// Fraction of the answer's cited doc ids that were actually retrieved.
fn grounding_of(output: &SolverOutput, retrieved: &HashMap<&str, f32>) -> f32 {
    let hits = output
        .raw_citations
        .iter()
        .filter(|id| retrieved.contains_key(id.as_str()))
        .count();
    hits as f32 / output.raw_citations.len().max(1) as f32
}

/// Pick the best solver output and verify its citations.
///
/// Selection is deterministic and tie-stable: scores are pure arithmetic
/// over the outputs, and equal scores resolve to the lowest `solver_id`.
pub fn judge(
    outputs: &[SolverOutput],
    passages: &[Passage],
    evidence: f32,
    embedder: &dyn Embedder,
    config: &JudgeConfig,
    deadline: Deadline,
) -> Result<Verdict> {
    let candidates: Vec<&SolverOutput> = outputs.iter().filter(|o| !o.is_empty()).collect();
    if candidates.is_empty() {
        return Err(QaError::Internal(
            "judge invoked with no completed solver outputs".into(),
        ));
    }
    let retrieved: HashMap<&str, f32> = passages
        .iter()
        .map(|p| (p.doc_id.as_str(), p.score))
        .collect();

    // Answer embeddings for pairwise agreement. A single solver has no
    // peers, so its agreement term is 0.
    let embeddings: Vec<Option<Vec<f32>>> = outputs
        .iter()
        .map(|o| {
            if o.is_empty() {
                Ok(None)
            } else {
                embedder.embed(&o.answer, deadline).map(Some)
            }
        })
        .collect::<Result<_>>()?;

    let agreement_of = |idx: usize| -> f32 {
        if outputs.len() < 2 {
            return 0.0;
        }
        let Some(own) = &embeddings[idx] else {
            return 0.0;
        };
        let agreeing = outputs
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != idx)
            .filter(|(j, _)| match &embeddings[*j] {
                Some(other) => cosine(own, other) >= config.agreement_threshold,
                None => false,
            })
            .count();
        agreeing as f32 / (outputs.len() - 1) as f32
    };

    let mut best: Option<(f32, usize, usize)> = None; // (score, solver_id, index)
    for (idx, output) in outputs.iter().enumerate() {
        if output.is_empty() {
            continue;
        }
        let grounding = grounding_of(output, &retrieved);
        let agreement = agreement_of(idx);
        let score = config.confidence_weight * output.confidence
            + config.grounding_weight * grounding
            + config.agreement_weight * agreement;
        tracing::debug!(
            solver_id = output.solver_id,
            confidence = output.confidence,
            grounding,
            agreement,
            score,
            "judged solver output"
        );
        let better = match best {
            None => true,
            Some((bs, bid, _)) => score > bs || (score == bs && output.solver_id < bid),
        };
        if better {
            best = Some((score, output.solver_id, idx));
        }
    }
    let (selection_score, winner_id, winner_idx) =
        best.ok_or_else(|| QaError::Internal("no judgeable solver output".into()))?;
    let winner = &outputs[winner_idx];
    let grounding = grounding_of(winner, &retrieved);

    // Verification: citations must point into the retrieved top-K; anything
    // else is dropped and flagged.
    let mut citations = Vec::new();
    let mut dropped = 0usize;
    for id in &winner.raw_citations {
        match retrieved.get(id.as_str()) {
            Some(&score) => citations.push(Citation {
                doc_id: id.clone(),
                chunk_id: 0,
                score,
            }),
            None => dropped += 1,
        }
    }
    let verification = Verification {
        verified: dropped == 0,
        details: (dropped > 0).then(|| format!("dropped {} unsupported citation(s)", dropped)),
    };

    let confidence = (config.confidence_weight * winner.confidence
        + config.grounding_weight * grounding
        + config.evidence_weight * evidence)
        .clamp(0.0, 1.0);

    Ok(Verdict {
        winner_id,
        answer: winner.answer.clone(),
        citations,
        confidence,
        verification,
        grounding,
        selection_score,
    })
}
