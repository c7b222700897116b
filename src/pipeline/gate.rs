/// Canonical refusal answer returned when evidence is insufficient.
pub const REFUSAL_ANSWER: &str = "Insufficient evidence to answer";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateDecision {
    pub pass: bool,
    /// Aggregate evidence score; also the refusal response's confidence.
    pub evidence: f32,
}

/// Evidence gate over the top-K reranked scores (sorted descending).
///
/// `E = max(s1, mean(s1..s_min(3,K)))`; the gate refuses when `E` falls
/// below `threshold` or no candidates survived retrieval.
pub fn evaluate(scores: &[f32], threshold: f32) -> GateDecision {
    if scores.is_empty() {
        return GateDecision {
            pass: false,
            evidence: 0.0,
        };
    }
    let top = scores[0];
    let head = &scores[..scores.len().min(3)];
    let mean = head.iter().sum::<f32>() / head.len() as f32;
    let evidence = top.max(mean);
    GateDecision {
        pass: evidence >= threshold,
        evidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_candidates_refuse_with_zero_evidence() {
        let d = evaluate(&[], 0.7);
        assert!(!d.pass);
        assert_eq!(d.evidence, 0.0);
    }

    #[test]
    fn test_strong_top_score_passes() {
        let d = evaluate(&[0.9, 0.2, 0.1], 0.7);
        assert!(d.pass);
        assert!((d.evidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_weak_evidence_refuses() {
        let d = evaluate(&[0.5, 0.4, 0.3], 0.7);
        assert!(!d.pass);
        assert!((d.evidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_single_candidate_uses_its_score() {
        let d = evaluate(&[0.75], 0.7);
        assert!(d.pass);
        assert!((d.evidence - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        assert!(evaluate(&[0.7], 0.7).pass);
    }
}
