//! Solver pool: bounded parallel LLM calls with per-call and per-pool
//! deadlines.
//!
//! Each solver gets the question, the top-K passages prefixed with their doc
//! ids, and a temperature from the monotonic schedule. A call that misses
//! its deadline yields an empty output with confidence 0; if the pool
//! deadline elapses, whatever completed so far is used.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use crate::config::SolverConfig;
use crate::deadline::Deadline;
use crate::error::{QaError, Result};
use crate::llm::{parse_solver_reply, GenerationOptions, LanguageModel};
use crate::pipeline::judge::extract_citation_ids;
use crate::types::{Passage, SolverOutput};

pub struct SolverPool {
    llm: Arc<dyn LanguageModel>,
    config: SolverConfig,
}

/// What the pool observed while collecting results. Timeout and error
/// counts feed the metrics registry.
#[derive(Debug)]
pub struct PoolOutcome {
    pub outputs: Vec<SolverOutput>,
    pub call_timeouts: usize,
    pub call_errors: usize,
    pub pool_timed_out: bool,
}

/// Temperature for solver `i`: the schedule entry when present, otherwise
/// the last entry stepped up by 0.1 per extra solver, capped at 1.0.
pub fn temperature_for(schedule: &[f32], i: usize) -> f32 {
    match schedule.get(i) {
        Some(&t) => t,
        None => {
            let last = schedule.last().copied().unwrap_or(0.0);
            (last + 0.1 * (i + 1 - schedule.len()) as f32).min(1.0)
        }
    }
}

/// Prompt shared by all solvers. Passages carry their doc id prefix so the
/// model can cite them inline.
pub fn build_prompt(question: &str, passages: &[Passage]) -> String {
    let mut prompt = String::with_capacity(512);
    prompt.push_str(
        "Answer the question using ONLY the context passages below. \
         Cite every supporting passage inline as [doc_id]. \
         If the context does not contain the answer, say so. \
         End your reply with a line: CONFIDENCE: <a value between 0 and 1>\n\nContext:\n",
    );
    for passage in passages {
        prompt.push('[');
        prompt.push_str(&passage.doc_id);
        prompt.push_str("] ");
        prompt.push_str(&passage.text);
        prompt.push('\n');
    }
    prompt.push_str("\nQuestion: ");
    prompt.push_str(question);
    prompt.push_str("\n\nAnswer:");
    prompt
}

impl SolverPool {
    pub fn new(llm: Arc<dyn LanguageModel>, config: SolverConfig) -> Self {
        Self { llm, config }
    }

    /// Run `n_solvers` parallel calls and collect whatever completes before
    /// the pool deadline. Errors if nothing completed.
    pub fn dispatch(
        &self,
        question: &str,
        passages: &[Passage],
        n_solvers: usize,
        solver_budget_ms: u64,
        pool_deadline: Deadline,
    ) -> Result<PoolOutcome> {
        let n = n_solvers.clamp(1, 8);
        let prompt = build_prompt(question, passages);
        let (tx, rx) = mpsc::channel::<(usize, f32, Result<String>)>();

        for solver_id in 0..n {
            let llm = self.llm.clone();
            let prompt = prompt.clone();
            let tx = tx.clone();
            let temperature = temperature_for(&self.config.temperature_schedule, solver_id);
            let opts = GenerationOptions {
                temperature,
                max_tokens: self.config.max_tokens,
                deadline: pool_deadline.stage(solver_budget_ms),
            };
            thread::spawn(move || {
                let result = llm.generate(&prompt, &opts);
                // The receiver may be gone after a pool timeout.
                let _ = tx.send((solver_id, temperature, result));
            });
        }
        drop(tx);

        let mut outputs: Vec<SolverOutput> = Vec::with_capacity(n);
        let mut call_timeouts = 0usize;
        let mut call_errors = 0usize;
        let mut pool_timed_out = false;
        let mut received = 0usize;

        while received < n {
            let budget = match pool_deadline.remaining() {
                Some(d) => d,
                None => {
                    pool_timed_out = true;
                    break;
                }
            };
            match rx.recv_timeout(budget) {
                Ok((solver_id, temperature, Ok(raw))) => {
                    received += 1;
                    let (answer, confidence) = parse_solver_reply(&raw);
                    let raw_citations = extract_citation_ids(&answer);
                    tracing::debug!(solver_id, temperature, confidence, "solver completed");
                    outputs.push(SolverOutput {
                        solver_id,
                        answer,
                        raw_citations,
                        confidence,
                        temperature,
                    });
                }
                Ok((solver_id, temperature, Err(e))) => {
                    received += 1;
                    match e {
                        QaError::UpstreamTimeout { .. } | QaError::Canceled { .. } => {
                            call_timeouts += 1;
                            tracing::warn!(solver_id, "solver call timed out");
                        }
                        e => {
                            call_errors += 1;
                            tracing::warn!(solver_id, error = %e, "solver call failed");
                        }
                    }
                    outputs.push(SolverOutput::empty(solver_id, temperature));
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    pool_timed_out = true;
                    break;
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        if pool_timed_out {
            // Straggler calls count as timed out.
            call_timeouts += n - received;
            tracing::warn!(
                received,
                n_solvers = n,
                "pool deadline elapsed; using partial results"
            );
        }

        let completed = outputs.iter().filter(|o| !o.is_empty()).count();
        if completed == 0 {
            if call_errors > 0 && call_timeouts == 0 {
                return Err(QaError::Upstream {
                    status: None,
                    message: "all solver calls failed".into(),
                });
            }
            return Err(QaError::UpstreamTimeout { stage: "pool" });
        }

        outputs.sort_by_key(|o| o.solver_id);
        Ok(PoolOutcome {
            outputs,
            call_timeouts,
            call_errors,
            pool_timed_out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{StubBehavior, StubLanguageModel};
    use std::time::Duration;

    fn config(n: usize) -> SolverConfig {
        SolverConfig {
            num_solvers: n,
            temperature_schedule: vec![0.0, 0.3, 0.7],
            max_tokens: 256,
        }
    }

    fn passages() -> Vec<Passage> {
        vec![Passage {
            doc_id: "d1".into(),
            text: "The sky is blue due to Rayleigh scattering.".into(),
            score: 0.9,
        }]
    }

    #[test]
    fn test_temperature_schedule_is_monotonic_and_extends() {
        let schedule = [0.0, 0.3, 0.7];
        let temps: Vec<f32> = (0..8).map(|i| temperature_for(&schedule, i)).collect();
        for w in temps.windows(2) {
            assert!(w[1] >= w[0]);
        }
        assert_eq!(temps[0], 0.0);
        assert_eq!(temps[2], 0.7);
        assert!(temps[7] <= 1.0);
    }

    #[test]
    fn test_prompt_prefixes_doc_ids() {
        let prompt = build_prompt("why is the sky blue?", &passages());
        assert!(prompt.contains("[d1] The sky is blue"));
        assert!(prompt.contains("Question: why is the sky blue?"));
        assert!(prompt.contains("CONFIDENCE:"));
    }

    #[test]
    fn test_all_solvers_complete() {
        let llm = Arc::new(StubLanguageModel::answering(0.9));
        let pool = SolverPool::new(llm, config(3));
        let outcome = pool
            .dispatch(
                "why is the sky blue?",
                &passages(),
                3,
                1_000,
                Deadline::within_ms(5_000),
            )
            .unwrap();
        assert_eq!(outcome.outputs.len(), 3);
        assert_eq!(outcome.call_timeouts, 0);
        assert!(outcome.outputs.iter().all(|o| !o.is_empty()));
        assert!(outcome.outputs[0].raw_citations.contains(&"d1".to_string()));
    }

    #[test]
    fn test_partial_results_survive_one_slow_solver() {
        let llm = Arc::new(StubLanguageModel::new(vec![
            StubBehavior::Sleep(Duration::from_millis(400)),
            StubBehavior::Answer { confidence: 0.8 },
            StubBehavior::Answer { confidence: 0.8 },
        ]));
        let pool = SolverPool::new(llm, config(3));
        let outcome = pool
            .dispatch(
                "q",
                &passages(),
                3,
                50,
                Deadline::within_ms(3_000),
            )
            .unwrap();
        let completed = outcome.outputs.iter().filter(|o| !o.is_empty()).count();
        assert_eq!(completed, 2);
        assert_eq!(outcome.call_timeouts, 1);
    }

    #[test]
    fn test_no_completions_is_pool_timeout() {
        let llm = Arc::new(StubLanguageModel::new(vec![StubBehavior::Sleep(
            Duration::from_millis(500),
        )]));
        let pool = SolverPool::new(llm, config(2));
        let err = pool
            .dispatch("q", &passages(), 2, 20, Deadline::within_ms(100))
            .unwrap_err();
        assert_eq!(err.kind(), "UPSTREAM_TIMEOUT");
    }

    #[test]
    fn test_all_failures_surface_upstream_error() {
        let llm = Arc::new(StubLanguageModel::new(vec![StubBehavior::Fail(
            "boom".into(),
        )]));
        let pool = SolverPool::new(llm, config(2));
        let err = pool
            .dispatch("q", &passages(), 2, 1_000, Deadline::within_ms(5_000))
            .unwrap_err();
        assert_eq!(err.kind(), "UPSTREAM_ERROR");
    }
}
