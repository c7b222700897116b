pub mod external;

pub use external::HttpLanguageModel;

use std::time::Duration;

use parking_lot::Mutex;

use crate::deadline::Deadline;
use crate::error::{QaError, Result};

/// Knobs for a single generation call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: usize,
    pub deadline: Deadline,
}

/// Capability contract for the language-model provider.
pub trait LanguageModel: Send + Sync {
    fn generate(&self, prompt: &str, opts: &GenerationOptions) -> Result<String>;
}

/// Default self-reported confidence when the model omits its
/// `CONFIDENCE:` line.
pub const DEFAULT_SOLVER_CONFIDENCE: f32 = 0.5;

/// Split a raw solver reply into (answer, self-reported confidence).
///
/// Solvers are prompted to end with a `CONFIDENCE: <0..1>` line; a missing
/// or unparseable line yields [`DEFAULT_SOLVER_CONFIDENCE`].
pub fn parse_solver_reply(raw: &str) -> (String, f32) {
    let trimmed = raw.trim();
    for (idx, line) in trimmed.lines().enumerate() {
        let rest = match line.trim().strip_prefix("CONFIDENCE:") {
            Some(rest) => rest,
            None => continue,
        };
        if let Ok(value) = rest.trim().parse::<f32>() {
            let answer: String = trimmed
                .lines()
                .enumerate()
                .filter(|(i, _)| *i != idx)
                .map(|(_, l)| l)
                .collect::<Vec<_>>()
                .join("\n");
            return (answer.trim().to_string(), value.clamp(0.0, 1.0));
        }
    }
    (trimmed.to_string(), DEFAULT_SOLVER_CONFIDENCE)
}

/// Scripted behavior of one [`StubLanguageModel`] call.
#[derive(Debug, Clone)]
pub enum StubBehavior {
    /// Answer grounded in the first passage of the prompt, citing its doc id
    /// and reporting the given confidence.
    Answer { confidence: f32 },
    /// A canned reply, returned verbatim.
    Canned(String),
    /// Block for the duration, then time out if the deadline has passed.
    Sleep(Duration),
    /// Fail with an upstream error.
    Fail(String),
}

/// Deterministic language model for tests and offline runs.
///
/// Behaviors are consumed round-robin across calls. The `Answer` behavior
/// parses the prompt's `[doc_id] text` passage lines and echoes the first
/// one, so answers stay grounded in whatever context was retrieved.
pub struct StubLanguageModel {
    behaviors: Vec<StubBehavior>,
    calls: Mutex<usize>,
}

impl StubLanguageModel {
    pub fn new(behaviors: Vec<StubBehavior>) -> Self {
        Self {
            behaviors,
            calls: Mutex::new(0),
        }
    }

    /// A model that always answers from the first retrieved passage.
    pub fn answering(confidence: f32) -> Self {
        Self::new(vec![StubBehavior::Answer { confidence }])
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }

    fn next_behavior(&self) -> StubBehavior {
        let mut calls = self.calls.lock();
        let behavior = self.behaviors[*calls % self.behaviors.len()].clone();
        *calls += 1;
        behavior
    }
}

impl LanguageModel for StubLanguageModel {
    fn generate(&self, prompt: &str, opts: &GenerationOptions) -> Result<String> {
        match self.next_behavior() {
            StubBehavior::Answer { confidence } => {
                let passage = prompt
                    .lines()
                    .find(|l| l.trim_start().starts_with('['))
                    .unwrap_or("")
                    .trim()
                    .to_string();
                Ok(format!("{}\nCONFIDENCE: {}", passage, confidence))
            }
            StubBehavior::Canned(reply) => Ok(reply),
            StubBehavior::Sleep(duration) => {
                let budget = opts.deadline.remaining().unwrap_or(Duration::ZERO);
                std::thread::sleep(duration.min(budget + Duration::from_millis(5)));
                if opts.deadline.expired() {
                    Err(QaError::UpstreamTimeout { stage: "solver" })
                } else {
                    Ok("slow answer\nCONFIDENCE: 0.6".to_string())
                }
            }
            StubBehavior::Fail(message) => Err(QaError::Upstream {
                status: Some(500),
                message,
            }),
        }
    }
}
