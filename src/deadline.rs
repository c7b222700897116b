use std::time::{Duration, Instant};

use crate::error::{QaError, Result};

/// Absolute deadline carried through every blocking call in the pipeline.
///
/// All suspension points (embedder, language model, index search, snapshot
/// I/O) accept a deadline and return `CANCELED` once it has elapsed, so a
/// slow stage can never drag a request past its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn within(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    pub fn within_ms(budget_ms: u64) -> Self {
        Self::within(Duration::from_millis(budget_ms))
    }

    pub fn at(instant: Instant) -> Self {
        Self { at: instant }
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    /// Remaining budget, or `None` once elapsed.
    pub fn remaining(&self) -> Option<Duration> {
        self.at.checked_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_none()
    }

    /// The earlier of two deadlines. Used to cap a per-stage budget by the
    /// remaining request budget.
    pub fn min(self, other: Deadline) -> Deadline {
        if self.at <= other.at {
            self
        } else {
            other
        }
    }

    /// A stage-budget deadline capped by this one.
    pub fn stage(&self, budget_ms: u64) -> Deadline {
        Deadline::within_ms(budget_ms).min(*self)
    }

    /// Errors with `CANCELED` when the deadline has elapsed.
    pub fn check(&self, stage: &'static str) -> Result<()> {
        if self.expired() {
            Err(QaError::Canceled { stage })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_deadline_is_not_expired() {
        let d = Deadline::within_ms(5_000);
        assert!(!d.expired());
        assert!(d.check("test").is_ok());
        assert!(d.remaining().unwrap() > Duration::from_millis(4_000));
    }

    #[test]
    fn test_elapsed_deadline_cancels() {
        let d = Deadline::at(Instant::now() - Duration::from_millis(1));
        assert!(d.expired());
        let err = d.check("embed").unwrap_err();
        assert_eq!(err.kind(), "CANCELED");
    }

    #[test]
    fn test_stage_budget_is_capped_by_request_budget() {
        let request = Deadline::within_ms(10);
        let stage = request.stage(60_000);
        assert!(stage.remaining().unwrap_or_default() <= Duration::from_millis(10));
    }
}
