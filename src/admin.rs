use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::cache::FactsStats;
use crate::metrics::MetricsSnapshot;

/// Process-wide kill switch. When set, the pipeline rejects new requests
/// with `SERVICE_UNAVAILABLE`; in-flight requests run to completion.
#[derive(Debug, Default)]
pub struct KillSwitch {
    active: AtomicBool,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.active.store(true, Ordering::SeqCst);
        tracing::warn!("kill switch triggered; rejecting new requests");
    }

    pub fn release(&self) {
        self.active.store(false, Ordering::SeqCst);
        tracing::info!("kill switch released");
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Control-plane stats aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminStats {
    pub documents: usize,
    pub index_generation: u64,
    pub kill_switch_active: bool,
    pub cache: FactsStats,
    pub metrics: MetricsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kill_switch_toggles() {
        let ks = KillSwitch::new();
        assert!(!ks.is_active());
        ks.trigger();
        assert!(ks.is_active());
        ks.release();
        assert!(!ks.is_active());
    }
}
