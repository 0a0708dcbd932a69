use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct SchedulerStats {
    pub cycles_started: Arc<AtomicU64>,
    pub cycles_stored: Arc<AtomicU64>,
    pub cycles_empty: Arc<AtomicU64>,
    pub cycles_failed: Arc<AtomicU64>,
    pub alerts_raised: Arc<AtomicU64>,
}

/// Point-in-time copy of [`SchedulerStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub cycles_started: u64,
    pub cycles_stored: u64,
    pub cycles_empty: u64,
    pub cycles_failed: u64,
    pub alerts_raised: u64,
}

impl SchedulerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cycles_started: self.cycles_started.load(Ordering::Relaxed),
            cycles_stored: self.cycles_stored.load(Ordering::Relaxed),
            cycles_empty: self.cycles_empty.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            alerts_raised: self.alerts_raised.load(Ordering::Relaxed),
        }
    }
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}
