use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Live counters shared between a manager's threads and its owner.
///
/// `processed` counts items that succeeded; `failed` counts items whose
/// worker returned an error or panicked.
#[derive(Clone, Debug, Default)]
pub struct WorkStats {
    inner: Arc<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    generated: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`WorkStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub generated: u64,
    pub processed: u64,
    pub failed: u64,
}

impl WorkStats {
    pub fn generated(&self) -> u64 {
        self.inner.generated.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.inner.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.inner.failed.load(Ordering::Relaxed)
    }

    /// Items that finished, successfully or not.
    pub fn completed(&self) -> u64 {
        self.processed() + self.failed()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            generated: self.generated(),
            processed: self.processed(),
            failed: self.failed(),
        }
    }

    pub(crate) fn record_generated(&self) {
        self.inner.generated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_processed(&self) {
        self.inner.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.inner.failed.fetch_add(1, Ordering::Relaxed);
    }
}
