use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Monotonic counters for a single replay.
///
/// Cloning a [`ReplayMetrics`] clones the handle, not the counters: all
/// clones observe the same underlying state, the way a caller holds on to a
/// handle while the replay runs on its own task.
#[derive(Clone, Default)]
pub struct ReplayMetrics {
    inner: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    buffered_items: AtomicU64,
    emitted_backfill: AtomicU64,
    emitted_live: AtomicU64,
    emitted_reconnect: AtomicU64,
    discarded_duplicates: AtomicU64,
}

/// Point-in-time snapshot returned by [`ReplayMetrics::snapshot`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub buffered_items: u64,
    pub emitted_backfill: u64,
    pub emitted_live: u64,
    pub emitted_reconnect: u64,
    pub discarded_duplicates: u64,
}

impl ReplayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inc_buffered(&self) {
        self.inner.buffered_items.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_emitted_backfill(&self, n: u64) {
        self.inner.emitted_backfill.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn inc_emitted_backfill(&self) {
        self.add_emitted_backfill(1);
    }

    pub(crate) fn inc_emitted_live(&self) {
        self.inner.emitted_live.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_emitted_reconnect(&self) {
        self.inner.emitted_reconnect.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_discarded_duplicates(&self, n: u64) {
        self.inner
            .discarded_duplicates
            .fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn inc_discarded_duplicate(&self) {
        self.add_discarded_duplicates(1);
    }

    /// Returns a readable-at-any-time snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            buffered_items: self.inner.buffered_items.load(Ordering::Relaxed),
            emitted_backfill: self.inner.emitted_backfill.load(Ordering::Relaxed),
            emitted_live: self.inner.emitted_live.load(Ordering::Relaxed),
            emitted_reconnect: self.inner.emitted_reconnect.load(Ordering::Relaxed),
            discarded_duplicates: self.inner.discarded_duplicates.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for ReplayMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.snapshot().fmt(f)
    }
}

impl std::fmt::Debug for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsSnapshot")
            .field("buffered_items", &self.buffered_items)
            .field("emitted_backfill", &self.emitted_backfill)
            .field("emitted_live", &self.emitted_live)
            .field("emitted_reconnect", &self.emitted_reconnect)
            .field("discarded_duplicates", &self.discarded_duplicates)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let m = ReplayMetrics::new();
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn clones_share_state() {
        let m = ReplayMetrics::new();
        let m2 = m.clone();
        m.inc_emitted_live();
        m2.inc_emitted_live();
        assert_eq!(m.snapshot().emitted_live, 2);
    }
}
