//! Per-stage counters shared by the worker loops.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::task::Stage;

/// Counters of one stage.
///
/// Every field is atomic so workers update them without locking.
#[derive(Debug, Default)]
pub struct StageStats {
    dequeued: AtomicU64,
    succeeded: AtomicU64,
    requeued: AtomicU64,
    dropped: AtomicU64,
    emitted: AtomicU64,
    store_errors: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl StageStats {
    /// Returns the number of tasks taken from the stage's queue.
    #[must_use]
    pub fn dequeued(&self) -> u64 {
        self.dequeued.load(Ordering::SeqCst)
    }

    /// Returns the number of tasks fully handled.
    #[must_use]
    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::SeqCst)
    }

    /// Returns the number of tasks put back after a failure.
    #[must_use]
    pub fn requeued(&self) -> u64 {
        self.requeued.load(Ordering::SeqCst)
    }

    /// Returns the number of tasks discarded (already done or undecodable).
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Returns the number of child tasks handed to the next stage.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::SeqCst)
    }

    /// Returns the number of failed queue store operations.
    #[must_use]
    pub fn store_errors(&self) -> u64 {
        self.store_errors.load(Ordering::SeqCst)
    }

    /// Returns the number of fetches currently holding a permit.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Returns the highest `in_flight` value observed.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn record_dequeued(&self) {
        self.dequeued.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_requeued(&self) {
        self.requeued.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_emitted(&self, count: u64) {
        self.emitted.fetch_add(count, Ordering::SeqCst);
    }

    pub(crate) fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::SeqCst);
    }

    /// Marks one fetch as in flight until the guard is dropped.
    pub(crate) fn enter_flight(&self) -> FlightGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        FlightGuard { stats: self }
    }

    fn snapshot(&self) -> StageSnapshot {
        StageSnapshot {
            dequeued: self.dequeued(),
            succeeded: self.succeeded(),
            requeued: self.requeued(),
            dropped: self.dropped(),
            emitted: self.emitted(),
            store_errors: self.store_errors(),
            in_flight: self.in_flight(),
            peak_in_flight: self.peak_in_flight(),
        }
    }
}

/// Decrements the in-flight gauge on drop.
#[derive(Debug)]
pub(crate) struct FlightGuard<'a> {
    stats: &'a StageStats,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Live counters for the whole pipeline.
#[derive(Debug, Default)]
pub struct PipelineStats {
    discovery: StageStats,
    detail: StageStats,
    download: StageStats,
}

impl PipelineStats {
    /// Creates a tracker with every counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counters of `stage`.
    #[must_use]
    pub fn stage(&self, stage: Stage) -> &StageStats {
        match stage {
            Stage::Discovery => &self.discovery,
            Stage::Detail => &self.detail,
            Stage::Download => &self.download,
        }
    }

    /// Copies the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            discovery: self.discovery.snapshot(),
            detail: self.detail.snapshot(),
            download: self.download.snapshot(),
        }
    }
}

/// Point-in-time copy of one stage's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageSnapshot {
    /// See [`StageStats::dequeued`].
    pub dequeued: u64,
    /// See [`StageStats::succeeded`].
    pub succeeded: u64,
    /// See [`StageStats::requeued`].
    pub requeued: u64,
    /// See [`StageStats::dropped`].
    pub dropped: u64,
    /// See [`StageStats::emitted`].
    pub emitted: u64,
    /// See [`StageStats::store_errors`].
    pub store_errors: u64,
    /// See [`StageStats::in_flight`].
    pub in_flight: usize,
    /// See [`StageStats::peak_in_flight`].
    pub peak_in_flight: usize,
}

/// Point-in-time copy of every stage's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Discovery stage.
    pub discovery: StageSnapshot,
    /// Detail stage.
    pub detail: StageSnapshot,
    /// Download stage.
    pub download: StageSnapshot,
}

impl StatsSnapshot {
    /// Returns the counters of `stage`.
    #[must_use]
    pub fn stage(&self, stage: Stage) -> &StageSnapshot {
        match stage {
            Stage::Discovery => &self.discovery,
            Stage::Detail => &self.detail,
            Stage::Download => &self.download,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stats_are_zero() {
        let stats = PipelineStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_counters_are_per_stage() {
        let stats = PipelineStats::new();
        stats.stage(Stage::Detail).record_dequeued();
        stats.stage(Stage::Detail).record_requeued();
        stats.stage(Stage::Download).record_emitted(0);
        stats.stage(Stage::Discovery).record_emitted(3);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.detail.dequeued, 1);
        assert_eq!(snapshot.detail.requeued, 1);
        assert_eq!(snapshot.discovery.emitted, 3);
        assert_eq!(snapshot.download, StageSnapshot::default());
    }

    #[test]
    fn test_flight_guard_tracks_peak() {
        let stats = StageStats::default();
        {
            let _a = stats.enter_flight();
            let _b = stats.enter_flight();
            assert_eq!(stats.in_flight(), 2);
        }
        let _c = stats.enter_flight();
        assert_eq!(stats.in_flight(), 1);
        assert_eq!(stats.peak_in_flight(), 2);
    }
}
