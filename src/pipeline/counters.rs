//! Running totals with a persistence hook.

use std::sync::Arc;

use super::types::{CounterKind, Counters};

/// Called with the new totals after every change.
pub type PersistFn = Arc<dyn Fn(Counters) + Send + Sync>;

/// Completed/skipped/errored totals.
///
/// Every increment hands the new snapshot to the persistence callback. The
/// callback is fire-and-forget: it must not block and its failures are its
/// own business.
pub struct CounterState {
    counts: Counters,
    persist: PersistFn,
}

impl CounterState {
    pub fn new(persist: PersistFn) -> Self {
        Self {
            counts: Counters::default(),
            persist,
        }
    }

    pub fn increment(&mut self, kind: CounterKind) -> Counters {
        match kind {
            CounterKind::Completed => self.counts.completed += 1,
            CounterKind::Skipped => self.counts.skipped += 1,
            CounterKind::Errored => self.counts.errored += 1,
        }
        (self.persist)(self.counts);
        self.counts
    }

    pub fn snapshot(&self) -> Counters {
        self.counts
    }

    /// Replace the totals with values loaded from settings. Not persisted.
    pub fn restore(&mut self, counts: Counters) {
        self.counts = counts;
    }

    pub fn reset(&mut self) {
        self.counts = Counters::default();
    }
}

impl std::fmt::Debug for CounterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterState")
            .field("counts", &self.counts)
            .finish_non_exhaustive()
    }
}
