//! Per-mode request counters.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::mode::Mode;

/// Counts completed requests, keyed by the mode that handled them.
///
/// Lock-free and cheap to clone; all clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct MetricsCounter {
    counts: Arc<[AtomicU64; 5]>,
}

impl MetricsCounter {
    /// Creates a counter with every mode at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one completed request for `mode`.
    pub fn count(&self, mode: Mode) {
        self.counts[mode.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the count for a single mode.
    pub fn get(&self, mode: Mode) -> u64 {
        self.counts[mode.index()].load(Ordering::Relaxed)
    }

    /// Returns the total across all modes.
    pub fn total(&self) -> u64 {
        Mode::ALL.iter().map(|m| self.get(*m)).sum()
    }

    /// Returns the current counts keyed by mode name.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        Mode::ALL
            .iter()
            .map(|m| (m.as_str().to_string(), self.get(*m)))
            .collect()
    }
}
