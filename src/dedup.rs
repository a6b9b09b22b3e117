//! Stale-result filtering.
//!
//! A server may rebuild its state from a stale frame (after re-processing
//! or an engine restart) and emit results that predate what the client
//! already rendered. Each result batch carries a monotonic engine update
//! count; the gate drops batches that do not advance it, so the
//! application never sees output regress. The whole batch is dropped or
//! forwarded, never a subset.

use tracing::debug;

/// Monotonic update-count gate for result batches.
///
/// Strictness is configurable: some deployments want every batch forwarded
/// regardless of ordering, in which case the gate only tracks the
/// high-water mark.
#[derive(Debug)]
pub struct UpdateGate {
    strict: bool,
    last: Option<u64>,
}

impl UpdateGate {
    /// Create a gate. The first batch is always accepted.
    pub fn new(strict: bool) -> Self {
        Self { strict, last: None }
    }

    /// Decide whether a batch with this update count may pass.
    pub fn accept(&mut self, update_count: u64) -> bool {
        if self.strict
            && let Some(last) = self.last
            && update_count <= last
        {
            debug!(update_count, last, "dropping stale result batch");
            return false;
        }
        self.last = Some(self.last.map_or(update_count, |last| last.max(update_count)));
        true
    }

    /// Highest update count seen so far.
    pub fn high_water(&self) -> Option<u64> {
        self.last
    }
}
