//! Document generation counter
//!
//! Every batch handed to the worker pool is tagged with the generation that
//! was current when it was submitted. Advancing the generation (new document,
//! new scale, cleared bookkeeping) marks all older batches stale: workers
//! still finish them, but their results are discarded instead of published.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Shared, monotonically increasing generation counter
///
/// Clones observe the same counter.
#[derive(Debug, Clone, Default)]
pub struct Generation {
    value: Arc<AtomicU64>,
}

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new generation and return its number.
    pub fn advance(&self) -> u64 {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn current(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Returns `true` if work tagged with `generation` is still wanted
    pub fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }
}
