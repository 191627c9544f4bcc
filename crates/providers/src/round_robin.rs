//! Lock-free round-robin index selection.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Hands out indices `0..len` in strict rotation. Concurrent callers each
/// get a distinct tick of the counter, so over any `len` consecutive calls
/// every index is returned exactly once.
#[derive(Debug)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }

    /// Next index for a pool of `len` entries. `len` must be non-zero.
    pub fn next(&self, len: usize) -> usize {
        debug_assert!(len > 0, "round robin over an empty pool");
        // Wrapping at usize::MAX may repeat one index once; harmless.
        self.counter.fetch_add(1, Ordering::Relaxed) % len.max(1)
    }

    /// Total ticks handed out so far.
    pub fn ticks(&self) -> usize {
        self.counter.load(Ordering::Relaxed)
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}
