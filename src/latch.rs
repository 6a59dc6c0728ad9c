//! Lock-free lifecycle primitives: a CAS-based binary latch and a
//! monotonic counter. Used for the initialization/shutdown gates and the
//! worker census.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Binary latch flipped through compare-and-swap.
///
/// `raise`/`lower` return whether this call performed the transition, so
/// exactly one of any number of concurrent callers wins.
#[derive(Debug, Default)]
pub(crate) struct Flag(AtomicBool);

impl Flag {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Attempts the 0→1 transition. Returns `true` iff this call made it.
    pub(crate) fn raise(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Attempts the 1→0 transition. Returns `true` iff this call made it.
    pub(crate) fn lower(&self) -> bool {
        self.0
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Monotonic census counter.
#[derive(Debug, Default)]
pub(crate) struct Counter(AtomicU32);

impl Counter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Increments and returns the new value.
    pub(crate) fn increment(&self) -> u32 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements and returns the new value.
    pub(crate) fn decrement(&self) -> u32 {
        self.0.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub(crate) fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }
}
