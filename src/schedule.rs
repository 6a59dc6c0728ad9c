//! # Schedule contract.
//!
//! The bus does not compute trigger instants itself; it consumes them
//! from an external schedule (typically a cron library adapter) through
//! this narrow interface. A schedule is a stateful cursor over future
//! instants.

use std::time::Instant;

use crate::error::DynError;

/// External iterator of future trigger instants.
///
/// The schedule processor drives it as a state machine:
/// [`following`](Schedule::following) reads the instant under the cursor
/// (possibly still unset on a freshly built schedule), and
/// [`next`](Schedule::next) advances the cursor, returning `Err` once the
/// schedule is exhausted. An exhausted schedule's entry is removed from
/// the processor.
pub trait Schedule: Send {
    /// Returns the instant under the cursor, if one has been computed.
    fn following(&self) -> Option<Instant>;

    /// Advances the cursor. `Err` means no further instants exist.
    fn next(&mut self) -> Result<(), DynError>;
}
