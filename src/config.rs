//! # Bus configuration.
//!
//! [`Config`] holds the tunables frozen at
//! [`Bus::initialize`](crate::Bus::initialize): the worker pool size and
//! the async queue buffer. Both may only be adjusted while the bus is
//! uninitialized; the setters on [`Bus`](crate::Bus) silently no-op
//! afterwards.
//!
//! # Example
//! ```
//! use cmdbus::Config;
//!
//! let cfg = Config::default();
//! assert_eq!(cfg.queue_buffer, 100);
//! assert!(cfg.worker_pool_size >= 1);
//! ```

use std::num::NonZeroUsize;

/// Tunables for the dispatch core.
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of workers draining the async queue.
    pub worker_pool_size: usize,
    /// Capacity of the bounded async queue. Submissions suspend while the
    /// queue is full; this value has a high performance impact depending
    /// on the use case.
    pub queue_buffer: usize,
}

impl Default for Config {
    /// Provides a default configuration:
    /// - `worker_pool_size` = available hardware parallelism
    /// - `queue_buffer` = 100
    fn default() -> Self {
        Self {
            worker_pool_size: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            queue_buffer: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = Config::default();
        assert!(cfg.worker_pool_size >= 1);
        assert_eq!(cfg.queue_buffer, 100);
    }
}
