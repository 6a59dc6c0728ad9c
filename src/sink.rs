//! # Error sinks.
//!
//! An [`ErrorSink`] observes every error the bus surfaces: validation
//! failures, handler errors, middleware errors, contained panics. Sinks
//! are observers only; they cannot veto or transform the error, and the
//! caller still receives it. Each surfaced error reaches each sink
//! exactly once.

use async_trait::async_trait;

use crate::command::CommandRef;
use crate::error::DynError;

/// Observer invoked for every error surfaced by the bus.
///
/// `cmd` is `None` when the error predates a command value (a `None`
/// submission). Implementations must not fail; there is nowhere for a
/// sink's own error to go.
#[async_trait]
pub trait ErrorSink: Send + Sync {
    async fn handle(&self, cmd: Option<&CommandRef>, err: &DynError);
}

/// Built-in sink that reports errors through `tracing`.
///
/// Enabled via the `logging` feature. Useful for demos and debugging.
#[cfg(feature = "logging")]
pub struct LogSink;

#[cfg(feature = "logging")]
#[async_trait]
impl ErrorSink for LogSink {
    async fn handle(&self, cmd: Option<&CommandRef>, err: &DynError) {
        match cmd {
            Some(cmd) => {
                tracing::error!(command = %cmd.identifier(), error = %err, "command failed")
            }
            None => tracing::error!(error = %err, "command failed"),
        }
    }
}
