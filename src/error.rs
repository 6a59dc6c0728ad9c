//! # Error types surfaced by the bus.
//!
//! The bus itself fails only with the sentinel values of [`BusError`].
//! Errors produced by handlers or middleware are never wrapped: they
//! travel through the bus verbatim as [`DynError`], so the value a caller
//! receives from [`Completion::wait`](crate::Completion::wait) or an error
//! sink observes is the handler's own error.
//!
//! [`DynError`] is an `Arc` rather than a `Box` because every awaiter of a
//! completion observes the same final error value. Bus sentinels inside a
//! [`DynError`] are recovered by downcast:
//!
//! ```
//! use cmdbus::{BusError, DynError};
//!
//! let err: DynError = BusError::HandlerNotFound("deploy".into()).shared();
//! assert_eq!(
//!     err.downcast_ref::<BusError>(),
//!     Some(&BusError::HandlerNotFound("deploy".into()))
//! );
//! ```

use std::sync::Arc;

use thiserror::Error;

use crate::command::Identifier;

/// Shared dynamic error: the type errors travel through the bus as.
pub type DynError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// # Errors produced by the bus itself.
///
/// A closed taxonomy of equality-comparable sentinels. Anything a handler
/// or middleware returns is propagated as-is and never appears here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The command value was missing (`None`).
    #[error("invalid command")]
    InvalidCommand,

    /// An operation was attempted before [`Bus::initialize`](crate::Bus::initialize).
    #[error("the bus is not initialized")]
    NotInitialized,

    /// An operation was attempted during or after shutdown.
    #[error("the bus is shutting down")]
    ShuttingDown,

    /// Two supplied handlers declared the same identifier.
    #[error("more than one handler registered for '{0}'")]
    DuplicateHandler(Identifier),

    /// No handler is registered for the command's identifier.
    #[error("no handler registered for '{0}'")]
    HandlerNotFound(Identifier),

    /// `join`/`arrivals` was called on an empty completion list.
    #[error("await list is empty")]
    EmptyAwaitList,

    /// A command carried the reserved closure identifier but was not a
    /// [`ClosureCommand`](crate::ClosureCommand).
    #[error("invalid closure command")]
    InvalidClosureCommand,

    /// A handler panicked inside a worker. The panic is contained; the
    /// worker keeps serving subsequent commands.
    #[error("handler panicked: {0}")]
    HandlerPanicked(String),
}

impl BusError {
    /// Wraps the sentinel for the dynamic error channel.
    pub fn shared(self) -> DynError {
        Arc::new(self)
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            BusError::InvalidCommand => "invalid_command",
            BusError::NotInitialized => "bus_not_initialized",
            BusError::ShuttingDown => "bus_shutting_down",
            BusError::DuplicateHandler(_) => "duplicate_handler",
            BusError::HandlerNotFound(_) => "handler_not_found",
            BusError::EmptyAwaitList => "empty_await_list",
            BusError::InvalidClosureCommand => "invalid_closure_command",
            BusError::HandlerPanicked(_) => "handler_panicked",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_compare_by_value() {
        assert_eq!(BusError::InvalidCommand, BusError::InvalidCommand);
        assert_ne!(
            BusError::HandlerNotFound("a".into()),
            BusError::HandlerNotFound("b".into())
        );
    }

    #[test]
    fn sentinels_survive_the_dynamic_round_trip() {
        let err = BusError::ShuttingDown.shared();
        assert_eq!(err.downcast_ref::<BusError>(), Some(&BusError::ShuttingDown));
        assert_eq!(err.to_string(), "the bus is shutting down");
    }
}
