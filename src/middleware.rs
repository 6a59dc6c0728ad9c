//! # Middleware pipeline.
//!
//! Middleware wrap handler invocation in a nested call chain:
//! `mw[0]` sees the command first, calls [`Next::run`] to continue into
//! `mw[1]`, and so on down to the resolved handler. Code before the
//! `next.run(cmd).await` runs on the way in, code after it on the way
//! out, so the configured order is entry order and reverse exit order.
//!
//! A middleware that returns an error before calling `next` short-circuits
//! the handler entirely; one that fails after `next` replaces the result
//! produced below it. The list given to
//! [`Bus::set_middleware`](crate::Bus::set_middleware) is frozen at
//! initialization and its order preserved exactly.

use std::sync::Arc;

use async_trait::async_trait;

use crate::command::CommandRef;
use crate::handler::{Handler, Outcome};

/// Before/after wrapper around handler invocation.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use cmdbus::{CommandRef, Middleware, Next, Outcome};
///
/// struct Timing;
///
/// #[async_trait]
/// impl Middleware for Timing {
///     async fn handle(&self, cmd: CommandRef, next: Next<'_>) -> Outcome {
///         let started = std::time::Instant::now();
///         let outcome = next.run(cmd).await;
///         tracing::debug!(elapsed = ?started.elapsed(), "command handled");
///         outcome
///     }
/// }
/// ```
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, cmd: CommandRef, next: Next<'_>) -> Outcome;
}

/// Continuation to the remainder of the middleware chain.
///
/// Consumed by [`run`](Next::run); a middleware that never calls it
/// short-circuits everything below, including the handler.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    handler: &'a dyn Handler,
}

impl<'a> Next<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn Middleware>], handler: &'a dyn Handler) -> Self {
        Self { chain, handler }
    }

    /// Runs the rest of the chain: the next middleware if any remain,
    /// otherwise the resolved handler.
    pub async fn run(self, cmd: CommandRef) -> Outcome {
        match self.chain.split_first() {
            Some((mw, rest)) => {
                let next = Next {
                    chain: rest,
                    handler: self.handler,
                };
                mw.handle(cmd, next).await
            }
            None => self.handler.handle(cmd).await,
        }
    }
}
