//! # Closure commands.
//!
//! A [`ClosureCommand`] is a command whose payload *is* the callable to
//! run. It carries the reserved identifier [`CLOSURE_IDENTIFIER`], and
//! [`Bus::initialize`](crate::Bus::initialize) auto-installs the matching
//! [`ClosureHandler`] unless the caller registers their own handler for
//! that identifier.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};

use crate::command::{Command, CommandRef, Identifier};
use crate::error::BusError;
use crate::handler::{Handler, Outcome};

/// Reserved identifier routing closure commands to the closure handler.
pub const CLOSURE_IDENTIFIER: Identifier = Identifier::from_static("closure");

type BoxedClosure = Box<dyn Fn() -> BoxFuture<'static, Outcome> + Send + Sync>;

/// # A command whose payload is the callable to run.
///
/// # Example
/// ```
/// use cmdbus::{data, ClosureCommand};
///
/// let cmd = ClosureCommand::arc(|| async { Ok(Some(data(42_u32))) });
/// assert_eq!(cmd.identifier(), cmdbus::CLOSURE_IDENTIFIER);
/// ```
pub struct ClosureCommand {
    func: BoxedClosure,
}

impl ClosureCommand {
    /// Wraps an async callable as a command.
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        Self {
            func: Box::new(move || func().boxed()),
        }
    }

    /// Wraps the callable and returns it as a shared command handle.
    pub fn arc<F, Fut>(func: F) -> CommandRef
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        Arc::new(Self::new(func))
    }

    pub(crate) async fn call(&self) -> Outcome {
        (self.func)().await
    }
}

impl Command for ClosureCommand {
    fn identifier(&self) -> Identifier {
        CLOSURE_IDENTIFIER
    }
}

impl fmt::Debug for ClosureCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureCommand").finish_non_exhaustive()
    }
}

/// Default handler for the reserved closure identifier.
///
/// Downcasts the command to [`ClosureCommand`] and runs its callable. A
/// command carrying the reserved identifier that is not a
/// [`ClosureCommand`] yields
/// [`BusError::InvalidClosureCommand`].
pub struct ClosureHandler;

#[async_trait]
impl Handler for ClosureHandler {
    fn handles(&self) -> Identifier {
        CLOSURE_IDENTIFIER
    }

    async fn handle(&self, cmd: CommandRef) -> Outcome {
        let any: &dyn Any = cmd.as_ref();
        match any.downcast_ref::<ClosureCommand>() {
            Some(closure) => closure.call().await,
            None => Err(BusError::InvalidClosureCommand.shared()),
        }
    }
}
