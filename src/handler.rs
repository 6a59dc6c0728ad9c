//! # Handler contract.
//!
//! A [`Handler`] is the single consumer registered for one identifier.
//! Handlers are invoked concurrently from multiple workers and must be
//! safe for that; the bus never serializes invocations of one handler.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::command::{CommandRef, Identifier};
use crate::error::DynError;

/// Payload returned by a handler.
///
/// Shared (`Arc`) because every awaiter of a completion observes the same
/// final value. Use [`data`] to build one and
/// [`Any::downcast_ref`](std::any::Any::downcast_ref) to read it back.
pub type Data = Arc<dyn Any + Send + Sync>;

/// Result of handling one command: optional payload, or the error the
/// handler (or a middleware) produced.
pub type Outcome = Result<Option<Data>, DynError>;

/// Wraps a payload value for returning from a handler.
///
/// ```
/// use cmdbus::data;
///
/// let payload = data("created");
/// assert_eq!(payload.downcast_ref::<&str>(), Some(&"created"));
/// ```
pub fn data<T: Any + Send + Sync>(value: T) -> Data {
    Arc::new(value)
}

/// # The single consumer registered for one identifier.
///
/// [`handles`](Handler::handles) names the identifier this handler
/// services; [`handle`](Handler::handle) performs the work. The bus
/// enforces one handler per identifier at
/// [`initialize`](crate::Bus::initialize) time.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use cmdbus::{data, CommandRef, Handler, Identifier, Outcome};
///
/// struct Greeter;
///
/// #[async_trait]
/// impl Handler for Greeter {
///     fn handles(&self) -> Identifier {
///         Identifier::from_static("greet")
///     }
///
///     async fn handle(&self, _cmd: CommandRef) -> Outcome {
///         Ok(Some(data("hello")))
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync {
    /// Returns the one identifier this handler services.
    fn handles(&self) -> Identifier;

    /// Executes the command. May run concurrently with itself.
    async fn handle(&self, cmd: CommandRef) -> Outcome;
}
