//! # cmdbus
//!
//! **cmdbus** is an in-process command bus.
//!
//! It routes typed command values to their single registered handler,
//! synchronously or through a fixed worker pool draining a bounded
//! queue, with a middleware pipeline around every invocation and a
//! timer-driven schedule processor for deferred/repeating submission.
//! The crate is designed to be embedded inside a larger application; it
//! is not a network service.
//!
//! ## Features
//!
//! | Area            | Description                                                        | Key types / traits                        |
//! |-----------------|--------------------------------------------------------------------|-------------------------------------------|
//! | **Dispatch**    | Sync and async entry points over one handler registry.             | [`Bus`], [`Handler`], [`Command`]          |
//! | **Await**       | One-shot completions and ordered aggregation over batches.         | [`Completion`], [`CompletionList`]         |
//! | **Middleware**  | Nested before/after chain around every handler invocation.         | [`Middleware`], [`Next`]                   |
//! | **Scheduling**  | Recurring submission driven by an external schedule.               | [`Schedule`], [`Bus::schedule`]            |
//! | **Closures**    | Commands whose payload is the callable to run.                     | [`ClosureCommand`], [`CLOSURE_IDENTIFIER`] |
//! | **Errors**      | Closed sentinel taxonomy plus verbatim handler errors.             | [`BusError`], [`DynError`], [`ErrorSink`]  |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogSink`] _(demo/reference only)_.
//!
//! ```no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use cmdbus::{data, Bus, Command, CommandRef, Handler, Identifier, Outcome};
//!
//! const GREET: Identifier = Identifier::from_static("greet");
//!
//! struct Greet;
//!
//! impl Command for Greet {
//!     fn identifier(&self) -> Identifier {
//!         GREET
//!     }
//! }
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl Handler for Greeter {
//!     fn handles(&self) -> Identifier {
//!         GREET
//!     }
//!
//!     async fn handle(&self, _cmd: CommandRef) -> Outcome {
//!         Ok(Some(data("hello")))
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = Bus::new();
//!     bus.initialize(vec![Arc::new(Greeter) as _])?;
//!
//!     // Synchronous dispatch on the caller's task.
//!     let greeting = bus.handle(Arc::new(Greet) as CommandRef).await?;
//!     assert!(greeting.is_some());
//!
//!     // Asynchronous dispatch through the worker pool.
//!     let completion = bus.handle_async(Arc::new(Greet) as CommandRef).await?;
//!     completion.wait().await?;
//!
//!     bus.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! ---

mod bus;
mod closure;
mod command;
mod completion;
mod completion_list;
mod config;
mod error;
mod handler;
mod latch;
mod middleware;
mod processor;
mod schedule;
mod sink;
mod worker;

// ---- Public re-exports ----

pub use bus::Bus;
pub use closure::{ClosureCommand, ClosureHandler, CLOSURE_IDENTIFIER};
pub use command::{Command, CommandRef, Identifier};
pub use completion::Completion;
pub use completion_list::{Arrival, CompletionList};
pub use config::Config;
pub use error::{BusError, DynError};
pub use handler::{data, Data, Handler, Outcome};
pub use middleware::{Middleware, Next};
pub use schedule::Schedule;
pub use sink::ErrorSink;

// Schedule keys are plain UUIDs; re-exported so callers need no direct
// uuid dependency for `remove_scheduled`.
pub use uuid::Uuid;

// Optional: expose a simple built-in error sink (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use sink::LogSink;
