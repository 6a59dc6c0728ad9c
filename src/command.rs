//! # Command contract.
//!
//! A [`Command`] is a caller-supplied value representing one unit of work.
//! It carries an [`Identifier`] naming the handler that services it, plus
//! whatever payload that handler expects. Commands move through the bus as
//! [`CommandRef`] (`Arc<dyn Command>`) and are immutable from the bus's
//! perspective.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Shared handle to a command object.
///
/// This is the type accepted by every bus entry point. Entry points take
/// `impl Into<Option<CommandRef>>`, so both `bus.handle(cmd)` and
/// `bus.handle(None)` type-check; a `None` command surfaces
/// [`BusError::InvalidCommand`](crate::BusError::InvalidCommand).
pub type CommandRef = Arc<dyn Command>;

/// # Routing key for commands.
///
/// An opaque, equality-comparable token. Every command exposes exactly one
/// identifier, and every handler declares the one identifier it services.
///
/// # Example
/// ```
/// use cmdbus::Identifier;
///
/// const DEPLOY: Identifier = Identifier::from_static("deploy");
///
/// assert_eq!(DEPLOY, Identifier::from("deploy".to_string()));
/// assert_eq!(DEPLOY.as_str(), "deploy");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(Cow<'static, str>);

impl Identifier {
    /// Creates an identifier from a static string, usable in `const` items.
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for Identifier {
    fn from(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }
}

impl From<String> for Identifier {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// # A unit of work submitted to the bus.
///
/// Implementors expose the [`Identifier`] used to resolve their handler.
/// The `Any` supertrait lets handlers downcast to the concrete command
/// type (the built-in closure handler relies on this).
///
/// # Example
/// ```
/// use cmdbus::{Command, Identifier};
///
/// struct CreateUser {
///     name: String,
/// }
///
/// impl Command for CreateUser {
///     fn identifier(&self) -> Identifier {
///         Identifier::from_static("create-user")
///     }
/// }
///
/// let cmd = CreateUser { name: "ada".into() };
/// assert_eq!(cmd.identifier().as_str(), "create-user");
/// # let _ = cmd.name;
/// ```
pub trait Command: Any + Send + Sync {
    /// Returns the identifier this command is routed by.
    fn identifier(&self) -> Identifier;
}
