//! Bridge errors.

use thiserror::Error;

use crate::guest::GuestHandle;

/// Result type used by every crossing.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors raised while moving values or control across the bridge.
///
/// A failed crossing never rolls back associations that were recorded before
/// the failure; the registries stay as they were at the point of the error.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// A global name did not resolve in the dispatch table.
    #[error("'{0}' is not defined")]
    NotFound(String),

    /// A name resolved, but to something that cannot be called.
    #[error("'{0}' is not a function")]
    NotCallable(String),

    /// `construct` was applied to a value without a constructor.
    #[error("value is not a constructor")]
    NotConstructible,

    /// A property or method was requested on a value that is not an object.
    #[error("cannot read properties of {0}")]
    NotAnObject(&'static str),

    /// An assignment targeted an accessor that was defined without a setter.
    #[error("cannot assign to read only property '{0}'")]
    ReadOnlyProperty(String),

    /// A calling-convention value did not have the expected shape.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: &'static str },

    /// A guest export was called but the module does not provide it.
    #[error("guest module does not export '{0}'")]
    MissingExport(&'static str),

    /// A module asked for an import the import object does not contain.
    #[error("missing import {module}.{name}")]
    MissingImport { module: String, name: String },

    /// Weak references only accept values with identity.
    #[error("invalid weak reference target: {0}")]
    InvalidWeakTarget(&'static str),

    /// A guest handle referred to a slot that was freed or reused.
    #[error("stale guest handle {0}")]
    StaleHandle(GuestHandle),

    /// An indexed guest access fell outside the target's length.
    #[error("index {index} out of bounds for length {length}")]
    IndexOutOfBounds { index: i32, length: usize },

    /// An error raised by guest code, surfaced verbatim.
    #[error("{0}")]
    Guest(String),

    /// Instantiating the guest module failed.
    #[error("failed to load module '{locator}': {message}")]
    Load { locator: String, message: String },

    /// The guest instance behind the bridge is gone or was never bound.
    #[error("no guest module instance is bound to this bridge")]
    NotInstantiated,

    /// Invalid bridge configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BridgeError {
    /// Shorthand for a guest-raised error.
    pub fn guest(message: impl Into<String>) -> Self {
        Self::Guest(message.into())
    }
}
