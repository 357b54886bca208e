//! Error types for signal construction.
//!
//! Runtime propagation never fails: dispatch, hook and batch are infallible.
//! Errors only surface when a derivation is assembled from runtime-checked
//! arguments (see [`derive_dynamic`](crate::reactive::derive_dynamic)).

use std::fmt;

use thiserror::Error;

/// The kind of argument a derivation expected at some position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentKind {
    /// A source signal.
    Source,
    /// The trailing compute function.
    Compute,
}

impl fmt::Display for ArgumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgumentKind::Source => f.write_str("a source signal"),
            ArgumentKind::Compute => f.write_str("a compute function"),
        }
    }
}

/// Errors raised while building signals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalError {
    /// Fewer than one source plus one compute function were given.
    #[error("derive needs at least one source and a compute function, got {given} argument(s)")]
    Arity {
        /// Number of arguments actually supplied.
        given: usize,
    },

    /// An argument of the wrong kind sits at `position` (zero-based).
    #[error("derive argument {position} must be {expected}")]
    ArgumentType {
        position: usize,
        expected: ArgumentKind,
    },
}

/// Result alias used throughout the crate.
pub type Result<T, E = SignalError> = std::result::Result<T, E>;
