//! Engine Errors
//!
//! Every failure the engine can raise is reported synchronously to the caller
//! that triggered the batch. Errors are `Clone` because a single failure is
//! recorded once on the runtime and then surfaced at every nested level of
//! the batch that is unwinding.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A failure raised while tracking or propagating changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A signal received two different values within one uncommitted frame.
    #[error("conflicting changes: signal already holds a different pending value in this frame")]
    ConflictingWrite,

    /// A computation was read (directly or transitively) while it was running.
    #[error("circular dependency: computation read while it is being evaluated")]
    CircularDependency,

    /// A clock was asked to update while it was already running.
    #[error("circular clock dependency: clock asked to update while already running")]
    CircularClock,

    /// A computation was created with no enclosing computation or root.
    #[error("computations must be created under a parent computation or root")]
    NoOwner,

    /// `cleanup` was called with no enclosing computation.
    #[error("cleanup() must be called from within a computation, not at top level")]
    CleanupOutsideComputation,

    /// A clock kept producing work past the frame ceiling.
    #[error("runaway clock detected: work still pending after {frames} frames")]
    RunawayClock {
        /// The ceiling that was exceeded.
        frames: usize,
    },

    /// The engine configuration could not be parsed.
    #[error("invalid engine configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runaway_message_names_the_ceiling() {
        let err = Error::RunawayClock { frames: 42 };
        assert!(err.to_string().contains("42 frames"));
    }

    #[test]
    fn errors_compare_by_kind() {
        assert_eq!(Error::CircularDependency, Error::CircularDependency.clone());
        assert_ne!(Error::CircularDependency, Error::CircularClock);
    }
}
