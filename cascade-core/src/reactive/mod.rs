//! Reactive Primitives
//!
//! This module implements the user-facing side of the engine: signals,
//! computations, ownership scopes and batching.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A [`Signal`] is a container for mutable state. Reading it inside a running
//! computation records a dependency; writing it re-evaluates exactly the
//! computations that depend on it, each once per logical update.
//!
//! ## Computations
//!
//! A [`Computation`] is a derived value or side effect. It runs once when
//! created and again whenever something it read changes. Computations
//! created while another one runs are owned by it and are disposed before it
//! re-runs.
//!
//! ## Clocks
//!
//! Writes made inside a batch ([`freeze`], a running computation, a
//! [`Subclock`]) are queued and committed together at the next frame, so no
//! reader ever sees a half-applied update.
//!
//! # Implementation Notes
//!
//! The engine is single-threaded. Each thread has its own graph, reached
//! through a thread-local runtime, and the ambient execution context is
//! swapped in and out by scoped guards.

mod computation;
mod context;
pub(crate) mod runtime;
mod scope;
mod signal;

pub use computation::Computation;
pub use scope::{cleanup, current_time, freeze, root, sample, stats, subclock, unowned, Root, Subclock};
pub use signal::{Signal, ValueSignal};
