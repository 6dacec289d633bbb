//! Cascade Core
//!
//! This crate provides the engine behind Cascade, a fine-grained reactive
//! dependency-tracking and incremental-recomputation library. It implements:
//!
//! - Reactive primitives (signals, computations, ownership scopes)
//! - Automatic edge tracking through bidirectional edge logs
//! - Frame-based change propagation with a runaway-frame guard
//! - Hierarchical batching clocks (subclocks)
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `reactive`: the public primitives and the per-thread runtime
//! - `graph`: the dependency graph, edge logs, clocks and marking
//!
//! # Example
//!
//! ```rust,ignore
//! use cascade_core::reactive::{root, Computation, Signal};
//!
//! // Create a signal
//! let count = Signal::new(0);
//!
//! // Create a derived value and an effect under a root
//! let c = count.clone();
//! let doubled = root(|_| Computation::new(move |_| c.get() * 2))?;
//! let d = doubled.clone();
//! root(|_| Computation::new(move |_| println!("doubled: {}", d.get())))?;
//!
//! // Update the signal
//! count.set(5)?;
//! // The effect re-runs before `set` returns and prints "doubled: 10"
//! ```

pub mod graph;
pub mod reactive;

mod config;
mod error;

pub use config::{config, configure, EngineConfig, DEFAULT_MAX_FRAMES};
pub use error::{Error, Result};
