//! Dependency Graph
//!
//! This module holds the data side of the engine: the nodes, edges and
//! clocks that make up the dependency graph, and the propagation steps that
//! operate on them without calling back into user code.
//!
//! # Overview
//!
//! - Computation nodes are the readers. Each one records the sources it read
//!   during its last evaluation.
//! - Edge logs are the source side. Every signal and every computation that
//!   has been read owns one log listing its readers.
//! - Clocks are batching domains arranged in a tree under a single root.
//!
//! # Design Decisions
//!
//! 1. Nodes, logs and clocks live in generational arenas and refer to each
//!    other by index. Mutually referencing records need no shared pointers,
//!    and a disposed node is recognised by its stale id.
//!
//! 2. Edges are stored on both sides with back-references to each other's
//!    slot, so either side can drop its half in O(1).
//!
//! 3. The graph is single-threaded and lives in a thread-local runtime.

mod arena;
mod clock;
mod log;
mod node;
mod scheduler;

pub use arena::{Arena, ArenaKey, ClockId, LogId, NodeId};
pub use clock::{Clock, ClockPreClocks, PendingChange};
pub use log::{EdgeLog, Slot, SourceList};
pub use node::{Body, Cleanup, ComputationNode, NodePreClocks, NodeState};
pub use scheduler::{Alignment, GraphStats, ReadRoute, Scheduler};
