//! Computation Nodes
//!
//! A computation node is the graph-side record of one derived value or side
//! effect. The user's function and its output value live behind the `body`
//! closure; the node itself only carries what the propagation engine needs:
//! its clock, lifecycle state, edges, owned children and cleanups.
//!
//! # Lifecycle
//!
//! ```text
//!            mark stale              update
//!  Current ─────────────▶ Stale ─────────────▶ Running ──┐
//!     ▲                                                   │
//!     └───────────────────────────────────────────────────┘
//! ```
//!
//! A node is disposed by removing it from the arena; a stale [`NodeId`] is
//! how the rest of the engine recognises a dead node.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::arena::{ClockId, LogId, NodeId};
use super::log::SourceList;

/// Lifecycle state of a computation or clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeState {
    /// Up to date for its clock's current time.
    #[default]
    Current,
    /// Marked for re-evaluation at its clock's current time.
    Stale,
    /// Currently being evaluated.
    Running,
}

/// The closure a node runs on each evaluation.
///
/// It is shared so the engine can call it without holding a borrow of the
/// graph, and so a panicking evaluation does not lose it.
pub type Body = Rc<RefCell<dyn FnMut()>>;

/// A cleanup callback. The flag is `true` when the node is being disposed
/// rather than re-evaluated.
pub type Cleanup = Box<dyn FnOnce(bool)>;

/// Cross-clock reads made by a node during its current evaluation.
#[derive(Debug, Default)]
pub struct NodePreClocks {
    /// Child clocks of the node's own clock that must be brought current
    /// before the node's value can be trusted.
    pub(crate) clocks: SmallVec<[ClockId; 2]>,
    /// Node age at which each clock was last recorded, so repeated reads in
    /// one evaluation record a clock only once.
    pub(crate) ages: IndexMap<ClockId, u64>,
    /// `(holder, clock)` pairs where `holder` is an ancestor clock of this
    /// node whose own pre-clock record counts this node's read of `clock`.
    pub(crate) upstream: SmallVec<[(ClockId, ClockId); 2]>,
}

/// One computation in the graph.
pub struct ComputationNode {
    pub(crate) clock: ClockId,
    pub(crate) body: Option<Body>,
    pub(crate) age: u64,
    pub(crate) state: NodeState,
    pub(crate) sources: SourceList,
    pub(crate) log: Option<LogId>,
    pub(crate) preclocks: Option<NodePreClocks>,
    pub(crate) owner: Option<NodeId>,
    pub(crate) owned: Vec<NodeId>,
    pub(crate) cleanups: Vec<Cleanup>,
}

impl ComputationNode {
    pub(crate) fn new(clock: ClockId, body: Option<Body>, age: u64) -> Self {
        Self {
            clock,
            body,
            age,
            state: NodeState::Current,
            sources: SourceList::default(),
            log: None,
            preclocks: None,
            owner: None,
            owned: Vec::new(),
            cleanups: Vec::new(),
        }
    }

    /// The clock this node was created under.
    pub fn clock(&self) -> ClockId {
        self.clock
    }

    /// Logical time of the node's clock at its last evaluation or marking.
    pub fn age(&self) -> u64 {
        self.age
    }

    /// Current lifecycle state.
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Whether this node is a bare ownership scope with nothing to evaluate.
    pub fn is_root(&self) -> bool {
        self.body.is_none()
    }

    /// Number of sources read during the last evaluation.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// The node that adopted this one, if any.
    pub fn owner(&self) -> Option<NodeId> {
        self.owner
    }

    /// Children created during the last evaluation.
    pub fn owned(&self) -> &[NodeId] {
        &self.owned
    }

    /// The node's output log, if anything has ever read it.
    pub fn log(&self) -> Option<LogId> {
        self.log
    }

    /// Child clocks recorded as read during the current evaluation.
    pub(crate) fn preclock_list(&self) -> SmallVec<[ClockId; 2]> {
        self.preclocks
            .as_ref()
            .map(|pre| pre.clocks.clone())
            .unwrap_or_default()
    }
}

impl fmt::Debug for ComputationNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputationNode")
            .field("clock", &self.clock)
            .field("age", &self.age)
            .field("state", &self.state)
            .field("root", &self.is_root())
            .field("sources", &self.sources.len())
            .field("owned", &self.owned.len())
            .field("cleanups", &self.cleanups.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::arena::{Arena, ArenaKey};

    #[test]
    fn new_node_is_current_with_no_edges() {
        let clock = ClockId::from_parts(0, 0);
        let node = ComputationNode::new(clock, None, 3);

        assert_eq!(node.state(), NodeState::Current);
        assert_eq!(node.age(), 3);
        assert!(node.is_root());
        assert_eq!(node.source_count(), 0);
        assert!(node.log().is_none());
        assert!(node.preclock_list().is_empty());
    }

    #[test]
    fn body_is_shared_not_moved() {
        let hits = Rc::new(RefCell::new(0));
        let counter = hits.clone();
        let body: Body = Rc::new(RefCell::new(move || *counter.borrow_mut() += 1));

        let mut clocks: Arena<ClockId, ()> = Arena::new();
        let node = ComputationNode::new(clocks.insert(()), Some(body.clone()), 0);
        assert!(!node.is_root());

        (body.borrow_mut())();
        if let Some(shared) = node.body.as_ref() {
            (shared.borrow_mut())();
        }
        assert_eq!(*hits.borrow(), 2);
    }
}
