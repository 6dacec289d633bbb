//! Batching Clocks
//!
//! A clock is a batching domain. It owns four queues of pending work and a
//! local `subtime` counter; its logical time is the sum of its own subtime and
//! every ancestor's. The root clock drives top-level updates, and subclocks
//! nest beneath it to form independent domains whose time only advances when
//! they are driven.
//!
//! # Frames
//!
//! Running a clock drains its queues in a fixed order, repeatedly, until all
//! four are empty:
//!
//! 1. `changes`: commit pending signal values and mark their readers stale
//! 2. `subclocks`: bring child clocks with pending work up to date
//! 3. `updates`: re-evaluate stale computations
//! 4. `disposes`: tear down computations disposed during the batch
//!
//! Each pass after the first advances the clock's subtime by one.

use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::arena::{ClockId, LogId, NodeId};
use super::node::NodeState;

/// A signal value waiting to be committed by its clock.
pub trait PendingChange {
    /// Make the pending value the committed one.
    ///
    /// Returns the signal's edge log, if anything has ever read it.
    fn commit(&self) -> Option<LogId>;

    /// Drop the pending value without committing it.
    fn discard(&self);
}

/// Clocks from other branches that computations under this clock have read,
/// with a reference count per clock.
#[derive(Debug, Default)]
pub struct ClockPreClocks {
    counts: IndexMap<ClockId, u32>,
}

impl ClockPreClocks {
    /// Count one more read of `clock`.
    pub fn retain(&mut self, clock: ClockId) {
        *self.counts.entry(clock).or_insert(0) += 1;
    }

    /// Forget one read of `clock`.
    pub fn release(&mut self, clock: ClockId) {
        if let Some(count) = self.counts.get_mut(&clock) {
            *count = count.saturating_sub(1);
        }
    }

    /// Clocks with at least one outstanding read, in first-seen order.
    pub fn live(&self) -> impl Iterator<Item = ClockId> + '_ {
        self.counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(clock, _)| *clock)
    }

    /// Outstanding reads of `clock`.
    pub fn count(&self, clock: ClockId) -> u32 {
        self.counts.get(&clock).copied().unwrap_or(0)
    }
}

/// A batching domain.
pub struct Clock {
    pub(crate) parent: Option<ClockId>,
    pub(crate) depth: u32,
    pub(crate) age: u64,
    pub(crate) state: NodeState,
    pub(crate) subtime: u64,
    /// Nodes, signals and child clocks ever created on this clock.
    pub(crate) residents: u32,
    pub(crate) preclocks: Option<ClockPreClocks>,
    pub(crate) changes: VecDeque<Rc<dyn PendingChange>>,
    pub(crate) subclocks: VecDeque<ClockId>,
    pub(crate) updates: VecDeque<NodeId>,
    pub(crate) disposes: VecDeque<NodeId>,
}

impl Clock {
    pub(crate) fn new(parent: Option<ClockId>, depth: u32, age: u64) -> Self {
        Self {
            parent,
            depth,
            age,
            state: NodeState::Current,
            subtime: 0,
            residents: 0,
            preclocks: None,
            changes: VecDeque::new(),
            subclocks: VecDeque::new(),
            updates: VecDeque::new(),
            disposes: VecDeque::new(),
        }
    }

    /// The enclosing clock, `None` for the root.
    pub fn parent(&self) -> Option<ClockId> {
        self.parent
    }

    /// Distance from the root clock.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Parent time at which this clock was last brought up to date.
    pub fn age(&self) -> u64 {
        self.age
    }

    /// Current lifecycle state.
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Ticks contributed by this clock alone.
    pub fn subtime(&self) -> u64 {
        self.subtime
    }

    /// Whether any of the four queues holds work.
    pub fn has_work(&self) -> bool {
        !self.changes.is_empty()
            || !self.subclocks.is_empty()
            || !self.updates.is_empty()
            || !self.disposes.is_empty()
    }

    /// Empty the change, subclock and update queues.
    ///
    /// Returns the dropped changes so their pending values can be discarded.
    pub(crate) fn reset(&mut self) -> Vec<Rc<dyn PendingChange>> {
        self.subclocks.clear();
        self.updates.clear();
        self.changes.drain(..).collect()
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clock")
            .field("parent", &self.parent)
            .field("depth", &self.depth)
            .field("age", &self.age)
            .field("state", &self.state)
            .field("subtime", &self.subtime)
            .field("residents", &self.residents)
            .field("changes", &self.changes.len())
            .field("subclocks", &self.subclocks.len())
            .field("updates", &self.updates.len())
            .field("disposes", &self.disposes.len())
            .finish()
    }
}
