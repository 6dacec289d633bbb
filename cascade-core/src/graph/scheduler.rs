//! Propagation Scheduler
//!
//! The scheduler owns the whole graph: computation nodes, edge logs and
//! clocks, each in its own generational arena. It implements the parts of
//! propagation that never call user code:
//!
//! - recording edges and cross-clock reads,
//! - marking readers stale through edge logs,
//! - marking clocks stale up the hierarchy,
//! - routing a read to the clock that has to be brought current first,
//! - queue bookkeeping for frames.
//!
//! Everything that runs user code (evaluating bodies, cleanups, driving
//! clocks) lives in the reactive runtime, which borrows the scheduler only
//! between those calls.
//!
//! # Marking
//!
//! When a change commits, every reader in its log whose age is older than its
//! clock's time is marked stale: its clock is marked stale, it is queued on
//! that clock's update queue, its owned children are stamped current so they
//! are disposed rather than re-run, and its own readers are marked the same
//! way. Marking is idempotent per logical time because a marked node's age is
//! set to the current time.

use std::rc::Rc;

use serde::Serialize;
use smallvec::SmallVec;

use super::arena::{Arena, ClockId, LogId, NodeId};
use super::clock::{Clock, ClockPreClocks, PendingChange};
use super::log::{EdgeLog, Slot};
use super::node::{Body, Cleanup, ComputationNode, NodePreClocks, NodeState};

/// Where a read of a computation's value must look before trusting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadRoute {
    /// The reader runs on the source's clock or a direct child of it.
    Local {
        /// The reader's clock, lifted to at most one level below the source.
        reader: ClockId,
        /// Whether reader and source share a clock.
        same: bool,
    },
    /// The source lives in another branch of the clock tree.
    Foreign {
        /// The reader-side clock that records the read.
        reader: ClockId,
        /// The source-side clock that must be brought current.
        source: ClockId,
        /// Whether `source` is a direct child of `reader`.
        direct: bool,
    },
}

/// Reader and source clocks lifted to the levels where a signal access is
/// resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alignment {
    /// The reader-side clock.
    pub reader: ClockId,
    /// The source-side clock.
    pub source: ClockId,
    /// The clock a write should be queued on.
    pub commit: ClockId,
}

/// A point-in-time summary of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct GraphStats {
    /// Live computation nodes, roots included.
    pub nodes: usize,
    /// Live edge logs.
    pub logs: usize,
    /// Clocks, the root included.
    pub clocks: usize,
    /// Live edges across all logs.
    pub edges: usize,
    /// Logical time of the root clock.
    pub root_time: u64,
}

/// State captured when a stale node starts re-evaluating.
pub(crate) struct UpdateStart {
    pub(crate) clock: ClockId,
    pub(crate) body: Option<Body>,
    pub(crate) cleanups: Vec<Cleanup>,
    pub(crate) owned: Vec<NodeId>,
}

/// The dependency graph and its batching clocks.
pub struct Scheduler {
    nodes: Arena<NodeId, ComputationNode>,
    logs: Arena<LogId, EdgeLog>,
    clocks: Arena<ClockId, Clock>,
    root: ClockId,
}

impl Scheduler {
    /// Create a graph holding only the root clock.
    pub fn new() -> Self {
        let mut clocks = Arena::new();
        let root = clocks.insert(Clock::new(None, 0, 0));
        Self {
            nodes: Arena::new(),
            logs: Arena::new(),
            clocks,
            root,
        }
    }

    /// The root clock.
    pub fn root_clock(&self) -> ClockId {
        self.root
    }

    /// Look up a clock.
    pub fn clock(&self, clock: ClockId) -> Option<&Clock> {
        self.clocks.get(clock)
    }

    /// Look up a live node.
    pub fn node(&self, node: NodeId) -> Option<&ComputationNode> {
        self.nodes.get(node)
    }

    /// Look up an edge log.
    pub fn log(&self, log: LogId) -> Option<&EdgeLog> {
        self.logs.get(log)
    }

    /// Whether `node` has not been disposed.
    pub fn is_alive(&self, node: NodeId) -> bool {
        self.nodes.contains(node)
    }

    // ---- Clocks ----

    /// Logical time of `clock`: its subtime plus every ancestor's.
    pub fn time(&self, clock: ClockId) -> u64 {
        let mut time = 0;
        let mut cursor = Some(clock);
        while let Some(id) = cursor {
            match self.clocks.get(id) {
                Some(c) => {
                    time += c.subtime;
                    cursor = c.parent;
                }
                None => break,
            }
        }
        time
    }

    fn depth(&self, clock: ClockId) -> u32 {
        self.clocks.get(clock).map_or(0, |c| c.depth)
    }

    /// The parent of `clock`, `None` for the root.
    pub fn parent(&self, clock: ClockId) -> Option<ClockId> {
        self.clocks.get(clock).and_then(|c| c.parent)
    }

    fn lift(&self, clock: ClockId) -> ClockId {
        self.parent(clock).unwrap_or(clock)
    }

    /// Create a clock nested under `parent`.
    pub fn add_clock(&mut self, parent: ClockId) -> ClockId {
        let age = self.time(parent);
        let depth = self.depth(parent) + 1;
        self.claim_clock(parent);
        self.clocks.insert(Clock::new(Some(parent), depth, age))
    }

    /// Count a node, signal or child clock created on `clock`.
    pub fn claim_clock(&mut self, clock: ClockId) {
        if let Some(c) = self.clocks.get_mut(clock) {
            c.residents += 1;
        }
    }

    /// Free `clock` if nothing was ever created on it and nothing is queued.
    ///
    /// Returns whether the clock was freed. The root clock is never freed.
    pub fn release_clock(&mut self, clock: ClockId) -> bool {
        let Some(c) = self.clocks.get(clock) else {
            return false;
        };
        let Some(parent) = c.parent else {
            return false;
        };
        if c.residents > 0 || c.has_work() {
            return false;
        }

        self.clocks.remove(clock);
        if let Some(p) = self.clocks.get_mut(parent) {
            p.residents = p.residents.saturating_sub(1);
            p.subclocks.retain(|queued| *queued != clock);
        }
        true
    }

    pub(crate) fn set_clock_state(&mut self, clock: ClockId, state: NodeState) {
        if let Some(c) = self.clocks.get_mut(clock) {
            c.state = state;
        }
    }

    /// Advance `clock`'s subtime by one tick.
    pub fn tick(&mut self, clock: ClockId) {
        if let Some(c) = self.clocks.get_mut(clock) {
            c.subtime += 1;
        }
    }

    /// Whether `clock` has anything queued.
    pub fn has_work(&self, clock: ClockId) -> bool {
        self.clocks.get(clock).is_some_and(Clock::has_work)
    }

    /// Mark `clock` stale and register it with its ancestors.
    ///
    /// A non-root clock that was current, or whose age is behind its parent,
    /// starts a fresh batch: leftover queued work is dropped (pending changes
    /// are discarded) and the clock is queued on its parent's subclock queue.
    /// The root clock only changes state.
    pub fn mark_clock_stale(&mut self, clock: ClockId) {
        let Some(c) = self.clocks.get(clock) else {
            return;
        };
        let Some(parent) = c.parent else {
            if let Some(root) = self.clocks.get_mut(clock) {
                root.state = NodeState::Stale;
            }
            return;
        };
        let parent_time = self.time(parent);
        if c.age >= parent_time && c.state != NodeState::Current {
            return;
        }

        if let Some(c) = self.clocks.get_mut(clock) {
            c.age = parent_time;
        }
        self.mark_clock_stale(parent);
        if let Some(p) = self.clocks.get_mut(parent) {
            p.subclocks.push_back(clock);
        }
        if let Some(c) = self.clocks.get_mut(clock) {
            for change in c.reset() {
                change.discard();
            }
            c.state = NodeState::Stale;
        }
    }

    /// Prepare `clock` for an update against its parent's current time.
    ///
    /// Returns the clocks from other branches that must be brought current
    /// first. The age is stamped before those clocks are visited so mutually
    /// dependent branches do not recurse forever.
    pub(crate) fn refresh_clock(&mut self, clock: ClockId) -> SmallVec<[ClockId; 4]> {
        let Some(parent) = self.parent(clock) else {
            return SmallVec::new();
        };
        let time = self.time(parent);
        let Some(c) = self.clocks.get_mut(clock) else {
            return SmallVec::new();
        };
        if c.age >= time && c.state != NodeState::Stale {
            return SmallVec::new();
        }
        if c.age < time {
            c.state = NodeState::Current;
        }
        c.age = time;
        c.preclocks
            .as_ref()
            .map(|pre| pre.live().collect())
            .unwrap_or_default()
    }

    /// Lift reader and source clocks to where a signal access is resolved.
    pub fn align(&self, reader: ClockId, source: ClockId) -> Alignment {
        let (mut r, mut s) = (reader, source);
        while self.depth(r) > self.depth(s) {
            r = self.lift(r);
        }
        while self.depth(s) > self.depth(r) && self.parent(s) != Some(r) {
            s = self.lift(s);
        }
        if self.parent(s) != Some(r) {
            while self.parent(r) != self.parent(s) {
                r = self.lift(r);
                s = self.lift(s);
            }
        }
        let commit = if r == s { s } else { self.lift(s) };
        Alignment {
            reader: r,
            source: s,
            commit,
        }
    }

    /// Decide how a read of a computation on `source` from `reader` proceeds.
    pub fn route(&self, reader: ClockId, source: ClockId) -> ReadRoute {
        let (mut r, mut s) = (reader, source);
        while self.depth(r) > self.depth(s) + 1 {
            r = self.lift(r);
        }
        if r == s || self.parent(r) == Some(s) {
            return ReadRoute::Local {
                reader: r,
                same: r == s,
            };
        }

        if self.depth(r) > self.depth(s) {
            r = self.lift(r);
        }
        while self.depth(s) > self.depth(r) + 1 {
            s = self.lift(s);
        }
        if self.parent(s) == Some(r) {
            return ReadRoute::Foreign {
                reader: r,
                source: s,
                direct: true,
            };
        }
        if self.depth(s) > self.depth(r) {
            s = self.lift(s);
        }
        while self.parent(r) != self.parent(s) {
            r = self.lift(r);
            s = self.lift(s);
        }
        ReadRoute::Foreign {
            reader: r,
            source: s,
            direct: false,
        }
    }

    // ---- Nodes ----

    /// Create a node on `clock`, aged at the clock's current time.
    pub fn add_node(&mut self, clock: ClockId, body: Option<Body>) -> NodeId {
        let age = self.time(clock);
        self.claim_clock(clock);
        self.nodes.insert(ComputationNode::new(clock, body, age))
    }

    pub(crate) fn set_state(&mut self, node: NodeId, state: NodeState) {
        if let Some(n) = self.nodes.get_mut(node) {
            n.state = state;
        }
    }

    /// Register `child` as owned by `owner`, if the owner is still alive.
    pub fn adopt(&mut self, owner: NodeId, child: NodeId) -> bool {
        let Some(n) = self.nodes.get_mut(owner) else {
            return false;
        };
        n.owned.push(child);
        if let Some(c) = self.nodes.get_mut(child) {
            c.owner = Some(owner);
        }
        true
    }

    pub(crate) fn push_cleanup(&mut self, node: NodeId, cleanup: Cleanup) -> bool {
        match self.nodes.get_mut(node) {
            Some(n) => {
                n.cleanups.push(cleanup);
                true
            }
            None => false,
        }
    }

    /// Move a stale node into the running state and detach everything from
    /// its previous evaluation.
    ///
    /// Returns `None` when the node is dead or not stale.
    pub(crate) fn begin_update(&mut self, node: NodeId) -> Option<UpdateStart> {
        let n = self.nodes.get_mut(node)?;
        if n.state != NodeState::Stale {
            return None;
        }
        n.state = NodeState::Running;
        let start = UpdateStart {
            clock: n.clock,
            body: n.body.clone(),
            cleanups: std::mem::take(&mut n.cleanups),
            owned: std::mem::take(&mut n.owned),
        };
        self.detach_sources(node);
        Some(start)
    }

    /// Remove both halves of every edge `node` reads through, and release
    /// its cross-clock records.
    pub fn detach_sources(&mut self, node: NodeId) {
        let Some(n) = self.nodes.get_mut(node) else {
            return;
        };
        let sources: SmallVec<[(LogId, Slot); 8]> = n.sources.take_all().collect();
        let upstream = n.preclocks.as_mut().map(|pre| {
            pre.clocks.clear();
            std::mem::take(&mut pre.upstream)
        });

        for (log, slot) in sources {
            if let Some(log) = self.logs.get_mut(log) {
                log.remove(slot);
            }
        }
        for (holder, clock) in upstream.into_iter().flatten() {
            if let Some(pre) = self.clocks.get_mut(holder).and_then(|c| c.preclocks.as_mut()) {
                pre.release(clock);
            }
        }
    }

    /// Remove `node` from the graph.
    ///
    /// Its output log is freed and its own edges detached. The removed node
    /// is returned so the caller can run its cleanups and dispose its owned
    /// children outside any borrow of the graph.
    pub(crate) fn remove_node(&mut self, node: NodeId) -> Option<ComputationNode> {
        self.detach_sources(node);
        let removed = self.nodes.remove(node)?;
        if let Some(log) = removed.log {
            self.logs.remove(log);
        }
        if let Some(owner) = removed.owner.and_then(|o| self.nodes.get_mut(o)) {
            if let Some(at) = owner.owned.iter().position(|child| *child == node) {
                owner.owned.remove(at);
            }
        }
        Some(removed)
    }

    /// Remove a bare scope node that owns nothing and has no cleanups.
    ///
    /// Returns whether the node was removed.
    pub(crate) fn release_scope(&mut self, node: NodeId) -> bool {
        match self.nodes.get(node) {
            Some(n) if n.is_root() && n.owned.is_empty() && n.cleanups.is_empty() => {}
            _ => return false,
        }
        self.remove_node(node).is_some()
    }

    /// Stamp every owned descendant current at its clock's time so pending
    /// updates skip them; they are about to be disposed.
    fn mark_owned_current(&mut self, owner: NodeId) {
        let owned = match self.nodes.get(owner) {
            Some(n) if !n.owned.is_empty() => n.owned.clone(),
            _ => return,
        };
        for child in owned {
            let Some(clock) = self.nodes.get(child).map(|n| n.clock) else {
                continue;
            };
            let time = self.time(clock);
            if let Some(n) = self.nodes.get_mut(child) {
                n.age = time;
                n.state = NodeState::Current;
            }
            self.mark_owned_current(child);
        }
    }

    /// Mark `node` stale if it has not already been marked at its clock's
    /// current time, then mark its readers.
    pub fn mark_node_stale(&mut self, node: NodeId) {
        let Some((clock, age)) = self.nodes.get(node).map(|n| (n.clock, n.age)) else {
            return;
        };
        let time = self.time(clock);
        if age >= time {
            return;
        }

        self.mark_clock_stale(clock);
        let log = match self.nodes.get_mut(node) {
            Some(n) => {
                n.age = time;
                n.state = NodeState::Stale;
                n.log
            }
            None => return,
        };
        if let Some(c) = self.clocks.get_mut(clock) {
            c.updates.push_back(node);
        }
        self.mark_owned_current(node);
        if let Some(log) = log {
            self.mark_log_stale(log);
        }
    }

    /// Mark every reader in `log` stale, compacting the log on the way.
    pub fn mark_log_stale(&mut self, log: LogId) {
        let Some(edges) = self.logs.get_mut(log) else {
            return;
        };
        let nodes = &mut self.nodes;
        edges.compact(|reader, reader_slot, slot| {
            if let Some(n) = nodes.get_mut(reader) {
                n.sources.set_log_slot(reader_slot, slot);
            }
        });
        let readers: SmallVec<[NodeId; 8]> = edges.readers().collect();
        for reader in readers {
            self.mark_node_stale(reader);
        }
    }

    // ---- Edges ----

    /// Allocate an empty edge log.
    pub fn add_log(&mut self) -> LogId {
        self.logs.insert(EdgeLog::new())
    }

    /// Free an edge log whose source is gone.
    pub fn release_log(&mut self, log: LogId) {
        self.logs.remove(log);
    }

    /// Record that `reader` read the source behind `log`.
    pub fn log_read(&mut self, log: LogId, reader: NodeId) {
        let Some(n) = self.nodes.get_mut(reader) else {
            return;
        };
        let Some(edges) = self.logs.get_mut(log) else {
            return;
        };
        let reader_slot = n.sources.next_slot();
        let log_slot = edges.insert(reader, reader_slot);
        n.sources.push(log, log_slot);
    }

    /// The output log of `node`, created on first use.
    pub fn node_log(&mut self, node: NodeId) -> Option<LogId> {
        let existing = self.nodes.get(node)?.log;
        if existing.is_some() {
            return existing;
        }
        let log = self.logs.insert(EdgeLog::new());
        if let Some(n) = self.nodes.get_mut(node) {
            n.log = Some(log);
        }
        Some(log)
    }

    /// Number of readers recorded in `log`.
    pub fn reader_count(&self, log: LogId) -> usize {
        self.logs.get(log).map_or(0, EdgeLog::reader_count)
    }

    // ---- Cross-clock records ----

    /// Record that `reader` read a value owned by `clock`, a child of the
    /// reader's own clock.
    pub fn log_node_preclock(&mut self, clock: ClockId, reader: NodeId) {
        let Some(n) = self.nodes.get_mut(reader) else {
            return;
        };
        let age = n.age;
        let pre = n.preclocks.get_or_insert_with(NodePreClocks::default);
        if pre.ages.get(&clock) == Some(&age) {
            return;
        }
        pre.ages.insert(clock, age);
        pre.clocks.push(clock);
    }

    /// Record that `reader`, running under `holder`, read a value owned by
    /// `clock` in a sibling branch.
    pub fn log_clock_preclock(&mut self, clock: ClockId, holder: ClockId, reader: NodeId) {
        let Some(n) = self.nodes.get_mut(reader) else {
            return;
        };
        let age = n.age;
        let pre = n.preclocks.get_or_insert_with(NodePreClocks::default);
        if pre.ages.get(&clock) == Some(&age) {
            return;
        }
        pre.ages.insert(clock, age);
        pre.upstream.push((holder, clock));

        if let Some(h) = self.clocks.get_mut(holder) {
            h.preclocks
                .get_or_insert_with(ClockPreClocks::default)
                .retain(clock);
        }
    }

    /// Record the cross-clock part of a signal read.
    pub fn log_signal_preclock(&mut self, aligned: Alignment, reader: NodeId) {
        if self.parent(aligned.source) == Some(aligned.reader) {
            self.log_node_preclock(aligned.source, reader);
        } else if aligned.source != aligned.reader {
            self.log_clock_preclock(aligned.source, aligned.reader, reader);
        }
    }

    // ---- Queues ----

    /// Queue a pending change on `clock`.
    pub fn enqueue_change(&mut self, clock: ClockId, change: Rc<dyn PendingChange>) {
        if let Some(c) = self.clocks.get_mut(clock) {
            c.changes.push_back(change);
        }
    }

    /// Queue `node` for disposal at the end of `clock`'s current frame.
    pub fn enqueue_dispose(&mut self, clock: ClockId, node: NodeId) {
        if let Some(c) = self.clocks.get_mut(clock) {
            c.disposes.push_back(node);
        }
    }

    pub(crate) fn pop_change(&mut self, clock: ClockId) -> Option<Rc<dyn PendingChange>> {
        self.clocks.get_mut(clock)?.changes.pop_front()
    }

    pub(crate) fn pop_subclock(&mut self, clock: ClockId) -> Option<ClockId> {
        self.clocks.get_mut(clock)?.subclocks.pop_front()
    }

    pub(crate) fn pop_update(&mut self, clock: ClockId) -> Option<NodeId> {
        self.clocks.get_mut(clock)?.updates.pop_front()
    }

    pub(crate) fn pop_dispose(&mut self, clock: ClockId) -> Option<NodeId> {
        self.clocks.get_mut(clock)?.disposes.pop_front()
    }

    /// Forget queued subclock and update entries on the root before a new
    /// top-level pass.
    pub(crate) fn clear_root_pass(&mut self) {
        if let Some(root) = self.clocks.get_mut(self.root) {
            root.subclocks.clear();
            root.updates.clear();
        }
    }

    /// Drop everything queued on the root, handing back pending changes.
    pub(crate) fn reset_root(&mut self) -> Vec<Rc<dyn PendingChange>> {
        let root = self.root;
        self.clocks.get_mut(root).map(Clock::reset).unwrap_or_default()
    }

    /// Put the graph back into a consistent resting state after a failed
    /// pass.
    ///
    /// All queues are emptied, clocks and running nodes return to current.
    /// The dropped pending changes are handed back for discarding.
    pub(crate) fn recover(&mut self) -> Vec<Rc<dyn PendingChange>> {
        let root = self.root;
        let mut dropped = Vec::new();
        for (id, clock) in self.clocks.iter_mut() {
            dropped.extend(clock.reset());
            clock.disposes.clear();
            if id != root {
                clock.state = NodeState::Current;
            }
        }
        for (_, node) in self.nodes.iter_mut() {
            if node.state == NodeState::Running {
                node.state = NodeState::Current;
            }
        }
        dropped
    }

    /// Summarise the graph.
    pub fn stats(&self) -> GraphStats {
        let edges = self.logs.iter().map(|(_, log)| log.reader_count()).sum();
        GraphStats {
            nodes: self.nodes.len(),
            logs: self.logs.len(),
            clocks: self.clocks.len(),
            edges,
            root_time: self.time(self.root),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subclock_time_includes_ancestors() {
        let mut s = Scheduler::new();
        let root = s.root_clock();
        let child = s.add_clock(root);
        let grandchild = s.add_clock(child);

        s.tick(root);
        s.tick(child);
        s.tick(child);
        s.tick(grandchild);

        assert_eq!(s.time(root), 1);
        assert_eq!(s.time(child), 3);
        assert_eq!(s.time(grandchild), 4);
        assert_eq!(s.clock(grandchild).map(Clock::depth), Some(2));
    }

    #[test]
    fn marking_is_transitive_and_idempotent() {
        let mut s = Scheduler::new();
        let root = s.root_clock();
        let signal_log = s.add_log();
        let a = s.add_node(root, None);
        let b = s.add_node(root, None);

        // signal -> a -> b
        s.log_read(signal_log, a);
        let a_log = s.node_log(a).unwrap();
        s.log_read(a_log, b);

        s.tick(root);
        s.mark_log_stale(signal_log);
        s.mark_log_stale(signal_log);

        assert_eq!(s.node(a).unwrap().state(), NodeState::Stale);
        assert_eq!(s.node(b).unwrap().state(), NodeState::Stale);
        assert_eq!(s.node(b).unwrap().age(), 1);
        assert_eq!(s.pop_update(root), Some(a));
        assert_eq!(s.pop_update(root), Some(b));
        assert_eq!(s.pop_update(root), None);
    }

    #[test]
    fn owned_children_are_stamped_current() {
        let mut s = Scheduler::new();
        let root = s.root_clock();
        let log = s.add_log();
        let parent = s.add_node(root, None);
        let child = s.add_node(root, None);
        s.adopt(parent, child);
        s.log_read(log, parent);
        s.log_read(log, child);

        s.tick(root);
        s.mark_log_stale(log);

        // The child was reached through the same log but its parent got there
        // first, so it is left for disposal instead of re-evaluation.
        assert_eq!(s.node(parent).unwrap().state(), NodeState::Stale);
        assert_eq!(s.node(child).unwrap().state(), NodeState::Current);
        assert_eq!(s.node(child).unwrap().age(), 1);
    }

    #[test]
    fn detaching_frees_both_halves() {
        let mut s = Scheduler::new();
        let root = s.root_clock();
        let log = s.add_log();
        let a = s.add_node(root, None);
        let b = s.add_node(root, None);
        s.log_read(log, a);
        s.log_read(log, b);
        assert_eq!(s.reader_count(log), 2);

        s.detach_sources(a);
        assert_eq!(s.reader_count(log), 1);
        assert_eq!(s.node(a).unwrap().source_count(), 0);

        let removed = s.remove_node(b);
        assert!(removed.is_some());
        assert_eq!(s.reader_count(log), 0);
        assert!(!s.is_alive(b));
    }

    #[test]
    fn stale_subclock_registers_with_parent() {
        let mut s = Scheduler::new();
        let root = s.root_clock();
        let child = s.add_clock(root);

        s.mark_clock_stale(child);
        assert_eq!(s.clock(child).unwrap().state(), NodeState::Stale);
        assert_eq!(s.clock(root).unwrap().state(), NodeState::Stale);
        assert_eq!(s.pop_subclock(root), Some(child));

        // Already stale at this parent time: no second registration.
        s.mark_clock_stale(child);
        assert_eq!(s.pop_subclock(root), None);
    }

    #[test]
    fn align_and_route_between_branches() {
        let mut s = Scheduler::new();
        let root = s.root_clock();
        let left = s.add_clock(root);
        let right = s.add_clock(root);
        let deep = s.add_clock(left);

        let same = s.align(left, left);
        assert_eq!((same.reader, same.source, same.commit), (left, left, left));

        // Parent reading a child's signal forces the child and commits on
        // the parent.
        let down = s.align(root, left);
        assert_eq!((down.reader, down.source, down.commit), (root, left, root));

        let across = s.align(deep, right);
        assert_eq!((across.reader, across.source), (left, right));

        assert_eq!(
            s.route(deep, left),
            ReadRoute::Local {
                reader: deep,
                same: false
            }
        );
        assert_eq!(
            s.route(root, left),
            ReadRoute::Foreign {
                reader: root,
                source: left,
                direct: true
            }
        );
        assert_eq!(
            s.route(deep, right),
            ReadRoute::Foreign {
                reader: left,
                source: right,
                direct: false
            }
        );
    }

    #[test]
    fn clock_preclocks_follow_reader_lifetime() {
        let mut s = Scheduler::new();
        let root = s.root_clock();
        let left = s.add_clock(root);
        let right = s.add_clock(root);
        let reader = s.add_node(left, None);

        s.log_clock_preclock(right, left, reader);
        s.log_clock_preclock(right, left, reader);
        assert_eq!(s.clock(left).unwrap().preclocks.as_ref().unwrap().count(right), 1);

        s.tick(root);
        assert_eq!(s.refresh_clock(left).as_slice(), &[right]);

        s.detach_sources(reader);
        assert_eq!(s.clock(left).unwrap().preclocks.as_ref().unwrap().count(right), 0);
    }

    #[test]
    fn disposed_child_leaves_owner_list() {
        let mut s = Scheduler::new();
        let root = s.root_clock();
        let scope = s.add_node(root, None);
        let first = s.add_node(root, None);
        let second = s.add_node(root, None);
        s.adopt(scope, first);
        s.adopt(scope, second);
        assert_eq!(s.node(second).unwrap().owner(), Some(scope));

        s.remove_node(first);
        assert_eq!(s.node(scope).unwrap().owned(), &[second]);

        // The scope still owns something, so it is kept.
        assert!(!s.release_scope(scope));
        s.remove_node(second);
        assert!(s.release_scope(scope));
        assert!(!s.is_alive(scope));
    }

    #[test]
    fn empty_clocks_are_released() {
        let mut s = Scheduler::new();
        let root = s.root_clock();
        let outer = s.add_clock(root);
        let inner = s.add_clock(outer);

        // `outer` has a child clock, `inner` has nothing.
        assert!(!s.release_clock(outer));
        assert!(s.release_clock(inner));
        assert!(s.release_clock(outer));
        assert!(!s.release_clock(root));
        assert_eq!(s.stats().clocks, 1);

        let busy = s.add_clock(root);
        s.add_node(busy, None);
        assert!(!s.release_clock(busy));
    }

    #[test]
    fn stats_count_live_entries() {
        let mut s = Scheduler::new();
        let root = s.root_clock();
        let log = s.add_log();
        let a = s.add_node(root, None);
        s.log_read(log, a);
        s.add_clock(root);

        let stats = s.stats();
        assert_eq!(stats.nodes, 1);
        assert_eq!(stats.logs, 1);
        assert_eq!(stats.clocks, 2);
        assert_eq!(stats.edges, 1);
        assert_eq!(stats.root_time, 0);
    }
}
