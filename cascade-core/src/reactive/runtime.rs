//! Reactive Runtime
//!
//! The runtime is the per-thread coordinator that connects signals and
//! computations to the graph. It owns the [`Scheduler`], the execution
//! context, the failure slot and the engine configuration.
//!
//! # How It Works
//!
//! 1. A write outside any batch commits through a one-shot top-level pass:
//!    the root clock ticks and runs until its queues are empty.
//!
//! 2. Running a clock drains frames. Changes commit and mark their readers
//!    stale, stale subclocks are brought current, stale computations are
//!    re-evaluated, and queued disposals run.
//!
//! 3. Reads made while a computation runs record edges. A read of a stale
//!    computation on the same clock updates it first, so every reader sees a
//!    consistent snapshot.
//!
//! # Borrowing Discipline
//!
//! The scheduler sits in a `RefCell`. It is borrowed only for short graph
//! operations and never while user code (bodies, cleanups) runs, so user
//! code is free to read, write and create computations.
//!
//! # Failures
//!
//! A failure found deep inside a batch (a cycle, a runaway clock) is recorded
//! in the failure slot and propagated as `Err` up to the outermost entry
//! point. That entry point discards every queued change, returns clocks and
//! running nodes to rest and hands the error to its caller. The same reset
//! runs from a drop guard when user code panics.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::graph::{
    Alignment, Body, Cleanup, ClockId, LogId, NodeId, NodeState, PendingChange, ReadRoute, Scheduler,
};

use super::context::{forget_running, Context, ContextGuard, Owner};

/// Per-thread engine state.
pub(crate) struct Runtime {
    scheduler: RefCell<Scheduler>,
    pub(crate) context: Cell<Context>,
    failure: RefCell<Option<Error>>,
    orphans: RefCell<Vec<LogId>>,
    config: Cell<EngineConfig>,
}

impl Runtime {
    fn new() -> Self {
        Self {
            scheduler: RefCell::new(Scheduler::new()),
            context: Cell::new(Context::default()),
            failure: RefCell::new(None),
            orphans: RefCell::new(Vec::new()),
            config: Cell::new(EngineConfig::default()),
        }
    }

    pub(crate) fn set_config(&self, config: EngineConfig) {
        self.config.set(config);
    }

    pub(crate) fn config(&self) -> EngineConfig {
        self.config.get()
    }
}

thread_local! {
    static RUNTIME: Runtime = Runtime::new();
}

/// Run `f` against this thread's runtime.
pub(crate) fn with_runtime<R>(f: impl FnOnce(&Runtime) -> R) -> R {
    RUNTIME.with(f)
}

/// Like [`with_runtime`], but tolerates a runtime that is being torn down.
pub(crate) fn try_with_runtime<R>(f: impl FnOnce(&Runtime) -> R) -> Option<R> {
    RUNTIME.try_with(f).ok()
}

/// Borrow the graph for one short operation.
pub(crate) fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    with_runtime(|rt| f(&mut rt.scheduler.borrow_mut()))
}

/// The root clock of this thread's graph.
pub(crate) fn root_clock() -> ClockId {
    with_scheduler(|s| s.root_clock())
}

// ---- Failure slot ----

/// Record `err` as the failure of the batch in flight. The first failure
/// wins.
pub(crate) fn fail(err: Error) {
    with_runtime(|rt| {
        let mut slot = rt.failure.borrow_mut();
        if slot.is_none() {
            *slot = Some(err);
        }
    });
}

/// Return the recorded failure, if any, leaving it in place.
pub(crate) fn check() -> Result<()> {
    with_runtime(|rt| match rt.failure.borrow().as_ref() {
        Some(err) => Err(err.clone()),
        None => Ok(()),
    })
}

fn take_failure() -> Option<Error> {
    with_runtime(|rt| rt.failure.borrow_mut().take())
}

/// Queue the edge log of a dropped signal for release.
pub(crate) fn orphan_log(log: LogId) {
    let _ = try_with_runtime(|rt| {
        if let Ok(mut orphans) = rt.orphans.try_borrow_mut() {
            orphans.push(log);
        }
    });
}

fn release_orphans() {
    let orphans = with_runtime(|rt| std::mem::take(&mut *rt.orphans.borrow_mut()));
    if orphans.is_empty() {
        return;
    }
    with_scheduler(|s| {
        for log in orphans {
            s.release_log(log);
        }
    });
}

fn discard_all(changes: Vec<Rc<dyn PendingChange>>) {
    for change in changes {
        change.discard();
    }
}

// ---- Top-level passes ----

/// Resets the graph if a top-level pass is left without completing.
struct RecoveryGuard {
    armed: bool,
}

impl Drop for RecoveryGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let dropped = try_with_runtime(|rt| match rt.scheduler.try_borrow_mut() {
            Ok(mut scheduler) => scheduler.recover(),
            Err(_) => Vec::new(),
        })
        .unwrap_or_default();
        debug!(discarded = dropped.len(), "top-level pass failed; discarding pending changes");
        discard_all(dropped);
    }
}

/// Run one top-level pass.
///
/// On failure or panic the graph is put back to rest and the recorded
/// failure is returned.
pub(crate) fn settle<R>(pass: impl FnOnce() -> Result<R>) -> Result<R> {
    let mut guard = RecoveryGuard { armed: true };
    let result = pass().and_then(|value| check().map(|()| value));
    match result {
        Ok(value) => {
            guard.armed = false;
            release_orphans();
            Ok(value)
        }
        Err(err) => {
            drop(guard);
            Err(take_failure().unwrap_or(err))
        }
    }
}

/// Commit the changes queued on the root clock.
pub(crate) fn event() -> Result<()> {
    settle(|| {
        let root = with_scheduler(|s| {
            s.clear_root_pass();
            let root = s.root_clock();
            s.tick(root);
            root
        });
        run(root)
    })
}

/// Evaluate a new computation for the first time outside any batch, then
/// settle whatever it queued.
pub(crate) fn toplevel_computation(node: NodeId, body: &Body) -> Result<()> {
    settle(|| {
        let root = root_clock();
        discard_all(with_scheduler(|s| s.reset_root()));

        {
            let _ctx = ContextGuard::enter(Context {
                running: Some(node),
                clock: Some(root),
                owner: Some(Owner::Node(node)),
            });
            call_body(node, body)?;
        }
        with_scheduler(|s| s.set_state(node, NodeState::Current));
        check()?;

        if with_scheduler(|s| s.has_work(root)) {
            with_scheduler(|s| s.tick(root));
            run(root)?;
        }
        Ok(())
    })
}

/// Evaluate a new computation for the first time inside a batch.
pub(crate) fn inline_computation(node: NodeId, clock: ClockId, body: &Body) -> Result<()> {
    {
        let _ctx = ContextGuard::enter(Context {
            running: Some(node),
            clock: Some(clock),
            owner: Some(Owner::Node(node)),
        });
        call_body(node, body)?;
    }
    with_scheduler(|s| s.set_state(node, NodeState::Current));
    check()
}

// ---- Clocks ----

/// Drain `clock` frame by frame until its queues are empty.
pub(crate) fn run(clock: ClockId) -> Result<()> {
    let _ctx = ContextGuard::enter(Context {
        clock: Some(clock),
        ..Context::current()
    });
    let max_frames = with_runtime(|rt| rt.config().max_frames);
    let mut frames = 0usize;

    while with_scheduler(|s| s.has_work(clock)) {
        if frames >= max_frames {
            warn!(?clock, frames, "runaway clock: work still queued at the frame ceiling");
            let err = Error::RunawayClock { frames };
            fail(err.clone());
            return Err(err);
        }
        // The first frame keeps the time its updates were scheduled at.
        if frames > 0 {
            with_scheduler(|s| s.tick(clock));
        }
        trace!(?clock, frame = frames, "draining frame");

        while let Some(change) = with_scheduler(|s| s.pop_change(clock)) {
            if let Some(log) = change.commit() {
                with_scheduler(|s| s.mark_log_stale(log));
            }
        }
        while let Some(subclock) = with_scheduler(|s| s.pop_subclock(clock)) {
            update_clock(subclock)?;
        }
        while let Some(node) = with_scheduler(|s| s.pop_update(clock)) {
            update_node(node)?;
        }
        while let Some(node) = with_scheduler(|s| s.pop_dispose(clock)) {
            dispose(node);
        }

        frames += 1;
    }
    Ok(())
}

/// Bring `clock` up to date with its parent's current time.
pub(crate) fn update_clock(clock: ClockId) -> Result<()> {
    let preclocks = with_scheduler(|s| s.refresh_clock(clock));
    for preclock in preclocks {
        update_clock(preclock)?;
    }

    let state = with_scheduler(|s| s.clock(clock).map(|c| c.state()));
    match state {
        Some(NodeState::Running) => {
            warn!(?clock, "circular clock dependency");
            fail(Error::CircularClock);
            Err(Error::CircularClock)
        }
        Some(NodeState::Stale) => {
            with_scheduler(|s| s.set_clock_state(clock, NodeState::Running));
            run(clock)?;
            with_scheduler(|s| s.set_clock_state(clock, NodeState::Current));
            Ok(())
        }
        _ => Ok(()),
    }
}

// ---- Nodes ----

/// Re-evaluate `node` if it is stale.
pub(crate) fn update_node(node: NodeId) -> Result<()> {
    let Some(start) = with_scheduler(|s| s.begin_update(node)) else {
        return Ok(());
    };
    let _ctx = ContextGuard::enter(Context {
        running: Some(node),
        clock: Some(start.clock),
        owner: Some(Owner::Node(node)),
    });

    run_cleanups(start.cleanups, false);
    for child in start.owned {
        dispose(child);
    }
    if let Some(body) = start.body {
        call_body(node, &body)?;
    }

    with_scheduler(|s| {
        if s.node(node).is_some_and(|n| n.state() == NodeState::Running) {
            s.set_state(node, NodeState::Current);
        }
    });
    check()
}

fn call_body(node: NodeId, body: &Body) -> Result<()> {
    match body.try_borrow_mut() {
        Ok(mut f) => {
            (&mut *f)();
            Ok(())
        }
        Err(_) => {
            warn!(?node, "circular dependency: body re-entered");
            fail(Error::CircularDependency);
            Err(Error::CircularDependency)
        }
    }
}

/// Run cleanup callbacks with no running computation.
fn run_cleanups(cleanups: Vec<Cleanup>, last: bool) {
    if cleanups.is_empty() {
        return;
    }
    let _ctx = ContextGuard::enter(Context {
        running: None,
        ..Context::current()
    });
    for cleanup in cleanups {
        cleanup(last);
    }
}

/// Remove `node` and everything it owns from the graph.
pub(crate) fn dispose(node: NodeId) {
    let Some(mut removed) = with_scheduler(|s| s.remove_node(node)) else {
        return;
    };
    trace!(?node, "disposing computation");
    forget_running(node);

    run_cleanups(std::mem::take(&mut removed.cleanups), true);
    for child in std::mem::take(&mut removed.owned) {
        dispose(child);
    }
    drop(removed);
}

/// Dispose `node` now, or at the end of the current frame if a batch is in
/// flight.
pub(crate) fn dispose_or_defer(node: NodeId) {
    if !Context::current().is_batching() {
        dispose(node);
        return;
    }
    with_scheduler(|s| {
        if let Some(clock) = s.node(node).map(|n| n.clock()) {
            s.mark_clock_stale(clock);
            s.enqueue_dispose(clock, node);
        }
    });
}

// ---- Reads ----

/// Resolve a signal access from the running clock, bringing the signal's
/// clock current first when it sits in another branch.
pub(crate) fn align_signal(reader: ClockId, source: ClockId) -> Result<Alignment> {
    let aligned = with_scheduler(|s| s.align(reader, source));
    if aligned.reader != aligned.source {
        update_clock(aligned.source)?;
    }
    Ok(aligned)
}

/// Track a read of the signal whose log lives in `log` and whose clock is
/// `source`.
pub(crate) fn track_signal(log: &Cell<Option<LogId>>, source: ClockId) -> Result<()> {
    let context = Context::current();
    let Some(reader_clock) = context.clock else {
        return Ok(());
    };
    let aligned = align_signal(reader_clock, source)?;

    if let Some(reader) = context.running {
        let id = match log.get() {
            Some(id) => id,
            None => {
                let id = with_scheduler(|s| s.add_log());
                log.set(Some(id));
                id
            }
        };
        with_scheduler(|s| {
            s.log_read(id, reader);
            s.log_signal_preclock(aligned, reader);
        });
    }
    Ok(())
}

/// Track a read of computation `node`, updating it first if it is stale on
/// the reader's side of the clock tree.
pub(crate) fn track_computation(node: NodeId) -> Result<()> {
    let context = Context::current();
    let (Some(reader), Some(reader_clock)) = (context.running, context.clock) else {
        return Ok(());
    };
    let Some(source_clock) = with_scheduler(|s| s.node(node).map(|n| n.clock())) else {
        return Ok(());
    };

    match with_scheduler(|s| s.route(reader_clock, source_clock)) {
        ReadRoute::Local { reader: holder, same } => {
            let preclocks = with_scheduler(|s| s.node(node).map(|n| n.preclock_list()).unwrap_or_default());
            for preclock in preclocks {
                update_clock(preclock)?;
            }

            let status = with_scheduler(|s| {
                s.node(node)
                    .map(|n| (n.age() == s.time(n.clock()), n.state()))
            });
            match status {
                Some((true, NodeState::Running)) => {
                    warn!(?node, "circular dependency");
                    fail(Error::CircularDependency);
                    return Err(Error::CircularDependency);
                }
                Some((true, _)) => update_node(node)?,
                _ => {}
            }

            with_scheduler(|s| {
                let preclocks: SmallVec<[ClockId; 2]> =
                    s.node(node).map(|n| n.preclock_list()).unwrap_or_default();
                for preclock in preclocks {
                    if same {
                        s.log_node_preclock(preclock, reader);
                    } else {
                        s.log_clock_preclock(preclock, holder, reader);
                    }
                }
            });
        }
        ReadRoute::Foreign {
            reader: holder,
            source,
            direct,
        } => {
            with_scheduler(|s| {
                if direct {
                    s.log_node_preclock(source, reader);
                } else {
                    s.log_clock_preclock(source, holder, reader);
                }
            });
            update_clock(source)?;
        }
    }

    with_scheduler(|s| {
        if let Some(log) = s.node_log(node) {
            s.log_read(log, reader);
        }
    });
    Ok(())
}
