//! Scopes and Batches
//!
//! Helpers that change the ambient context for the duration of a closure:
//!
//! - [`root`] opens an ownership scope that outlives any computation and is
//!   torn down by an explicit [`Root::dispose`], or on return if it is empty
//!   and unreachable.
//! - [`unowned`] creates computations that no owner will dispose.
//! - [`sample`] reads without recording dependencies.
//! - [`freeze`] batches every write made by the closure into one frame.
//! - [`Subclock`] is a nested batching domain whose time advances only when
//!   it is driven through [`Subclock::run`].
//! - [`cleanup`] registers a callback on the current owner.

use std::fmt;
use std::rc::Rc;

use tracing::trace;

use crate::error::{Error, Result};
use crate::graph::{ClockId, GraphStats, NodeId, NodeState};

use super::context::{Context, ContextGuard, Owner};
use super::runtime::{
    check, dispose_or_defer, fail, root_clock, run, settle, with_scheduler,
};

/// A detached ownership scope.
///
/// Computations created inside [`root`] (or inside [`Root::run`]) are owned
/// by the root and disposed with it. A root whose handle is dropped before
/// [`root`] returns, and which owns nothing, is removed right away.
#[derive(Clone)]
pub struct Root {
    node: NodeId,
    _handle: Rc<()>,
}

impl Root {
    /// Dispose every computation owned by this root and run its cleanups.
    ///
    /// While a batch is running the teardown is deferred to the end of the
    /// current frame.
    pub fn dispose(&self) {
        dispose_or_defer(self.node);
    }

    /// Run `f` with this root as the owner of new computations.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        let _ctx = ContextGuard::enter(Context {
            owner: Some(Owner::Node(self.node)),
            ..Context::current()
        });
        f()
    }

    /// Whether this root has been disposed.
    pub fn is_disposed(&self) -> bool {
        !with_scheduler(|s| s.is_alive(self.node))
    }
}

impl PartialEq for Root {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl Eq for Root {}

impl fmt::Debug for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Root").field("node", &self.node).finish()
    }
}

/// Open a new ownership scope and run `body` inside it.
pub fn root<R>(body: impl FnOnce(Root) -> R) -> R {
    let context = Context::current();
    let clock = context.clock.unwrap_or_else(root_clock);
    let node = with_scheduler(|s| s.add_node(clock, None));
    let handle = Rc::new(());
    let value = {
        let _ctx = ContextGuard::enter(Context {
            owner: Some(Owner::Node(node)),
            ..context
        });
        body(Root {
            node,
            _handle: Rc::clone(&handle),
        })
    };

    // No handle escaped, so nothing can re-enter or dispose this scope.
    if Rc::strong_count(&handle) == 1 && with_scheduler(|s| s.release_scope(node)) {
        trace!(?node, "released empty root");
    }
    value
}

/// Run `f` so that computations it creates have no owner.
pub fn unowned<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ContextGuard::enter(Context {
        owner: Some(Owner::Unowned),
        ..Context::current()
    });
    f()
}

/// Run `f` without recording any reads as dependencies.
pub fn sample<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ContextGuard::enter(Context {
        running: None,
        ..Context::current()
    });
    f()
}

/// Register `f` to run before the current owner re-evaluates (`false`) or
/// when it is disposed (`true`).
pub fn cleanup(f: impl FnOnce(bool) + 'static) -> Result<()> {
    let context = Context::current();
    let registered = match context.owner {
        Some(Owner::Node(node)) => with_scheduler(|s| s.push_cleanup(node, Box::new(f))),
        _ => false,
    };
    if registered {
        return Ok(());
    }
    if context.is_batching() {
        fail(Error::CleanupOutsideComputation);
    }
    Err(Error::CleanupOutsideComputation)
}

/// Run `f` with every write it makes batched into a single frame.
///
/// Nested inside another batch, `f` simply joins it.
pub fn freeze<R>(f: impl FnOnce() -> R) -> Result<R> {
    let context = Context::current();
    if context.is_batching() {
        let value = f();
        check()?;
        return Ok(value);
    }

    settle(|| {
        let root = with_scheduler(|s| {
            let root = s.root_clock();
            s.reset_root()
                .into_iter()
                .for_each(|change| change.discard());
            root
        });
        let value = {
            let _ctx = ContextGuard::enter(Context {
                clock: Some(root),
                ..context
            });
            f()
        };
        check()?;

        with_scheduler(|s| {
            s.clear_root_pass();
            s.tick(root);
        });
        run(root)?;
        Ok(value)
    })
}

/// A nested batching domain.
///
/// Writes made inside [`Subclock::run`] are settled before it returns
/// without advancing the enclosing clock's time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subclock {
    clock: ClockId,
}

impl Subclock {
    /// Create a subclock nested under the running clock, or under the root.
    pub fn new() -> Self {
        let parent = Context::current().clock.unwrap_or_else(root_clock);
        let clock = with_scheduler(|s| s.add_clock(parent));
        Self { clock }
    }

    /// Run `f` on this clock, then drain everything it queued.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        let context = Context::current();
        if context.is_batching() {
            return self.invoke(context, f);
        }

        settle(|| {
            let value = self.invoke(context, f)?;
            // Writes aimed at the root clock settle before returning.
            let root = with_scheduler(|s| {
                let root = s.root_clock();
                let pending = s
                    .clock(root)
                    .is_some_and(|c| !c.changes.is_empty() || !c.updates.is_empty() || !c.disposes.is_empty());
                if pending {
                    s.tick(root);
                } else {
                    s.clear_root_pass();
                }
                pending.then_some(root)
            });
            if let Some(root) = root {
                trace!("flushing root after subclock run");
                run(root)?;
            }
            Ok(value)
        })
    }

    fn invoke<R>(&self, context: Context, f: impl FnOnce() -> R) -> Result<R> {
        with_scheduler(|s| s.set_clock_state(self.clock, NodeState::Stale));
        let value = {
            let _ctx = ContextGuard::enter(Context {
                clock: Some(self.clock),
                ..context
            });
            f()
        };
        check()?;

        with_scheduler(|s| {
            s.tick(self.clock);
            s.set_clock_state(self.clock, NodeState::Running);
        });
        run(self.clock)?;
        with_scheduler(|s| s.set_clock_state(self.clock, NodeState::Current));
        Ok(value)
    }

    /// Logical time of this clock.
    pub fn time(&self) -> u64 {
        with_scheduler(|s| s.time(self.clock))
    }

    /// The clock behind this handle.
    pub fn clock(&self) -> ClockId {
        self.clock
    }
}

impl Default for Subclock {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `f` on a fresh subclock.
///
/// The clock is freed afterwards unless a signal, computation or nested
/// clock was created on it.
pub fn subclock<R>(f: impl FnOnce() -> R) -> Result<R> {
    let clock = Subclock::new();
    let result = clock.run(f);
    with_scheduler(|s| s.release_clock(clock.clock));
    result
}

/// Logical time of the running clock, or of the root clock outside any
/// batch.
pub fn current_time() -> u64 {
    let clock = Context::current().clock;
    with_scheduler(|s| s.time(clock.unwrap_or_else(|| s.root_clock())))
}

/// A snapshot of this thread's graph.
pub fn stats() -> GraphStats {
    with_scheduler(|s| s.stats())
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Computation, Signal};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn sample_does_not_track() {
        let source = Signal::new(1);
        let s = source.clone();
        let c = root(|_| Computation::new(move |_| sample(|| s.get()))).unwrap();

        assert_eq!(source.reader_count(), 0);
        source.set(2).unwrap();
        assert_eq!(c.get(), 1);
    }

    #[test]
    fn cleanup_at_top_level_fails() {
        assert_eq!(cleanup(|_| {}), Err(Error::CleanupOutsideComputation));
        assert_eq!(
            unowned(|| cleanup(|_| {})),
            Err(Error::CleanupOutsideComputation)
        );
    }

    #[test]
    fn root_cleanups_run_on_dispose() {
        let finals = Rc::new(Cell::new(0));
        let f = finals.clone();
        let handle = root(|r| {
            cleanup(move |last| {
                if last {
                    f.set(f.get() + 1);
                }
            })
            .unwrap();
            r
        });

        assert_eq!(finals.get(), 0);
        handle.dispose();
        assert!(handle.is_disposed());
        assert_eq!(finals.get(), 1);
    }

    #[test]
    fn root_run_reenters_as_owner() {
        let source = Signal::new(1);
        let s = source.clone();
        let scope = root(|r| r);
        let c = scope.run(|| Computation::new(move |_| s.get())).unwrap();

        scope.dispose();
        assert!(c.is_disposed());
    }

    #[test]
    fn freeze_nested_joins_outer_batch() {
        let source = Signal::new(0);
        let outer = freeze(|| {
            let inner = freeze(|| source.set(1));
            assert!(source.is_pending());
            inner
        });
        assert_eq!(outer, Ok(Ok(())));
        assert_eq!(source.get(), 1);
    }

    #[test]
    fn current_time_follows_subclock() {
        let clock = Subclock::new();
        let before = clock.time();
        let inside = clock.run(current_time).unwrap();
        assert_eq!(inside, before);
        assert_eq!(clock.time(), before + 1);
    }

    #[test]
    fn escaped_root_handle_keeps_scope() {
        let start = stats();
        root(|_| ());
        assert_eq!(stats().nodes, start.nodes);

        let kept = root(|r| r);
        assert_eq!(stats().nodes, start.nodes + 1);
        assert!(!kept.is_disposed());
        kept.dispose();
    }

    #[test]
    fn subclock_with_residents_is_kept() {
        let start = stats();
        subclock(|| ()).unwrap();
        assert_eq!(stats().clocks, start.clocks);

        let signal = subclock(|| Signal::new(1)).unwrap();
        assert_eq!(stats().clocks, start.clocks + 1);
        assert_eq!(signal.get(), 1);
    }

    #[test]
    fn stats_report_nodes() {
        let start = stats();
        let scope = root(|r| r);
        assert_eq!(stats().nodes, start.nodes + 1);
        scope.dispose();
        assert_eq!(stats().nodes, start.nodes);
    }
}
