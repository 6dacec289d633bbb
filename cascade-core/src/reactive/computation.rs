//! Computation Implementation
//!
//! A computation is a derived value or side effect: a function of signals
//! and other computations that re-runs whenever something it read changes.
//!
//! # How Computations Work
//!
//! 1. Creating a computation requires an owner (an enclosing computation or
//!    root). The function runs once immediately; every tracked read it makes
//!    becomes an edge.
//!
//! 2. When a source changes, the computation is marked stale and queued on
//!    its clock. Re-evaluation runs pending cleanups, disposes the children
//!    created by the previous run, then calls the function with the previous
//!    value.
//!
//! 3. Reading a computation from another computation records an edge. If the
//!    source is stale at the reader's time it is brought up to date first, so
//!    no reader observes a mix of old and new values.
//!
//! # Example
//!
//! ```rust,ignore
//! let a = Signal::new(1);
//! let sum = root(|_| {
//!     Computation::seeded(0, move |total| total + a.get())
//! })?;
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::graph::{Body, NodeId, NodeState};

use super::context::{Context, Owner};
use super::runtime::{
    dispose, dispose_or_defer, inline_computation, root_clock, toplevel_computation,
    track_computation, with_scheduler,
};
use super::scope::sample;

/// A handle to a derived value of type `T`.
///
/// Handles are cheap to clone. A disposed computation keeps returning its
/// last value.
pub struct Computation<T: 'static> {
    node: NodeId,
    value: Rc<RefCell<Option<T>>>,
}

impl<T: Clone + 'static> Computation<T> {
    /// Create a computation. The function receives the previous value, or
    /// `None` on the first run.
    pub fn new(mut f: impl FnMut(Option<T>) -> T + 'static) -> Result<Self> {
        let value: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
        let cell = Rc::clone(&value);
        let body: Body = Rc::new(RefCell::new(move || {
            let previous = cell.borrow().clone();
            let next = f(previous);
            *cell.borrow_mut() = Some(next);
        }));
        let node = create(body)?;
        Ok(Self { node, value })
    }

    /// Create a computation whose first run receives `seed`.
    pub fn seeded(seed: T, mut f: impl FnMut(T) -> T + 'static) -> Result<Self> {
        let value = Rc::new(RefCell::new(Some(seed)));
        let cell = Rc::clone(&value);
        let body: Body = Rc::new(RefCell::new(move || {
            let previous = cell.borrow().clone();
            if let Some(previous) = previous {
                let next = f(previous);
                *cell.borrow_mut() = Some(next);
            }
        }));
        let node = create(body)?;
        Ok(Self { node, value })
    }

    /// Create a computation that depends only on what `trigger` reads.
    ///
    /// `f` runs untracked after every run of `trigger`.
    pub fn on(
        mut trigger: impl FnMut() + 'static,
        mut f: impl FnMut(Option<T>) -> T + 'static,
    ) -> Result<Self> {
        Self::new(move |previous| {
            trigger();
            sample(|| f(previous))
        })
    }

    /// Like [`Computation::on`], with a seed for the first run.
    pub fn on_seeded(
        mut trigger: impl FnMut() + 'static,
        seed: T,
        mut f: impl FnMut(T) -> T + 'static,
    ) -> Result<Self> {
        Self::seeded(seed, move |previous| {
            trigger();
            sample(|| f(previous))
        })
    }

    /// Like [`Computation::on_seeded`], but `f` is skipped on the first run:
    /// the computation starts at `seed` and only reacts to later changes.
    pub fn on_changes(
        mut trigger: impl FnMut() + 'static,
        seed: T,
        mut f: impl FnMut(T) -> T + 'static,
    ) -> Result<Self> {
        let mut first = true;
        Self::seeded(seed, move |previous| {
            trigger();
            if std::mem::take(&mut first) {
                return previous;
            }
            sample(|| f(previous))
        })
    }

    /// Get the latest value, tracking the read.
    ///
    /// A failure while bringing the value up to date (a cycle) is recorded
    /// for the batch in flight and the last value is returned.
    ///
    /// # Panics
    ///
    /// Panics if the computation is read from inside its own first
    /// evaluation, before any value exists. [`Computation::try_get`] reports
    /// that case as [`Error::CircularDependency`].
    pub fn get(&self) -> T {
        let _ = self.track();
        self.get_untracked()
    }

    /// Get the latest value, or the failure hit while bringing it up to
    /// date.
    pub fn try_get(&self) -> Result<T> {
        self.track()?;
        self.value.borrow().clone().ok_or(Error::CircularDependency)
    }

    /// Get the latest value without tracking.
    ///
    /// # Panics
    ///
    /// Panics if no evaluation has completed yet.
    pub fn get_untracked(&self) -> T {
        match self.value.borrow().as_ref() {
            Some(value) => value.clone(),
            None => panic!("computation read before its first evaluation completed"),
        }
    }
}

impl<T: 'static> Computation<T> {
    /// Record a read of this computation without copying its value.
    pub fn track(&self) -> Result<()> {
        track_computation(self.node)
    }

    /// Read the latest value by reference, tracking the read.
    ///
    /// Returns `None` only before the first evaluation completes.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let _ = self.track();
        self.value.borrow().as_ref().map(f)
    }

    /// Dispose this computation and everything it owns.
    ///
    /// While a batch is running, the disposal is deferred to the end of the
    /// current frame.
    pub fn dispose(&self) {
        dispose_or_defer(self.node);
    }

    /// Whether the computation has been disposed.
    pub fn is_disposed(&self) -> bool {
        !with_scheduler(|s| s.is_alive(self.node))
    }

    /// Number of computations that read this one in their last evaluation.
    pub fn reader_count(&self) -> usize {
        with_scheduler(|s| {
            s.node(self.node)
                .and_then(|n| n.log())
                .map_or(0, |log| s.reader_count(log))
        })
    }

    /// The graph node behind this handle.
    pub fn node(&self) -> NodeId {
        self.node
    }
}

/// Register a new node, run it once and hand it to its owner.
fn create(body: Body) -> Result<NodeId> {
    let context = Context::current();
    let Some(owner) = context.owner else {
        return Err(Error::NoOwner);
    };
    let clock = context.clock.unwrap_or_else(root_clock);
    let node = with_scheduler(|s| {
        let node = s.add_node(clock, Some(Rc::clone(&body)));
        s.set_state(node, NodeState::Running);
        node
    });

    let outcome = if context.is_batching() {
        inline_computation(node, clock, &body)
    } else {
        toplevel_computation(node, &body)
    };
    if let Err(err) = outcome {
        dispose(node);
        return Err(err);
    }

    if let Owner::Node(owner) = owner {
        with_scheduler(|s| s.adopt(owner, node));
    }
    Ok(node)
}

impl<T: 'static> Clone for Computation<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node,
            value: Rc::clone(&self.value),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Computation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computation")
            .field("node", &self.node)
            .field("value", &*self.value.borrow())
            .finish()
    }
}

// ---- Tests ----
