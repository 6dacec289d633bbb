//! Signal Implementation
//!
//! A signal is the mutable leaf of the graph. It holds a committed value and,
//! while a batch is in flight, at most one pending value.
//!
//! # How Signals Work
//!
//! 1. A signal belongs to the clock that was running when it was created, or
//!    to the root clock.
//!
//! 2. Reading a signal inside a running computation records an edge in the
//!    signal's edge log (created on first use) and returns the committed
//!    value. Reads outside any computation are plain reads.
//!
//! 3. Writing inside a batch stores the pending value and queues the signal
//!    on its clock. A second write in the same frame must agree with the
//!    first. Writing outside a batch commits at once; if anything has ever
//!    read the signal, a top-level pass re-evaluates the readers before
//!    `set` returns.
//!
//! # Example
//!
//! ```rust,ignore
//! let count = Signal::new(0);
//! let double = root(|_| Computation::new(move |_| count.get() * 2))?;
//!
//! count.set(5)?;
//! assert_eq!(double.get(), 10);
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::graph::{ClockId, LogId, PendingChange};

use super::context::Context;
use super::runtime::{align_signal, event, fail, orphan_log, root_clock, track_signal, with_scheduler};

struct SignalInner<T> {
    clock: ClockId,
    log: Cell<Option<LogId>>,
    value: RefCell<T>,
    pending: RefCell<Option<T>>,
}

impl<T> PendingChange for SignalInner<T> {
    fn commit(&self) -> Option<LogId> {
        let next = self.pending.borrow_mut().take();
        if let Some(next) = next {
            *self.value.borrow_mut() = next;
        }
        self.log.get()
    }

    fn discard(&self) {
        let dropped = self.pending.borrow_mut().take();
        drop(dropped);
    }
}

impl<T> Drop for SignalInner<T> {
    fn drop(&mut self) {
        if let Some(log) = self.log.get() {
            orphan_log(log);
        }
    }
}

/// A reactive cell holding a value of type `T`.
///
/// Handles are cheap to clone and share the same cell.
pub struct Signal<T: 'static> {
    inner: Rc<SignalInner<T>>,
}

impl<T: 'static> Signal<T> {
    /// Create a signal on the running clock, or on the root clock outside
    /// any batch.
    pub fn new(value: T) -> Self {
        let clock = Context::current().clock.unwrap_or_else(root_clock);
        with_scheduler(|s| s.claim_clock(clock));
        Self {
            inner: Rc::new(SignalInner {
                clock,
                log: Cell::new(None),
                value: RefCell::new(value),
                pending: RefCell::new(None),
            }),
        }
    }

    /// Record a read of this signal without copying its value.
    ///
    /// Fails only if bringing the signal's clock current failed; the failure
    /// is also recorded for the batch in flight.
    pub fn track(&self) -> Result<()> {
        track_signal(&self.inner.log, self.inner.clock)
    }

    /// Read the committed value by reference, tracking the read.
    ///
    /// # Panics
    ///
    /// The value stays borrowed while `f` runs. Writing this signal from
    /// `f` outside a batch commits in place and panics; use
    /// [`Signal::update`] instead.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let _ = self.track();
        f(&self.inner.value.borrow())
    }

    /// Read the committed value by reference without tracking.
    ///
    /// # Panics
    ///
    /// Same as [`Signal::with`].
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    /// Whether a write is waiting to be committed.
    pub fn is_pending(&self) -> bool {
        self.inner.pending.borrow().is_some()
    }

    /// Number of computations that read this signal in their last
    /// evaluation.
    pub fn reader_count(&self) -> usize {
        match self.inner.log.get() {
            Some(log) => with_scheduler(|s| s.reader_count(log)),
            None => 0,
        }
    }

    pub(crate) fn clock(&self) -> ClockId {
        self.inner.clock
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Get the committed value.
    ///
    /// Inside a running computation this records the computation as a
    /// reader.
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Get the committed value without recording a dependency.
    pub fn get_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }
}

impl<T: PartialEq + 'static> Signal<T> {
    /// Write a new value.
    ///
    /// Inside a batch the value is queued and commits at the next frame;
    /// writing a different value to a signal that is already pending fails
    /// with [`Error::ConflictingWrite`]. Outside a batch the value commits
    /// immediately and readers are brought up to date before returning.
    pub fn set(&self, value: T) -> Result<()> {
        self.write(value, |pending, value| pending == value)
    }
}

impl<T: Clone + PartialEq + 'static> Signal<T> {
    /// Write a value computed from the committed one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<()> {
        let next = f(&self.inner.value.borrow());
        self.set(next)
    }
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("value", &*self.inner.value.borrow())
            .field("pending", &self.is_pending())
            .field("clock", &self.inner.clock)
            .finish()
    }
}

/// A signal that ignores writes equal to its current value.
///
/// Two writes of different values at the same logical time inside a batch
/// fail with [`Error::ConflictingWrite`], even when the second write happens
/// after the first has been committed.
pub struct ValueSignal<T: 'static> {
    signal: Signal<T>,
    state: Rc<ValueState<T>>,
}

struct ValueState<T> {
    current: RefCell<T>,
    age: Cell<Option<u64>>,
    eq: Box<dyn Fn(&T, &T) -> bool>,
}

impl<T: Clone + PartialEq + 'static> ValueSignal<T> {
    /// Create a value signal compared with `PartialEq`.
    pub fn new(value: T) -> Self {
        Self::with_eq(value, |a, b| a == b)
    }
}

impl<T: Clone + 'static> ValueSignal<T> {
    /// Create a value signal with a custom equality.
    pub fn with_eq(value: T, eq: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self {
            signal: Signal::new(value.clone()),
            state: Rc::new(ValueState {
                current: RefCell::new(value),
                age: Cell::new(None),
                eq: Box::new(eq),
            }),
        }
    }

    /// Get the committed value, tracking the read.
    pub fn get(&self) -> T {
        self.signal.get()
    }

    /// Get the committed value without tracking.
    pub fn get_untracked(&self) -> T {
        self.signal.get_untracked()
    }

    /// Record a read without copying the value.
    pub fn track(&self) -> Result<()> {
        self.signal.track()
    }

    /// Number of computations that read this signal in their last
    /// evaluation.
    pub fn reader_count(&self) -> usize {
        self.signal.reader_count()
    }

    /// Write `value` unless it equals the latest written value.
    pub fn set(&self, value: T) -> Result<()> {
        if (self.state.eq)(&self.state.current.borrow(), &value) {
            return Ok(());
        }

        let time = if Context::current().is_batching() {
            let time = with_scheduler(|s| s.time(self.signal.clock()));
            if self.state.age.get() == Some(time) {
                fail(Error::ConflictingWrite);
                return Err(Error::ConflictingWrite);
            }
            Some(time)
        } else {
            None
        };

        self.signal.write(value.clone(), |_, _| false)?;
        if time.is_some() {
            self.state.age.set(time);
        }
        *self.state.current.borrow_mut() = value;
        Ok(())
    }
}

impl<T: 'static> Signal<T> {
    /// Queue or commit `value`. `agrees` decides whether a write that finds
    /// a value already pending is a harmless repeat.
    fn write(&self, value: T, agrees: impl FnOnce(&T, &T) -> bool) -> Result<()> {
        let Some(reader_clock) = Context::current().clock else {
            if self.inner.log.get().is_none() {
                *self.inner.value.borrow_mut() = value;
                return Ok(());
            }
            *self.inner.pending.borrow_mut() = Some(value);
            let change: Rc<dyn PendingChange> = self.inner.clone();
            with_scheduler(|s| {
                let root = s.root_clock();
                s.enqueue_change(root, change);
            });
            return event();
        };

        let aligned = align_signal(reader_clock, self.inner.clock)?;
        if let Some(pending) = self.inner.pending.borrow().as_ref() {
            if agrees(pending, &value) {
                return Ok(());
            }
            fail(Error::ConflictingWrite);
            return Err(Error::ConflictingWrite);
        }

        with_scheduler(|s| s.mark_clock_stale(aligned.commit));
        *self.inner.pending.borrow_mut() = Some(value);
        let change: Rc<dyn PendingChange> = self.inner.clone();
        with_scheduler(|s| s.enqueue_change(aligned.commit, change));
        Ok(())
    }
}

impl<T: 'static> Clone for ValueSignal<T> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for ValueSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueSignal")
            .field("value", &*self.state.current.borrow())
            .finish()
    }
}

// ---- Tests ----
