//! Execution Context
//!
//! The context records what is executing right now: the running computation
//! (reads made while it is set become edges), the running clock (writes made
//! while it is set are batched) and the owner (computations created while it
//! is set become its children).
//!
//! # Implementation
//!
//! The context lives in the thread-local runtime as a single `Copy` value.
//! Every nested evaluation swaps in a new context through a
//! [`ContextGuard`], which puts the previous one back when dropped. The
//! restore therefore happens on every exit path, unwinding included.

use crate::graph::{ClockId, NodeId};

use super::runtime::with_runtime;

/// Who adopts computations created in the current scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Owner {
    /// A live node (a computation or a root scope).
    Node(NodeId),
    /// Computations are created detached and only die with their handle's
    /// explicit dispose.
    Unowned,
}

/// The ambient execution state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Context {
    pub(crate) running: Option<NodeId>,
    pub(crate) clock: Option<ClockId>,
    pub(crate) owner: Option<Owner>,
}

impl Context {
    /// The context currently in effect.
    pub(crate) fn current() -> Self {
        with_runtime(|rt| rt.context.get())
    }

    /// Whether a clock is running, so writes are batched.
    pub(crate) fn is_batching(&self) -> bool {
        self.clock.is_some()
    }
}

/// Restores the previous context when dropped.
pub(crate) struct ContextGuard {
    previous: Context,
}

impl ContextGuard {
    /// Make `next` the current context until the guard is dropped.
    pub(crate) fn enter(next: Context) -> Self {
        let previous = with_runtime(|rt| rt.context.replace(next));
        Self { previous }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous;
        // The runtime may already be gone during thread teardown.
        let _ = super::runtime::try_with_runtime(|rt| rt.context.set(previous));
    }
}

/// Clear the running-node pointer if it is `node`.
pub(crate) fn forget_running(node: NodeId) {
    with_runtime(|rt| {
        let mut context = rt.context.get();
        if context.running == Some(node) {
            context.running = None;
            rt.context.set(context);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ArenaKey;

    #[test]
    fn guard_restores_previous_context() {
        let before = Context::current();
        assert!(!before.is_batching());

        let node = NodeId::from_parts(9, 0);
        {
            let _guard = ContextGuard::enter(Context {
                running: Some(node),
                owner: Some(Owner::Node(node)),
                ..before
            });
            assert_eq!(Context::current().running, Some(node));

            forget_running(node);
            assert_eq!(Context::current().running, None);
            assert_eq!(Context::current().owner, Some(Owner::Node(node)));
        }

        assert_eq!(Context::current(), before);
    }

    #[test]
    fn guard_restores_on_unwind() {
        let before = Context::current();
        let result = std::panic::catch_unwind(|| {
            let _guard = ContextGuard::enter(Context {
                owner: Some(Owner::Unowned),
                ..Context::default()
            });
            panic!("boom");
        });

        assert!(result.is_err());
        assert_eq!(Context::current(), before);
    }
}
