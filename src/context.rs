use crate::signal::ShutdownSignal;

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

/// Why a context was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// `CancelHandle::cancel` was called
    Manual,
    /// An ancestor context was cancelled
    Parent,
    /// A termination signal was received
    Signal(ShutdownSignal),
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelCause::Manual => f.write_str("context canceled"),
            CancelCause::Parent => f.write_str("parent context canceled"),
            CancelCause::Signal(sig) => write!(f, "received {}", sig),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    cause: Option<CancelCause>,
    children: Vec<Weak<Node>>,
}

#[derive(Debug, Default)]
struct Node {
    /// `false` only for the background root
    cancellable: bool,
    state: Mutex<State>,
    cancelled: Condvar,
}

impl Node {
    fn state(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn cancel(&self, cause: CancelCause) -> bool {
        let children = {
            let mut state = self.state();
            if state.cause.is_some() {
                return false;
            }
            state.cause = Some(cause);
            std::mem::take(&mut state.children)
        };
        self.cancelled.notify_all();

        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel(CancelCause::Parent);
        }
        true
    }
}

/// Propagation handle carrying a one-shot, irreversible cancellation
///
/// Cancellation is cooperative: it flips a flag and wakes waiters, nothing is
/// interrupted. Every context derived from a cancelled one is cancelled too.
#[derive(Clone)]
pub struct Context {
    node: Arc<Node>,
}

impl Context {
    /// Root context that is never cancelled
    pub fn background() -> Self {
        Self {
            node: Arc::new(Node::default()),
        }
    }

    /// Derives a cancellable child of `parent`
    ///
    /// If `parent` is already cancelled the child starts out cancelled with
    /// cause `CancelCause::Parent`.
    pub fn with_cancel(parent: &Context) -> (Context, CancelHandle) {
        let node = Arc::new(Node {
            cancellable: true,
            ..Node::default()
        });

        if parent.node.cancellable {
            let mut parent_state = parent.node.state();
            if parent_state.cause.is_some() {
                node.state().cause = Some(CancelCause::Parent);
            } else {
                parent_state.children.retain(|c| c.strong_count() > 0);
                parent_state.children.push(Arc::downgrade(&node));
            }
        }

        let handle = CancelHandle {
            node: Arc::clone(&node),
        };
        (Context { node }, handle)
    }

    pub fn is_cancelled(&self) -> bool {
        self.node.state().cause.is_some()
    }

    /// Cancellation cause, `None` while still active
    pub fn cause(&self) -> Option<CancelCause> {
        self.node.state().cause
    }

    /// Blocks until the context is cancelled
    ///
    /// Never returns for the background context.
    pub fn wait(&self) -> CancelCause {
        let mut state = self.node.state();
        loop {
            if let Some(cause) = state.cause {
                return cause;
            }
            state = match self.node.cancelled.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Blocks until the context is cancelled or `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CancelCause> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Some(self.wait());
        };
        let mut state = self.node.state();
        loop {
            if let Some(cause) = state.cause {
                return Some(cause);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = match self.node.cancelled.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancellable", &self.node.cancellable)
            .field("cause", &self.cause())
            .finish()
    }
}

/// Cancels the context it was created with
///
/// Cancelling more than once is a no-op; the first cause wins.
#[derive(Clone)]
pub struct CancelHandle {
    node: Arc<Node>,
}

impl CancelHandle {
    /// Returns `true` if this call performed the cancellation
    pub fn cancel(&self) -> bool {
        self.node.cancel(CancelCause::Manual)
    }

    pub(crate) fn cancel_with(&self, cause: CancelCause) -> bool {
        self.node.cancel(cause)
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_background_is_never_cancelled() {
        let ctx = Context::background();
        assert!(!ctx.is_cancelled());
        assert_eq!(ctx.wait_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_wait_timeout_beyond_instant_range() {
        let (ctx, cancel) = Context::with_cancel(&Context::background());
        cancel.cancel();
        assert_eq!(ctx.wait_timeout(Duration::MAX), Some(CancelCause::Manual));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let (ctx, cancel) = Context::with_cancel(&Context::background());
        assert!(!ctx.is_cancelled());

        assert!(cancel.cancel());
        assert!(!cancel.cancel());
        assert!(!cancel.cancel_with(CancelCause::Signal(ShutdownSignal::Terminate)));

        assert!(ctx.is_cancelled());
        assert_eq!(ctx.cause(), Some(CancelCause::Manual));
    }

    #[test]
    fn test_cancel_propagates_to_descendants() {
        let (root, cancel_root) = Context::with_cancel(&Context::background());
        let (child, _cancel_child) = Context::with_cancel(&root);
        let (grandchild, _cancel_grandchild) = Context::with_cancel(&child);

        cancel_root.cancel();

        assert_eq!(root.cause(), Some(CancelCause::Manual));
        assert_eq!(child.cause(), Some(CancelCause::Parent));
        assert_eq!(grandchild.cause(), Some(CancelCause::Parent));
    }

    #[test]
    fn test_child_cancel_does_not_touch_parent() {
        let (parent, _cancel_parent) = Context::with_cancel(&Context::background());
        let (child, cancel_child) = Context::with_cancel(&parent);

        cancel_child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_child_of_cancelled_parent_starts_cancelled() {
        let (parent, cancel_parent) = Context::with_cancel(&Context::background());
        cancel_parent.cancel();

        let (child, _) = Context::with_cancel(&parent);
        assert_eq!(child.cause(), Some(CancelCause::Parent));
    }

    #[test]
    fn test_wait_wakes_on_cancel() {
        let (ctx, cancel) = Context::with_cancel(&Context::background());
        let waiter = {
            let ctx = ctx.clone();
            thread::spawn(move || ctx.wait())
        };

        thread::sleep(Duration::from_millis(20));
        cancel.cancel_with(CancelCause::Signal(ShutdownSignal::Interrupt));

        assert_eq!(
            waiter.join().unwrap(),
            CancelCause::Signal(ShutdownSignal::Interrupt)
        );
    }

    #[test]
    fn test_dropped_children_are_pruned() {
        let (parent, _cancel) = Context::with_cancel(&Context::background());
        for _ in 0..10 {
            let _ = Context::with_cancel(&parent);
        }
        let (_kept, _kept_cancel) = Context::with_cancel(&parent);
        assert_eq!(parent.node.state().children.len(), 1);
    }
}
