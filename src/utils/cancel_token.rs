use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancellation state. A state may point at a parent, so cancelling
/// a parent is observed by every descendant.
struct CancelState {
    cancelled: AtomicBool,
    parent: Option<Arc<CancelState>>,
}

impl CancelState {
    #[inline]
    fn flagged(&self) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return true;
        }
        match &self.parent {
            Some(p) => p.flagged(),
            None => false,
        }
    }
}

/// Hierarchical cancellation token.
///
/// Cheap to clone and check. Cancelling a token cancels all tokens derived
/// from it via [`CancelToken::child`]; cancellation is one-way and sticky.
#[derive(Clone)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    /// Create a root token with no parent.
    #[inline]
    pub fn root() -> Self {
        Self {
            state: Arc::new(CancelState {
                cancelled: AtomicBool::new(false),
                parent: None,
            }),
        }
    }

    /// Derive a child token; cancelling `self` cancels the child too.
    #[inline]
    pub fn child(&self) -> Self {
        Self {
            state: Arc::new(CancelState {
                cancelled: AtomicBool::new(false),
                parent: Some(self.state.clone()),
            }),
        }
    }

    /// Trip this token (and, transitively, all of its children).
    #[inline]
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
    }

    /// Whether this token or any ancestor has been cancelled.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.state.flagged()
    }
}

impl Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("is_cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_propagates_to_children() {
        let root = CancelToken::root();
        let child = root.child();
        let grandchild = child.child();

        assert!(!grandchild.is_cancelled());
        root.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn child_cancel_does_not_reach_parent() {
        let root = CancelToken::root();
        let child = root.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());
    }
}
