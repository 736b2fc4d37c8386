//! Wait counters for tracking batch completion.
//!
//! A counter is the synchronization point between a submitted batch and the
//! fiber that waits on it: `run` stores the batch size, every finishing
//! task decrements, and a controller resumes the parked fiber once the
//! counter reads zero.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Shared atomic counter of outstanding tasks in a submission batch.
///
/// Owned by the submitter and borrowed by the system until the matching
/// wait completes. Clones share the same underlying value, so the counter
/// stays valid for as long as any parked fiber or in-flight task refers to
/// it.
///
/// The decrement at task completion is release-ordered and the zero-read is
/// an acquire: a fiber resumed after [`wait_for`](crate::wait_for) observes
/// every write made by the tasks of its batch.
#[derive(Clone, Default)]
pub struct WaitCounter {
    inner: Arc<AtomicUsize>,
}

impl WaitCounter {
    /// Creates a counter with no outstanding tasks.
    pub fn new() -> Self {
        WaitCounter::default()
    }

    /// Current number of outstanding tasks.
    pub fn value(&self) -> usize {
        self.inner.load(Ordering::Acquire)
    }

    /// Whether every task of the batch has finished.
    pub fn is_zero(&self) -> bool {
        self.value() == 0
    }

    /// Stores the batch size at submission time.
    pub(crate) fn set(&self, count: usize) {
        self.inner.store(count, Ordering::Release);
    }

    /// Marks one task of the batch as finished.
    pub(crate) fn decrement(&self) {
        let previous = self.inner.fetch_sub(1, Ordering::Release);
        debug_assert!(previous > 0, "wait counter underflow");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        let counter = WaitCounter::new();
        assert_eq!(counter.value(), 0);
        assert!(counter.is_zero());
    }

    #[test]
    fn set_and_decrement() {
        let counter = WaitCounter::new();
        counter.set(3);
        assert_eq!(counter.value(), 3);

        counter.decrement();
        counter.decrement();
        assert!(!counter.is_zero());

        counter.decrement();
        assert!(counter.is_zero());
    }

    #[test]
    fn clones_share_the_value() {
        let counter = WaitCounter::new();
        let alias = counter.clone();

        counter.set(1);
        assert_eq!(alias.value(), 1);

        alias.decrement();
        assert!(counter.is_zero());
    }
}
