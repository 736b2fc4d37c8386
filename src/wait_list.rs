//! Wait list of suspended fibers and the counters they wait on.

use parking_lot::Mutex;

use crate::counter::WaitCounter;
use crate::fiber::Fiber;

struct WaitEntry {
    fiber: Fiber,
    counter: WaitCounter,
}

/// Bounded set of parked fibers, sized to the configured fiber count.
///
/// Controllers poll it between fiber switches; there is no condvar. The
/// counter read needs no extra synchronization: it is an atomic acquire
/// load, and zero is durable while a parked fiber references the counter.
pub(crate) struct WaitList {
    entries: Mutex<Vec<WaitEntry>>,
    capacity: usize,
}

impl WaitList {
    pub(crate) fn new(capacity: usize) -> WaitList {
        WaitList {
            entries: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Parks a fiber until `counter` reaches zero.
    ///
    /// The counter had outstanding tasks when the fiber requested the wait;
    /// the batch may already have finished by the time the entry lands, in
    /// which case the next scan pops it immediately.
    pub(crate) fn push(&self, fiber: Fiber, counter: WaitCounter) {
        let mut entries = self.entries.lock();
        debug_assert!(entries.len() < self.capacity);
        entries.push(WaitEntry { fiber, counter });
    }

    /// Removes and returns any fiber whose counter has reached zero.
    ///
    /// Scans newest-first and removes by swapping with the last entry;
    /// order among ready fibers is unspecified.
    pub(crate) fn try_pop(&self) -> Option<Fiber> {
        let mut entries = self.entries.lock();
        for index in (0..entries.len()).rev() {
            if entries[index].counter.is_zero() {
                return Some(entries.swap_remove(index).fiber);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_fiber() -> Fiber {
        Fiber::new(64 * 1024, || {}).expect("stack allocation")
    }

    #[test]
    fn empty_list_has_nothing_ready() {
        let list = WaitList::new(4);
        assert!(list.try_pop().is_none());
    }

    #[test]
    fn fiber_is_held_until_its_counter_reaches_zero() {
        let list = WaitList::new(4);
        let counter = WaitCounter::new();
        counter.set(2);

        list.push(idle_fiber(), counter.clone());
        assert!(list.try_pop().is_none());

        counter.decrement();
        assert!(list.try_pop().is_none());

        counter.decrement();
        assert!(list.try_pop().is_some());
        assert!(list.try_pop().is_none());
    }

    #[test]
    fn only_ready_entries_are_removed() {
        let list = WaitList::new(4);

        let pending = WaitCounter::new();
        pending.set(1);
        let finished = WaitCounter::new();
        finished.set(1);

        list.push(idle_fiber(), pending.clone());
        list.push(idle_fiber(), finished.clone());
        finished.decrement();

        assert!(list.try_pop().is_some());
        assert!(list.try_pop().is_none());

        pending.decrement();
        assert!(list.try_pop().is_some());
    }
}
