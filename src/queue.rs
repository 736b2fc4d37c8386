//! Bounded MPMC FIFO queue with shutdown-aware blocking.
//!
//! Producers block while the queue is at capacity, consumers block while it
//! is empty; flipping the wait-allowed latch off releases both sides so the
//! system can drain and join at shutdown without deadlocking anyone.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

struct QueueState<T> {
    items: VecDeque<T>,
    wait_allowed: bool,
}

/// Bounded multi-producer multi-consumer FIFO queue.
///
/// Capacity is fixed at construction. While waiting is allowed, `push`
/// blocks when the queue is full and [`wait_pop`](ConcurrentQueue::wait_pop)
/// blocks when it is empty. Once `set_wait_allowed(false)` flips the latch
/// off, sleeping consumers return `None` and producers append without
/// waiting; a push is never rejected.
///
/// FIFO order is preserved per producer.
pub struct ConcurrentQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> ConcurrentQueue<T> {
    /// Creates an empty queue holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be >= 1");

        ConcurrentQueue {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                wait_allowed: true,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Appends one item, waiting for space while the queue is full and
    /// waiting is allowed.
    pub fn push(&self, value: T) {
        let mut state = self.state.lock();
        while state.items.len() >= self.capacity && state.wait_allowed {
            self.not_full.wait(&mut state);
        }
        state.items.push_back(value);
        drop(state);

        self.not_empty.notify_one();
    }

    /// Appends a whole batch under a single lock acquisition.
    ///
    /// Space is awaited item by item, so a batch larger than the remaining
    /// capacity completes as long as consumers keep draining.
    pub fn push_batch<I>(&self, values: I)
    where
        I: IntoIterator<Item = T>,
    {
        let mut pushed = 0;
        let mut state = self.state.lock();
        for value in values {
            while state.items.len() >= self.capacity && state.wait_allowed {
                // Consumers asleep since before this batch have not been
                // notified yet; wake them or no one ever frees space.
                self.not_empty.notify_all();
                self.not_full.wait(&mut state);
            }
            state.items.push_back(value);
            pushed += 1;
        }
        drop(state);

        for _ in 0..pushed {
            self.not_empty.notify_one();
        }
    }

    /// Removes the oldest item, returning `None` immediately when empty.
    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        let value = state.items.pop_front();
        drop(state);

        if value.is_some() {
            self.not_full.notify_one();
        }
        value
    }

    /// Removes the oldest item, waiting while the queue is empty.
    ///
    /// Returns `None` once waiting is disallowed and no item is available.
    pub fn wait_pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(value) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(value);
            }
            if !state.wait_allowed {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Toggles the wait latch. Flipping it off wakes every sleeping
    /// producer and consumer.
    pub fn set_wait_allowed(&self, allowed: bool) {
        let mut state = self.state.lock();
        state.wait_allowed = allowed;
        drop(state);

        if !allowed {
            self.not_empty.notify_all();
            self.not_full.notify_all();
        }
    }

    pub fn wait_allowed(&self) -> bool {
        self.state.lock().wait_allowed
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
