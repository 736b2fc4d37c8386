//! Pool of idle worker fibers.

use std::io;

use parking_lot::{Condvar, Mutex};

use crate::fiber::Fiber;

/// Fixed set of pre-created worker fibers, every one running the same
/// worker entry.
///
/// Set semantics: issue order is not meaningful. `pop` blocks while the
/// pool is empty; that is acceptable because the total number of running
/// and parked fibers is bounded, so some fiber always finishes or is
/// resumed and eventually returns.
pub(crate) struct FiberPool {
    idle: Mutex<Vec<Fiber>>,
    available: Condvar,
}

impl FiberPool {
    /// Creates `fiber_count` fibers with `stack_bytes` stacks, each running
    /// a clone of `entry`.
    pub(crate) fn new<F>(fiber_count: usize, stack_bytes: usize, entry: F) -> io::Result<FiberPool>
    where
        F: FnOnce() + Clone + Send + 'static,
    {
        let mut idle = Vec::with_capacity(fiber_count);
        for _ in 0..fiber_count {
            idle.push(Fiber::new(stack_bytes, entry.clone())?);
        }

        Ok(FiberPool {
            idle: Mutex::new(idle),
            available: Condvar::new(),
        })
    }

    /// Takes an idle fiber, blocking until one is available.
    pub(crate) fn pop(&self) -> Fiber {
        let mut idle = self.idle.lock();
        loop {
            if let Some(fiber) = idle.pop() {
                return fiber;
            }
            self.available.wait(&mut idle);
        }
    }

    /// Returns a fiber to the pool.
    pub(crate) fn push_back(&self, fiber: Fiber) {
        self.idle.lock().push(fiber);
        self.available.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_and_push_back_cycle_fibers() {
        let pool = FiberPool::new(2, 64 * 1024, || {}).expect("pool construction");

        let first = pool.pop();
        let second = pool.pop();

        pool.push_back(first);
        pool.push_back(second);

        // Both handles are back; two more pops must not block.
        let _ = pool.pop();
        let _ = pool.pop();
    }

    #[test]
    fn pop_blocks_until_a_fiber_returns() {
        let pool = std::sync::Arc::new(FiberPool::new(1, 64 * 1024, || {}).expect("pool"));
        let fiber = pool.pop();

        let waiter = {
            let pool = pool.clone();
            std::thread::spawn(move || {
                let fiber = pool.pop();
                pool.push_back(fiber);
            })
        };

        pool.push_back(fiber);
        waiter.join().expect("waiter thread");
    }
}
