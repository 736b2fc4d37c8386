//! Task descriptors and the unit of work the scheduler executes.

use crate::counter::WaitCounter;

/// A user-supplied unit of work: an invocable with no arguments and no
/// result, consumed exactly once.
pub struct TaskDesc {
    func: Box<dyn FnOnce() + Send + 'static>,
}

impl TaskDesc {
    pub fn new<F>(func: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        TaskDesc {
            func: Box::new(func),
        }
    }
}

/// A queued task: the descriptor's closure plus the wait counter of its
/// submission batch, if any.
pub(crate) struct Task {
    func: Box<dyn FnOnce() + Send + 'static>,
    wait_counter: Option<WaitCounter>,
}

impl Task {
    pub(crate) fn new(desc: TaskDesc, wait_counter: Option<WaitCounter>) -> Self {
        Task {
            func: desc.func,
            wait_counter,
        }
    }

    /// Runs the task body, then signals the batch counter.
    ///
    /// The decrement is release-ordered (see [`WaitCounter`]); readiness of
    /// parked fibers is discovered by the wait-list scan, not signaled here.
    pub(crate) fn execute(self) {
        (self.func)();

        if let Some(counter) = self.wait_counter {
            counter.decrement();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn executes_the_body() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();

        let task = Task::new(
            TaskDesc::new(move || {
                ran_clone.store(true, Ordering::SeqCst);
            }),
            None,
        );

        task.execute();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn decrements_the_batch_counter() {
        let counter = WaitCounter::new();
        counter.set(1);

        let task = Task::new(TaskDesc::new(|| {}), Some(counter.clone()));
        task.execute();

        assert!(counter.is_zero());
    }
}
