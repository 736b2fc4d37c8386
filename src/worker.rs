//! Per-thread controller loops and the fiber entries they dispatch.
//!
//! Every thread runs a controller on its own stack: it switches into a
//! fiber, and when control comes back it inspects the pending-suspend slot
//! to decide whether the fiber parked on a counter or just yielded idle.
//! The launching thread additionally owns the kernel fiber, which is never
//! pooled or wait-listed.

use std::cell::Cell;
use std::io;
use std::sync::atomic::Ordering;
use std::thread;

use crate::counter::WaitCounter;
use crate::fiber::{self, Fiber, FiberState};
use crate::fiber_pool::FiberPool;
use crate::task_system::TaskSystemState;
use crate::util::SendPtr;
use crate::wait_list::WaitList;

thread_local! {
    /// Counter a fiber stored just before suspending, consumed by this
    /// thread's controller right after the switch back.
    static PENDING_WAIT: Cell<Option<WaitCounter>> = const { Cell::new(None) };
}

/// Records the counter the current fiber wants to park on. The very next
/// switch to the controller consumes it.
pub(crate) fn set_pending_wait(counter: WaitCounter) {
    PENDING_WAIT.set(Some(counter));
}

fn take_pending_wait() -> Option<WaitCounter> {
    PENDING_WAIT.take()
}

/// Entry run by every pooled worker fiber.
///
/// Drains the immediate queue before the regular one, runs at most one task
/// per iteration, and switches back to the controller after each attempt so
/// scheduling decisions stay with the controller.
fn worker_fiber_entry(state: SendPtr<TaskSystemState>) {
    // SAFETY: worker fibers are created and destroyed inside `launch`,
    // while the state it owns is alive.
    let state = unsafe { &*state.get() };

    while state.exec_flag.load(Ordering::Acquire) {
        if let Some(task) = state.queue_immediate.try_pop() {
            task.execute();
        } else if let Some(task) = state.queue.try_pop() {
            task.execute();
        } else {
            thread::yield_now();
        }

        fiber::switch_to_controller();
    }
}

/// Builds the pool of worker fibers, all running [`worker_fiber_entry`].
pub(crate) fn make_fiber_pool(
    state: SendPtr<TaskSystemState>,
    fiber_count: usize,
    stack_bytes: usize,
) -> io::Result<FiberPool> {
    FiberPool::new(fiber_count, stack_bytes, move || worker_fiber_entry(state))
}

/// Builds the one-shot kernel fiber. When the user entry returns, the fiber
/// clears the exec flag; its own return is the switch back to the
/// controller, whose loop then exits.
pub(crate) fn make_kernel_fiber<F>(
    state: SendPtr<TaskSystemState>,
    stack_bytes: usize,
    kernel_entry: F,
) -> io::Result<Fiber>
where
    F: FnOnce() + Send + 'static,
{
    Fiber::new(stack_bytes, move || {
        kernel_entry();

        // SAFETY: as in `worker_fiber_entry`, the state outlives the fiber.
        let state = unsafe { &*state.get() };
        state.exec_flag.store(false, Ordering::Release);
    })
}

/// Controller loop for spawned worker threads.
pub(crate) fn worker_thread_controller(
    state: &TaskSystemState,
    fiber_pool: &FiberPool,
    wait_list: &WaitList,
) {
    let mut current = fiber_pool.pop();

    while state.exec_flag.load(Ordering::Acquire) {
        match current.resume() {
            FiberState::Yielded => {
                if let Some(counter) = take_pending_wait() {
                    // The fiber called wait_for: park it and run another.
                    wait_list.push(current, counter);
                    current = fiber_pool.pop();
                } else if let Some(ready) = wait_list.try_pop() {
                    // Parked fibers take precedence over the idle fiber in
                    // hand.
                    fiber_pool.push_back(current);
                    current = ready;
                }
            }
            FiberState::Completed => {
                debug_assert!(!state.exec_flag.load(Ordering::Acquire));
            }
            FiberState::Panicked(payload) => {
                state.record_task_panic(payload);
            }
        }
    }

    fiber_pool.push_back(current);
}

/// Controller loop for the launching thread.
///
/// Starts from the kernel fiber. The kernel's wait is held in a local slot
/// instead of the wait list while the slot is free; once its counter hits
/// zero the kernel outranks any generic parked fiber.
pub(crate) fn main_thread_controller(
    state: &TaskSystemState,
    fiber_pool: &FiberPool,
    wait_list: &WaitList,
    kernel_fiber: Fiber,
) {
    let mut current = kernel_fiber;
    let mut current_is_kernel = true;
    let mut kernel_wait: Option<(Fiber, WaitCounter)> = None;

    while state.exec_flag.load(Ordering::Acquire) {
        match current.resume() {
            FiberState::Yielded => {
                if let Some(counter) = take_pending_wait() {
                    if current_is_kernel {
                        debug_assert!(kernel_wait.is_none());
                        kernel_wait = Some((current, counter));
                    } else {
                        wait_list.push(current, counter);
                    }
                    current = fiber_pool.pop();
                    current_is_kernel = false;
                } else if kernel_wait
                    .as_ref()
                    .is_some_and(|(_, counter)| counter.is_zero())
                {
                    if let Some((kernel, _)) = kernel_wait.take() {
                        fiber_pool.push_back(current);
                        current = kernel;
                        current_is_kernel = true;
                    }
                } else if let Some(ready) = wait_list.try_pop() {
                    fiber_pool.push_back(current);
                    current = ready;
                    current_is_kernel = false;
                }
            }
            FiberState::Completed => {
                debug_assert!(!state.exec_flag.load(Ordering::Acquire));
            }
            FiberState::Panicked(payload) => {
                state.record_task_panic(payload);
            }
        }
    }

    // A worker fiber still in hand rejoins the pool; a spent kernel fiber
    // just drops.
    if !current_is_kernel {
        fiber_pool.push_back(current);
    }
}
