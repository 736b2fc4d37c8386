//! Task system lifecycle and the submission / wait API.
//!
//! `launch` owns the whole system on its stack: queues, fiber pool, wait
//! list, and worker threads all live inside one call. A process-wide
//! pointer to that state is installed for the duration so tasks can reach
//! `run` and `wait_for` without threading a handle through every closure,
//! and is cleared on every exit path.

use std::any::Any;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::thread;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error};

use crate::counter::WaitCounter;
use crate::fiber;
use crate::queue::ConcurrentQueue;
use crate::task::{Task, TaskDesc};
use crate::util::SendPtr;
use crate::wait_list::WaitList;
use crate::worker;

/// Configuration of a task system instance.
#[derive(Clone, Copy, Debug)]
pub struct TaskSystemDesc {
    /// Number of OS threads, including the launching thread.
    pub thread_count: usize,
    /// Number of pooled worker fibers; also sizes the wait list.
    pub fiber_count: usize,
    /// Stack size of each pooled fiber and of the kernel fiber.
    pub fiber_stack_byte_count: usize,
    /// Capacity of the regular task queue.
    pub queue_size: usize,
    /// Capacity of the high-priority task queue.
    pub queue_immediate_size: usize,
    /// Pin threads to cores, first come first served in core order.
    pub pin_threads: bool,
}

impl Default for TaskSystemDesc {
    fn default() -> Self {
        TaskSystemDesc {
            thread_count: thread::available_parallelism()
                .map(|count| count.get())
                .unwrap_or(4),
            fiber_count: 128,
            fiber_stack_byte_count: 1024 * 1024,
            queue_size: 1024,
            queue_immediate_size: 1024,
            pin_threads: false,
        }
    }
}

impl TaskSystemDesc {
    fn validate(&self) -> Result<(), TaskSystemError> {
        if self.thread_count == 0 {
            return Err(TaskSystemError::InvalidDesc("thread_count must be >= 1"));
        }
        if self.fiber_count == 0 {
            return Err(TaskSystemError::InvalidDesc("fiber_count must be >= 1"));
        }
        if self.queue_size == 0 {
            return Err(TaskSystemError::InvalidDesc("queue_size must be >= 1"));
        }
        if self.queue_immediate_size == 0 {
            return Err(TaskSystemError::InvalidDesc(
                "queue_immediate_size must be >= 1",
            ));
        }
        Ok(())
    }
}

/// Totals reported by [`launch`] after shutdown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TaskSystemReport {
    /// Tasks submitted through the immediate (high-priority) path.
    pub task_immediate_count: usize,
    /// Tasks submitted through the regular path.
    pub task_count: usize,
}

#[derive(Debug, Error)]
pub enum TaskSystemError {
    #[error("invalid task system descriptor: {0}")]
    InvalidDesc(&'static str),
    #[error("a task system is already running in this process")]
    AlreadyRunning,
    #[error("failed to allocate a fiber stack")]
    StackAllocation(#[source] io::Error),
    #[error("failed to spawn a worker thread")]
    ThreadSpawn(#[source] io::Error),
    #[error("a task panicked: {0}")]
    TaskPanic(String),
}

/// Everything shared between the controller loops, the worker fibers, and
/// the submission API.
pub(crate) struct TaskSystemState {
    pub(crate) queue: ConcurrentQueue<Task>,
    pub(crate) queue_immediate: ConcurrentQueue<Task>,
    /// Cleared by the kernel fiber on return, or by a controller observing
    /// a task panic; every loop exits at its next iteration boundary.
    pub(crate) exec_flag: AtomicBool,
    thread_count: usize,
    task_count: AtomicUsize,
    task_immediate_count: AtomicUsize,
    task_panic: Mutex<Option<Box<dyn Any + Send>>>,
}

impl TaskSystemState {
    fn new(desc: &TaskSystemDesc) -> TaskSystemState {
        TaskSystemState {
            queue: ConcurrentQueue::new(desc.queue_size),
            queue_immediate: ConcurrentQueue::new(desc.queue_immediate_size),
            exec_flag: AtomicBool::new(true),
            thread_count: desc.thread_count,
            task_count: AtomicUsize::new(0),
            task_immediate_count: AtomicUsize::new(0),
            task_panic: Mutex::new(None),
        }
    }

    /// Fail-fast on an escaped task panic: keep the first payload and stop
    /// every controller loop.
    pub(crate) fn record_task_panic(&self, payload: Box<dyn Any + Send>) {
        error!("task panicked, shutting the task system down");

        let mut slot = self.task_panic.lock();
        if slot.is_none() {
            *slot = Some(payload);
        }
        drop(slot);

        self.exec_flag.store(false, Ordering::Release);
    }

    fn has_task_panic(&self) -> bool {
        self.task_panic.lock().is_some()
    }

    fn take_task_panic(&self) -> Option<Box<dyn Any + Send>> {
        self.task_panic.lock().take()
    }

    fn report(&self) -> TaskSystemReport {
        TaskSystemReport {
            task_immediate_count: self.task_immediate_count.load(Ordering::Relaxed),
            task_count: self.task_count.load(Ordering::Relaxed),
        }
    }
}

/// Process-wide pointer to the running system's state. Installed before the
/// worker threads are spawned, cleared after they join; `run`, `wait_for`
/// and `thread_count` must only be called in between.
static TASK_SYSTEM: AtomicPtr<TaskSystemState> = AtomicPtr::new(ptr::null_mut());

struct GlobalStateGuard;

impl GlobalStateGuard {
    fn install(state: &TaskSystemState) -> Result<GlobalStateGuard, TaskSystemError> {
        let state_ptr = state as *const TaskSystemState as *mut TaskSystemState;
        TASK_SYSTEM
            .compare_exchange(
                ptr::null_mut(),
                state_ptr,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| TaskSystemError::AlreadyRunning)?;
        Ok(GlobalStateGuard)
    }
}

impl Drop for GlobalStateGuard {
    fn drop(&mut self) {
        TASK_SYSTEM.store(ptr::null_mut(), Ordering::Release);
    }
}

fn with_state<R>(f: impl FnOnce(&TaskSystemState) -> R) -> R {
    let state_ptr = TASK_SYSTEM.load(Ordering::Acquire);
    assert!(!state_ptr.is_null(), "no task system is running");

    // SAFETY: a non-null pointer means `launch` is still on some thread's
    // stack with the state alive; the guard clears the pointer before the
    // state is dropped, and the API contract restricts callers to the
    // running window.
    f(unsafe { &*state_ptr })
}

/// Launches the task system and runs `kernel_entry` on its kernel fiber.
///
/// Blocks until the kernel entry returns and every worker thread joins,
/// then reports the submission totals. The kernel entry is the root of all
/// work: when it returns, controllers stop dispatching, the launching
/// thread drains whatever is still queued, and the queues are unlatched so
/// no sleeper outlives the system.
pub fn launch<F>(desc: &TaskSystemDesc, kernel_entry: F) -> Result<TaskSystemReport, TaskSystemError>
where
    F: FnOnce() + Send + 'static,
{
    desc.validate()?;

    let state = TaskSystemState::new(desc);
    let state_ptr = SendPtr::new(&state);

    let fiber_pool =
        worker::make_fiber_pool(state_ptr, desc.fiber_count, desc.fiber_stack_byte_count)
            .map_err(TaskSystemError::StackAllocation)?;
    let wait_list = WaitList::new(desc.fiber_count);

    let _global_guard = GlobalStateGuard::install(&state)?;

    debug!(
        thread_count = desc.thread_count,
        fiber_count = desc.fiber_count,
        "launching task system"
    );

    let core_ids = if desc.pin_threads {
        core_affinity::get_core_ids().unwrap_or_default()
    } else {
        Vec::new()
    };

    thread::scope(|scope| -> Result<(), TaskSystemError> {
        let state = &state;
        let fiber_pool = &fiber_pool;
        let wait_list = &wait_list;

        for index in 1..desc.thread_count {
            let core_id = core_ids.get(index % core_ids.len().max(1)).copied();
            let spawned = thread::Builder::new()
                .name(format!("fibersched-worker-{index}"))
                .spawn_scoped(scope, move || {
                    if let Some(core_id) = core_id {
                        core_affinity::set_for_current(core_id);
                    }
                    worker::worker_thread_controller(state, fiber_pool, wait_list);
                });

            if let Err(spawn_error) = spawned {
                state.exec_flag.store(false, Ordering::Release);
                return Err(TaskSystemError::ThreadSpawn(spawn_error));
            }
        }

        if let Some(core_id) = core_ids.first().copied() {
            core_affinity::set_for_current(core_id);
        }

        let kernel_fiber = match worker::make_kernel_fiber(
            state_ptr,
            desc.fiber_stack_byte_count,
            kernel_entry,
        ) {
            Ok(kernel_fiber) => kernel_fiber,
            Err(stack_error) => {
                state.exec_flag.store(false, Ordering::Release);
                return Err(TaskSystemError::StackAllocation(stack_error));
            }
        };

        worker::main_thread_controller(state, fiber_pool, wait_list, kernel_fiber);

        // Tasks still queued when the kernel returned run here, on the
        // launching thread, before the workers are released.
        if !state.has_task_panic() {
            drain_queues(state);
        }

        state.queue.set_wait_allowed(false);
        state.queue_immediate.set_wait_allowed(false);
        Ok(())
    })?;

    if let Some(payload) = state.take_task_panic() {
        return Err(TaskSystemError::TaskPanic(panic_message(payload.as_ref())));
    }

    let report = state.report();
    debug!(
        task_count = report.task_count,
        task_immediate_count = report.task_immediate_count,
        "task system stopped"
    );
    Ok(report)
}

fn drain_queues(state: &TaskSystemState) {
    loop {
        if let Some(task) = state.queue_immediate.try_pop() {
            task.execute();
        } else if let Some(task) = state.queue.try_pop() {
            task.execute();
        } else {
            break;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Submits a batch of tasks to the regular queue.
///
/// If `wait_counter` is given it must be zero (unused or finished); it is
/// set to the batch size before any task is enqueued, and each task
/// decrements it on completion.
pub fn run<I>(tasks: I, wait_counter: Option<&WaitCounter>)
where
    I: IntoIterator<Item = TaskDesc>,
{
    with_state(|state| {
        submit(&state.queue, &state.task_count, tasks, wait_counter);
    });
}

/// Submits a batch of tasks to the immediate queue, which worker fibers
/// drain strictly before the regular one.
pub fn run_immediate<I>(tasks: I, wait_counter: Option<&WaitCounter>)
where
    I: IntoIterator<Item = TaskDesc>,
{
    with_state(|state| {
        submit(
            &state.queue_immediate,
            &state.task_immediate_count,
            tasks,
            wait_counter,
        );
    });
}

fn submit<I>(
    queue: &ConcurrentQueue<Task>,
    submitted_total: &AtomicUsize,
    tasks: I,
    wait_counter: Option<&WaitCounter>,
) where
    I: IntoIterator<Item = TaskDesc>,
{
    let descs: Vec<TaskDesc> = tasks.into_iter().collect();
    assert!(
        !descs.is_empty(),
        "a submission batch must contain at least one task"
    );

    if let Some(counter) = wait_counter {
        debug_assert!(
            counter.is_zero(),
            "submitting onto a wait counter that is still in use"
        );
        counter.set(descs.len());
    }

    let count = descs.len();
    queue.push_batch(
        descs
            .into_iter()
            .map(|desc| Task::new(desc, wait_counter.cloned())),
    );

    submitted_total.fetch_add(count, Ordering::Relaxed);
}

/// Suspends the current fiber until `counter` reaches zero.
///
/// Must be called from task or kernel code, never from a controller.
/// Returns immediately when the counter is already zero; otherwise the
/// fiber is parked and this call returns, possibly on a different thread,
/// once every task of the batch has finished.
pub fn wait_for(counter: &WaitCounter) {
    with_state(|_state| {
        assert!(
            fiber::in_fiber(),
            "wait_for must be called from a task or the kernel entry"
        );

        if counter.is_zero() {
            return;
        }

        worker::set_pending_wait(counter.clone());
        fiber::switch_to_controller();

        debug_assert!(counter.is_zero());
    });
}

/// Number of OS threads the running system was configured with.
pub fn thread_count() -> usize {
    with_state(|state| state.thread_count)
}
