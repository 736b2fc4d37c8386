//! # fibersched - Fiber-Based Cooperative Task Execution Engine
//!
//! A fixed pool of worker threads runs user-supplied tasks drawn from
//! shared queues. A task may suspend itself until a batch of other tasks
//! completes without blocking the thread it runs on: suspension switches
//! between user-space stackful contexts (fibers), so one thread multiplexes
//! many logically blocked tasks.
//!
//! ## Architecture
//!
//! Each thread runs a controller loop on its own stack. The controller
//! switches into a fiber; the fiber pops a task from the immediate or the
//! regular queue and runs it; when the task returns or calls [`wait_for`],
//! control switches back and the controller decides what to run next:
//! resume a parked fiber whose counter reached zero, or keep dispatching
//! fresh work. All scheduling is cooperative; there is no preemption.
//!
//! The launching thread additionally runs the kernel fiber, a one-shot
//! fiber executing the user entry passed to [`launch`]. When that entry
//! returns the whole system drains and shuts down.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use fibersched::{launch, run, wait_for, TaskDesc, TaskSystemDesc, WaitCounter};
//!
//! let report = launch(&TaskSystemDesc::default(), || {
//!     let total = Arc::new(AtomicUsize::new(0));
//!     let counter = WaitCounter::new();
//!
//!     let tasks = (0..100).map(|_| {
//!         let total = total.clone();
//!         TaskDesc::new(move || {
//!             total.fetch_add(1, Ordering::Relaxed);
//!         })
//!     });
//!     run(tasks, Some(&counter));
//!
//!     wait_for(&counter);
//!     assert_eq!(total.load(Ordering::Relaxed), 100);
//! })
//! .expect("launch");
//!
//! assert_eq!(report.task_count, 100);
//! ```

pub mod counter;
pub mod queue;
pub mod task;
pub mod task_system;

mod fiber;
mod fiber_pool;
mod util;
mod wait_list;
mod worker;

pub use counter::WaitCounter;
pub use queue::ConcurrentQueue;
pub use task::TaskDesc;
pub use task_system::{
    TaskSystemDesc, TaskSystemError, TaskSystemReport, launch, run, run_immediate, thread_count,
    wait_for,
};
