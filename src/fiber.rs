//! Stackful fibers: user-space execution contexts with owned stacks.
//!
//! Built on `corosensei`. Each worker thread's controller is the thread's
//! own stack; a [`Fiber`] is a coroutine the controller switches into with
//! [`Fiber::resume`], and fiber code switches back with
//! [`switch_to_controller`]. All scheduling happens between these two
//! switches; there is no preemption.

use std::any::Any;
use std::cell::Cell;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};

use crate::util::SendPtr;

type FiberYielder = Yielder<(), ()>;

thread_local! {
    /// Yielder slot of the fiber currently running on this thread, or null
    /// when the thread is executing its controller.
    static CURRENT_FIBER: Cell<*const Cell<*const FiberYielder>> =
        const { Cell::new(ptr::null()) };
}

/// Why control returned from [`Fiber::resume`].
pub(crate) enum FiberState {
    /// The fiber switched back to the controller and can be resumed again.
    Yielded,
    /// The fiber's entry returned; the fiber is spent.
    Completed,
    /// The fiber's code panicked; the payload was caught at the resume
    /// boundary and the fiber is spent.
    Panicked(Box<dyn Any + Send>),
}

/// A stackful execution context.
///
/// The fiber is not runnable until first resumed. It may be resumed from
/// different threads across its lifetime, but never from two threads at
/// once: ownership of the `Fiber` value is what hands it between the
/// controller, the pool, and the wait list.
pub(crate) struct Fiber {
    coroutine: Coroutine<(), (), ()>,
    /// Written once by the coroutine on first entry; boxed so the address
    /// stays stable while the `Fiber` value itself moves between owners.
    yielder: Box<Cell<*const FiberYielder>>,
}

// SAFETY: the yielder slot is only dereferenced by the thread currently
// resuming the fiber, and resumes are serialized by ownership of the value.
unsafe impl Send for Fiber {}

impl Fiber {
    /// Creates a fiber with a freshly allocated stack of `stack_bytes` and
    /// the given entry. The entry's return is itself the final switch back
    /// to the controller.
    pub(crate) fn new<F>(stack_bytes: usize, entry: F) -> io::Result<Fiber>
    where
        F: FnOnce() + Send + 'static,
    {
        let stack = DefaultStack::new(stack_bytes)?;

        let yielder = Box::new(Cell::new(ptr::null()));
        let slot = SendPtr::new(&*yielder);

        let coroutine = Coroutine::with_stack(stack, move |fiber_yielder, ()| {
            // SAFETY: the slot lives in the owning `Fiber`'s box, which
            // outlives the coroutine it holds.
            unsafe {
                (*slot.get()).set(fiber_yielder as *const FiberYielder);
            }
            entry();
        });

        Ok(Fiber { coroutine, yielder })
    }

    /// Switches the current thread into the fiber. Control comes back when
    /// the fiber suspends, returns, or panics.
    pub(crate) fn resume(&mut self) -> FiberState {
        CURRENT_FIBER.set(&*self.yielder as *const Cell<*const FiberYielder>);

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.coroutine.resume(())));

        CURRENT_FIBER.set(ptr::null());

        match result {
            Ok(CoroutineResult::Yield(())) => FiberState::Yielded,
            Ok(CoroutineResult::Return(())) => FiberState::Completed,
            Err(payload) => FiberState::Panicked(payload),
        }
    }
}

/// Whether the calling code runs inside a fiber (as opposed to a thread's
/// controller context).
pub(crate) fn in_fiber() -> bool {
    !CURRENT_FIBER.get().is_null()
}

/// Suspends the currently running fiber, returning control to the
/// controller that resumed it. Control comes back here when some controller
/// resumes the fiber again, possibly on a different thread.
pub(crate) fn switch_to_controller() {
    let slot = CURRENT_FIBER.get();
    assert!(
        !slot.is_null(),
        "switch_to_controller called outside a fiber"
    );

    // SAFETY: `slot` points into the currently running fiber's yielder box,
    // and the yielder was stored by the fiber entry before any suspension
    // point could be reached.
    unsafe {
        let fiber_yielder = (*slot).get();
        debug_assert!(!fiber_yielder.is_null());
        (*fiber_yielder).suspend(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn resume_runs_to_completion() {
        let steps = Arc::new(AtomicUsize::new(0));
        let steps_clone = steps.clone();

        let mut fiber = Fiber::new(64 * 1024, move || {
            steps_clone.fetch_add(1, Ordering::SeqCst);
        })
        .expect("stack allocation");

        assert!(matches!(fiber.resume(), FiberState::Completed));
        assert_eq!(steps.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn suspension_round_trip() {
        let steps = Arc::new(AtomicUsize::new(0));
        let steps_clone = steps.clone();

        let mut fiber = Fiber::new(64 * 1024, move || {
            steps_clone.fetch_add(1, Ordering::SeqCst);
            switch_to_controller();
            steps_clone.fetch_add(1, Ordering::SeqCst);
        })
        .expect("stack allocation");

        assert!(matches!(fiber.resume(), FiberState::Yielded));
        assert_eq!(steps.load(Ordering::SeqCst), 1);

        assert!(matches!(fiber.resume(), FiberState::Completed));
        assert_eq!(steps.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn controller_context_is_not_a_fiber() {
        assert!(!in_fiber());

        let mut fiber = Fiber::new(64 * 1024, || {
            assert!(in_fiber());
        })
        .expect("stack allocation");

        assert!(matches!(fiber.resume(), FiberState::Completed));
        assert!(!in_fiber());
    }

    #[test]
    fn panic_is_caught_at_the_resume_boundary() {
        let mut fiber = Fiber::new(64 * 1024, || {
            panic!("boom");
        })
        .expect("stack allocation");

        match fiber.resume() {
            FiberState::Panicked(payload) => {
                assert_eq!(payload.downcast_ref::<&str>(), Some(&"boom"));
            }
            _ => panic!("expected a panicked fiber"),
        }
    }
}
