//! Small shared helpers.

/// Raw pointer wrapper that can cross thread and closure boundaries.
///
/// Fiber entry closures outlive the stack frame that creates them only in
/// the trivial sense that they are `'static`; every dereference happens
/// while `launch` is still on the stack and the pointee is alive. Each use
/// site documents that reasoning.
pub(crate) struct SendPtr<T>(*const T);

impl<T> SendPtr<T> {
    pub(crate) fn new(ptr: &T) -> Self {
        SendPtr(ptr as *const T)
    }

    pub(crate) fn get(&self) -> *const T {
        self.0
    }
}

impl<T> Clone for SendPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SendPtr<T> {}

unsafe impl<T> Send for SendPtr<T> {}
unsafe impl<T> Sync for SendPtr<T> {}
