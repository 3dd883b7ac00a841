use std::sync::{Mutex, MutexGuard, PoisonError};

/// A value behind a mutex, only reachable through closures run under the lock.
///
/// Poisoning is ignored: callers never run foreign code while holding the
/// lock, so a panic inside a closure cannot leave the value half-updated in
/// a way later readers care about.
#[derive(Debug, Default)]
pub struct Locked<T> {
    inner: Mutex<T>,
}

impl<T> Locked<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub fn read<U>(&self, f: impl FnOnce(&T) -> U) -> U {
        f(&self.guard())
    }

    pub fn write<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        f(&mut self.guard())
    }

    /// Exclusive access without locking, for `Drop` impls and builders.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn guard(&self) -> MutexGuard<'_, T> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> Locked<T> {
    pub fn snapshot(&self) -> T {
        self.read(T::clone)
    }
}
