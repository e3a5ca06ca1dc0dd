//! A short-duration spinlock guarding buffer and waiter-queue state.
//!
//! The channel engine never suspends a thread while holding this lock: the
//! only operations performed under it are pointer-sized reads/writes to the
//! ring buffer or slot, and push/pop/removal on the waiter queues. Resuming a
//! waiter (calling [`std::task::Waker::wake`][Waker::wake]) always happens
//! after the guard has been dropped.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};

use crossbeam_utils::Backoff;

use crate::loom_exports::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

/// A simple test-and-test-and-set spinlock.
///
/// Modeled on the spinlock used internally by crossbeam-channel to guard its
/// per-channel waiter registries; appropriate here because the protected
/// critical sections are O(1) or O(log capacity) and never call into user
/// code.
pub(crate) struct Spinlock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// Safety: access to `data` is only ever granted through `lock`, which
// enforces mutual exclusion via `locked`.
unsafe impl<T: Send> Send for Spinlock<T> {}
unsafe impl<T: Send> Sync for Spinlock<T> {}

impl<T> Spinlock<T> {
    pub(crate) fn new(data: T) -> Self {
        Spinlock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    pub(crate) fn lock(&self) -> SpinlockGuard<'_, T> {
        let backoff = Backoff::new();
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                backoff.snooze();
            }
        }

        SpinlockGuard { lock: self }
    }
}

pub(crate) struct SpinlockGuard<'a, T> {
    lock: &'a Spinlock<T>,
}

impl<T> Deref for SpinlockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: holding the guard guarantees exclusive access.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: holding the guard guarantees exclusive access.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinlockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}
