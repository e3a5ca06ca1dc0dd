//! Waiter nodes and the two-phase claim/complete handoff.
//!
//! A waiter is claimed (phase 1: `try_claim*`) while the owning channel's
//! lock is held, and completed (phase 2: `complete`, which calls
//! [`Waker::wake`]) only after the lock has been dropped. This keeps the
//! lock's critical sections free of arbitrary executor code.
//!
//! Select clauses additionally carry a [`SelectState`]: a flag shared by
//! every clause of one `select` call, independent of any single channel's
//! lock, so that two clauses racing on two different channels still agree
//! on exactly one winner.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::Waker;

use crate::error::CloseCause;
use crate::loom_exports::cell::UnsafeCell;
use crate::waitqueue::WaitQueue;

/// At-most-once winner election shared by every clause of one `select` call.
pub(crate) struct SelectState {
    won: AtomicBool,
}

impl SelectState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(SelectState {
            won: AtomicBool::new(false),
        })
    }

    /// Returns `true` for exactly one caller across every clause contending
    /// on this state.
    pub(crate) fn try_select(&self) -> bool {
        self.won
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

pub(crate) enum SendOutcome {
    Delivered,
    Closed(Option<CloseCause>),
}

/// A producer suspended because the buffer was full and no receiver was
/// waiting.
pub(crate) struct SendWaiter<T> {
    claimed: AtomicBool,
    value: UnsafeCell<Option<T>>,
    outcome: UnsafeCell<Option<SendOutcome>>,
    waker: UnsafeCell<Option<Waker>>,
    select: Option<Arc<SelectState>>,
}

// Safety: every access to the `UnsafeCell` fields happens while the owning
// channel's spinlock is held (see `engine.rs`), which serializes them.
unsafe impl<T: Send> Send for SendWaiter<T> {}
unsafe impl<T: Send> Sync for SendWaiter<T> {}

impl<T> SendWaiter<T> {
    pub(crate) fn new(value: T, waker: Waker, select: Option<Arc<SelectState>>) -> Arc<Self> {
        Arc::new(SendWaiter {
            claimed: AtomicBool::new(false),
            value: UnsafeCell::new(Some(value)),
            outcome: UnsafeCell::new(None),
            waker: UnsafeCell::new(Some(waker)),
            select,
        })
    }

    /// Phase 1: claims the waiter for ordinary delivery, taking its value.
    /// Fails if a sibling select clause already won, or the waiter was
    /// already claimed.
    pub(crate) fn try_claim(&self) -> Option<T> {
        if let Some(select) = &self.select {
            if !select.try_select() {
                return None;
            }
        }
        if self.claimed.swap(true, Ordering::AcqRel) {
            return None;
        }
        unsafe { self.outcome.with_mut(|o| *o = Some(SendOutcome::Delivered)) };
        unsafe { self.value.with_mut(|v| (*v).take()) }
    }

    /// Phase 1: claims the waiter for close-resumption, leaving the value in
    /// place so the caller can hand it back via [`SendError`](crate::error::SendError).
    pub(crate) fn try_claim_closed(&self, cause: Option<CloseCause>) -> bool {
        if let Some(select) = &self.select {
            if !select.try_select() {
                return false;
            }
        }
        if self.claimed.swap(true, Ordering::AcqRel) {
            return false;
        }
        unsafe { self.outcome.with_mut(|o| *o = Some(SendOutcome::Closed(cause))) };
        true
    }

    pub(crate) fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    pub(crate) fn set_waker(&self, waker: &Waker) {
        unsafe {
            self.waker.with_mut(|w| match &mut *w {
                Some(existing) if existing.will_wake(waker) => {}
                slot => *slot = Some(waker.clone()),
            })
        }
    }

    /// Phase 2: wakes the polling task. Must run outside any channel lock.
    pub(crate) fn complete(&self) {
        let waker = unsafe { self.waker.with_mut(|w| (*w).take()) };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    pub(crate) fn take_outcome(&self) -> Option<SendOutcome> {
        unsafe { self.outcome.with_mut(|o| (*o).take()) }
    }

    /// Retrieves the original value after a close-resumption (the value was
    /// left untouched by `try_claim_closed`).
    pub(crate) fn take_value(&self) -> Option<T> {
        unsafe { self.value.with_mut(|v| (*v).take()) }
    }
}

pub(crate) enum RecvOutcome<T> {
    Delivered(T),
    Closed(Option<CloseCause>),
}

/// A consumer suspended because the buffer was empty and no sender was
/// waiting.
pub(crate) struct ReceiveWaiter<T> {
    claimed: AtomicBool,
    outcome: UnsafeCell<Option<RecvOutcome<T>>>,
    waker: UnsafeCell<Option<Waker>>,
    select: Option<Arc<SelectState>>,
}

unsafe impl<T: Send> Send for ReceiveWaiter<T> {}
unsafe impl<T: Send> Sync for ReceiveWaiter<T> {}

impl<T> ReceiveWaiter<T> {
    pub(crate) fn new(waker: Waker, select: Option<Arc<SelectState>>) -> Arc<Self> {
        Arc::new(ReceiveWaiter {
            claimed: AtomicBool::new(false),
            outcome: UnsafeCell::new(None),
            waker: UnsafeCell::new(Some(waker)),
            select,
        })
    }

    /// Phase 1: reserves the right to deliver a value into this waiter.
    pub(crate) fn try_claim(&self) -> bool {
        if let Some(select) = &self.select {
            if !select.try_select() {
                return false;
            }
        }
        !self.claimed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn deliver(&self, value: T) {
        unsafe { self.outcome.with_mut(|o| *o = Some(RecvOutcome::Delivered(value))) };
    }

    pub(crate) fn deliver_closed(&self, cause: Option<CloseCause>) {
        unsafe { self.outcome.with_mut(|o| *o = Some(RecvOutcome::Closed(cause))) };
    }

    pub(crate) fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    pub(crate) fn set_waker(&self, waker: &Waker) {
        unsafe {
            self.waker.with_mut(|w| match &mut *w {
                Some(existing) if existing.will_wake(waker) => {}
                slot => *slot = Some(waker.clone()),
            })
        }
    }

    pub(crate) fn complete(&self) {
        let waker = unsafe { self.waker.with_mut(|w| (*w).take()) };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    pub(crate) fn take_outcome(&self) -> Option<RecvOutcome<T>> {
        unsafe { self.outcome.with_mut(|o| (*o).take()) }
    }
}

/// Pops receivers until one successfully claims, discarding any that lost a
/// concurrent select race along the way.
pub(crate) fn next_ready_receiver<T>(
    queue: &mut WaitQueue<ReceiveWaiter<T>>,
) -> Option<Arc<ReceiveWaiter<T>>> {
    while let Some(r) = queue.pop_front() {
        if r.try_claim() {
            return Some(r);
        }
    }
    None
}

/// Pops senders until one successfully claims, returning its value.
pub(crate) fn next_ready_sender<T>(
    queue: &mut WaitQueue<SendWaiter<T>>,
) -> Option<(Arc<SendWaiter<T>>, T)> {
    while let Some(s) = queue.pop_front() {
        if let Some(value) = s.try_claim() {
            return Some((s, value));
        }
    }
    None
}

/// Drains every still-queued sender, resuming each with the close marker.
/// Returns the waiters that must be `complete()`-d once the lock is dropped.
pub(crate) fn drain_senders_closed<T>(
    queue: &mut WaitQueue<SendWaiter<T>>,
    cause: Option<CloseCause>,
) -> Vec<Arc<SendWaiter<T>>> {
    let mut woken = Vec::new();
    while let Some(s) = queue.pop_front() {
        if s.try_claim_closed(cause.clone()) {
            woken.push(s);
        }
    }
    woken
}

/// Drains every still-queued receiver, resuming each with the close marker.
pub(crate) fn drain_receivers_closed<T>(
    queue: &mut WaitQueue<ReceiveWaiter<T>>,
    cause: Option<CloseCause>,
) -> Vec<Arc<ReceiveWaiter<T>>> {
    let mut woken = Vec::new();
    while let Some(r) = queue.pop_front() {
        if r.try_claim() {
            r.deliver_closed(cause.clone());
            woken.push(r);
        }
    }
    woken
}
