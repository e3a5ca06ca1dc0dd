//! The abstract channel engine shared by the array and conflated channels.
//!
//! `Engine<T, S>` owns the waiter queues, the close/cancel protocol and the
//! rendezvous handoff; `S: ChannelShape<T>` supplies only the buffer policy
//! (how an offered value is stored, how a polled value is produced). This
//! mirrors how the teacher keeps `Inner<T>` generic over nothing but lets a
//! single lock-free queue implementation serve every buffer size; here the
//! buffer policy is what varies instead.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::error::{CloseCause, RecvError, SendError, TryRecvError, TrySendError};
use crate::log::trace;
use crate::spinlock::Spinlock;
use crate::waiter::{
    drain_receivers_closed, drain_senders_closed, RecvOutcome, ReceiveWaiter, SelectState,
    SendOutcome, SendWaiter,
};
use crate::waitqueue::WaitQueue;

/// The buffer policy of one concrete channel shape.
///
/// Implementations never suspend and never call into user code other than
/// moving `T` values around; every call happens with the engine's spinlock
/// held.
pub(crate) trait ChannelShape<T>: Send {
    /// Attempts to place `value` into the channel without suspending the
    /// caller. `receivers` is the engine's receiver waitlist, which the
    /// shape may consult to hand the value directly to a waiting consumer.
    fn offer(&mut self, value: T, receivers: &mut WaitQueue<ReceiveWaiter<T>>) -> OfferResult<T>;

    /// Attempts to take a value out of the channel without suspending the
    /// caller. `senders` is the engine's sender waitlist, which the shape
    /// may consult to promote a queued producer's element into a freed slot.
    fn poll(&mut self, senders: &mut WaitQueue<SendWaiter<T>>) -> PollResult<T>;

    fn is_empty(&self) -> bool;
    fn is_full(&self) -> bool;

    /// Discards every buffered element (used by `cancel`).
    fn clear(&mut self);
}

pub(crate) enum OfferResult<T> {
    /// The value was stored in the buffer.
    Buffered,
    /// The value was handed directly to a waiting receiver, which must be
    /// `complete()`-d once the lock is released.
    Delivered(Arc<ReceiveWaiter<T>>),
    /// The buffer has no room and no receiver is waiting.
    Full(T),
}

pub(crate) struct PollMatch<T> {
    pub(crate) value: T,
    /// A sender promoted into the slot the poll just freed, if any; must be
    /// `complete()`-d once the lock is released.
    pub(crate) promoted_sender: Option<Arc<SendWaiter<T>>>,
}

pub(crate) enum PollResult<T> {
    Ready(PollMatch<T>),
    Empty,
}

struct EngineCore<T, S> {
    shape: S,
    senders: WaitQueue<SendWaiter<T>>,
    receivers: WaitQueue<ReceiveWaiter<T>>,
    closed: bool,
    cause: Option<CloseCause>,
}

pub(crate) struct Engine<T, S> {
    core: Spinlock<EngineCore<T, S>>,
    sender_count: AtomicUsize,
}

impl<T, S: ChannelShape<T>> Engine<T, S> {
    pub(crate) fn new(shape: S, sender_count: usize) -> Self {
        Engine {
            core: Spinlock::new(EngineCore {
                shape,
                senders: WaitQueue::new(),
                receivers: WaitQueue::new(),
                closed: false,
                cause: None,
            }),
            sender_count: AtomicUsize::new(sender_count),
        }
    }

    pub(crate) fn inc_sender_count(&self) {
        self.sender_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns `true` if this was the last sender, in which case the caller
    /// should close the channel gracefully.
    pub(crate) fn dec_sender_count(&self) -> bool {
        self.sender_count.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub(crate) fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut guard = self.core.lock();
        if guard.closed {
            let cause = guard.cause.clone();
            drop(guard);
            return Err(TrySendError::Closed(value, cause));
        }
        let core = &mut *guard;
        match core.shape.offer(value, &mut core.receivers) {
            OfferResult::Buffered => Ok(()),
            OfferResult::Delivered(receiver) => {
                drop(guard);
                receiver.complete();
                Ok(())
            }
            OfferResult::Full(value) => Err(TrySendError::Full(value)),
        }
    }

    pub(crate) fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut guard = self.core.lock();
        let core = &mut *guard;
        match core.shape.poll(&mut core.senders) {
            PollResult::Ready(m) => {
                drop(guard);
                if let Some(sender) = m.promoted_sender {
                    sender.complete();
                }
                Ok(m.value)
            }
            PollResult::Empty => {
                if core.closed {
                    let cause = core.cause.clone();
                    drop(guard);
                    Err(TryRecvError::Closed(cause))
                } else {
                    drop(guard);
                    Err(TryRecvError::Empty)
                }
            }
        }
    }

    /// Polls a send operation, registering `*waiter_slot` on first
    /// suspension. Pass `select` to make this clause part of a select.
    pub(crate) fn poll_send(
        &self,
        value_slot: &mut Option<T>,
        waiter_slot: &mut Option<Arc<SendWaiter<T>>>,
        select: Option<Arc<SelectState>>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), SendError<T>>> {
        if let Some(waiter) = waiter_slot {
            if !waiter.is_claimed() {
                waiter.set_waker(cx.waker());
                return Poll::Pending;
            }
            let outcome = waiter
                .take_outcome()
                .expect("claimed send waiter without outcome");
            return match outcome {
                SendOutcome::Delivered => Poll::Ready(Ok(())),
                SendOutcome::Closed(cause) => Poll::Ready(Err(SendError {
                    value: waiter.take_value().expect("closed send waiter kept its value"),
                    cause,
                })),
            };
        }

        let value = value_slot.take().expect("send future polled after completion");
        let mut guard = self.core.lock();
        if guard.closed {
            if !Self::win_select_if_present(&select) {
                drop(guard);
                return Poll::Pending;
            }
            let cause = guard.cause.clone();
            drop(guard);
            return Poll::Ready(Err(SendError { value, cause }));
        }

        // A select clause must win the at-most-one-winner race *before* it
        // mutates any shared state, so a losing clause leaves the channel
        // untouched (spec.md P7). When this offer would suspend instead
        // (`would_suspend`), no state is mutated here regardless, and the
        // race is instead decided later by the waiter's own two-phase claim
        // (see `SendWaiter::try_claim`), once the lock is held by whichever
        // side actually pairs with it.
        let would_suspend = guard.shape.is_full() && guard.receivers.is_empty();
        if !would_suspend && !Self::win_select_if_present(&select) {
            drop(guard);
            return Poll::Pending;
        }

        let core = &mut *guard;
        match core.shape.offer(value, &mut core.receivers) {
            OfferResult::Buffered => {
                drop(guard);
                Poll::Ready(Ok(()))
            }
            OfferResult::Delivered(receiver) => {
                drop(guard);
                receiver.complete();
                Poll::Ready(Ok(()))
            }
            OfferResult::Full(value) => {
                let waiter = SendWaiter::new(value, cx.waker().clone(), select);
                guard.senders.push_back(waiter.clone());
                drop(guard);
                *waiter_slot = Some(waiter);
                Poll::Pending
            }
        }
    }

    /// Attempts to win `select`'s at-most-once election, if this operation is
    /// part of one. Always `true` for a plain (non-select) operation.
    fn win_select_if_present(select: &Option<Arc<SelectState>>) -> bool {
        match select {
            Some(select) => select.try_select(),
            None => true,
        }
    }

    /// Polls a receive operation, registering `*waiter_slot` on first
    /// suspension. Pass `select` to make this clause part of a select.
    pub(crate) fn poll_recv(
        &self,
        waiter_slot: &mut Option<Arc<ReceiveWaiter<T>>>,
        select: Option<Arc<SelectState>>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<T, RecvError>> {
        if let Some(waiter) = waiter_slot {
            if !waiter.is_claimed() {
                waiter.set_waker(cx.waker());
                return Poll::Pending;
            }
            let outcome = waiter
                .take_outcome()
                .expect("claimed receive waiter without outcome");
            return match outcome {
                RecvOutcome::Delivered(value) => Poll::Ready(Ok(value)),
                RecvOutcome::Closed(cause) => Poll::Ready(Err(RecvError { cause })),
            };
        }

        let mut guard = self.core.lock();

        // Symmetric to `poll_send`: only contend for the select win when this
        // poll is actually about to resolve (buffered value, or the channel
        // is closed and drained); a poll that would suspend instead defers
        // the race to the eventual `ReceiveWaiter::try_claim`.
        let would_suspend = guard.shape.is_empty() && guard.senders.is_empty();
        if !would_suspend && !Self::win_select_if_present(&select) {
            drop(guard);
            return Poll::Pending;
        }

        let core = &mut *guard;
        match core.shape.poll(&mut core.senders) {
            PollResult::Ready(m) => {
                drop(guard);
                if let Some(sender) = m.promoted_sender {
                    sender.complete();
                }
                Poll::Ready(Ok(m.value))
            }
            PollResult::Empty => {
                if guard.closed {
                    if !Self::win_select_if_present(&select) {
                        drop(guard);
                        return Poll::Pending;
                    }
                    let cause = guard.cause.clone();
                    drop(guard);
                    Poll::Ready(Err(RecvError { cause }))
                } else {
                    let waiter = ReceiveWaiter::new(cx.waker().clone(), select);
                    guard.receivers.push_back(waiter.clone());
                    drop(guard);
                    *waiter_slot = Some(waiter);
                    Poll::Pending
                }
            }
        }
    }

    pub(crate) fn cancel_recv_waiter(&self, waiter: &Arc<ReceiveWaiter<T>>) {
        let mut core = self.core.lock();
        core.receivers.remove(waiter);
    }

    pub(crate) fn cancel_send_waiter(&self, waiter: &Arc<SendWaiter<T>>) {
        let mut core = self.core.lock();
        core.senders.remove(waiter);
    }

    /// Closes the channel gracefully (`cause = None`) or because of an
    /// explicit application-level close with a cause. Returns `false` if the
    /// channel was already closed. Per spec.md I3, a cause set by a previous
    /// close or cancel is never overwritten.
    pub(crate) fn close(&self, cause: Option<CloseCause>) -> bool {
        let mut core = self.core.lock();
        if core.closed {
            trace!("close: already closed, ignoring");
            return false;
        }
        core.closed = true;
        core.cause = Some(cause.unwrap_or_else(CloseCause::graceful));
        let close_cause = core.cause.clone();

        let senders_to_wake = drain_senders_closed(&mut core.senders, close_cause.clone());

        // Receivers are only resumed with the close marker once the buffer
        // has drained; a non-empty buffer is still fair game for `recv`.
        let receivers_to_wake = if core.shape.is_empty() {
            drain_receivers_closed(&mut core.receivers, close_cause)
        } else {
            Vec::new()
        };

        trace!(
            woken_senders = senders_to_wake.len(),
            woken_receivers = receivers_to_wake.len(),
            "channel closed"
        );

        drop(core);
        for s in senders_to_wake {
            s.complete();
        }
        for r in receivers_to_wake {
            r.complete();
        }
        true
    }

    /// Closes the channel (if not already closed) and unconditionally
    /// discards any buffered elements, resuming every waiting receiver with
    /// the close cause immediately rather than waiting for the buffer to
    /// drain naturally.
    pub(crate) fn cancel(&self, cause: CloseCause) {
        let mut core = self.core.lock();
        if !core.closed {
            core.closed = true;
            core.cause = Some(cause);
        }
        let effective_cause = core.cause.clone();
        core.shape.clear();

        let senders_to_wake = drain_senders_closed(&mut core.senders, effective_cause.clone());
        let receivers_to_wake = drain_receivers_closed(&mut core.receivers, effective_cause);

        trace!(
            woken_senders = senders_to_wake.len(),
            woken_receivers = receivers_to_wake.len(),
            "channel cancelled, buffer discarded"
        );

        drop(core);
        for s in senders_to_wake {
            s.complete();
        }
        for r in receivers_to_wake {
            r.complete();
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.core.lock().shape.is_empty()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.core.lock().shape.is_full()
    }

    pub(crate) fn is_closed_for_send(&self) -> bool {
        self.core.lock().closed
    }

    pub(crate) fn is_closed_for_receive(&self) -> bool {
        let core = self.core.lock();
        core.closed && core.shape.is_empty()
    }

    pub(crate) fn close_cause(&self) -> Option<CloseCause> {
        self.core.lock().cause.clone()
    }

    pub(crate) fn with_shape<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.core.lock().shape)
    }
}
