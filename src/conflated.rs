//! The conflated (latest-value-wins) channel.
//!
//! Holds at most one element. A producer never suspends: each `send`
//! overwrites any unreceived element instead of waiting for room
//! (spec.md §4.6). A consumer suspends only while the slot is empty.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use pin_project_lite::pin_project;

use crate::engine::{ChannelShape, Engine, OfferResult, PollMatch, PollResult};
use crate::error::{CloseCause, RecvError, SendError, TryRecvError, TrySendError};
use crate::select::{RecvSelectClause, SelectGroup, SendSelectClause};
use crate::waiter::{next_ready_receiver, ReceiveWaiter, SelectState, SendWaiter};
use crate::waitqueue::WaitQueue;

/// A single slot, conflating successive offers.
pub(crate) struct ConflatedShape<T: Send> {
    slot: Option<T>,
}

impl<T: Send> ConflatedShape<T> {
    fn new() -> Self {
        ConflatedShape { slot: None }
    }
}

impl<T: Send> ChannelShape<T> for ConflatedShape<T> {
    fn offer(&mut self, value: T, receivers: &mut WaitQueue<ReceiveWaiter<T>>) -> OfferResult<T> {
        // Direct handoff bypasses the slot entirely when a receiver is
        // already queued; otherwise the slot is unconditionally overwritten
        // (conflation), which is why `offer` never returns `Full`.
        if let Some(receiver) = next_ready_receiver(receivers) {
            receiver.deliver(value);
            return OfferResult::Delivered(receiver);
        }
        self.slot = Some(value);
        OfferResult::Buffered
    }

    fn poll(&mut self, _senders: &mut WaitQueue<SendWaiter<T>>) -> PollResult<T> {
        match self.slot.take() {
            Some(value) => PollResult::Ready(PollMatch {
                value,
                promoted_sender: None,
            }),
            None => PollResult::Empty,
        }
    }

    fn is_empty(&self) -> bool {
        self.slot.is_none()
    }

    // Never reports "full": an `offer` can always complete immediately by
    // overwriting the slot, so the engine must never suspend a producer on
    // this channel (spec.md "Producers never suspend").
    fn is_full(&self) -> bool {
        false
    }

    fn clear(&mut self) {
        self.slot = None;
    }
}

struct Shared<T: Send> {
    engine: Engine<T, ConflatedShape<T>>,
}

/// Creates a conflated channel: a producer never suspends, and each send
/// overwrites any unreceived element.
pub fn conflated_channel<T: Send>() -> (ConflatedSender<T>, ConflatedReceiver<T>) {
    let shared = Arc::new(Shared {
        engine: Engine::new(ConflatedShape::new(), 1),
    });
    (
        ConflatedSender {
            shared: shared.clone(),
        },
        ConflatedReceiver { shared },
    )
}

/// The sending half of a [`conflated_channel`].
pub struct ConflatedSender<T: Send> {
    shared: Arc<Shared<T>>,
}

impl<T: Send> ConflatedSender<T> {
    /// Sends `value` immediately, overwriting any unreceived element. Never
    /// returns `Full`; only fails if the channel is closed.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        self.shared.engine.try_send(value)
    }

    /// Sends `value`. Never actually suspends unless the channel is closed,
    /// in which case it resolves immediately with an error; exposed as an
    /// `async fn`-shaped API for symmetry with [`ArraySender::send`](crate::ArraySender::send).
    pub fn send(&self, value: T) -> ConflatedSendFuture<'_, T> {
        ConflatedSendFuture {
            engine: &self.shared.engine,
            value: Some(value),
            waiter: None,
            select: None,
        }
    }

    /// Returns a [`select_send`](crate::select_send) clause sending `value`.
    pub fn on_send(&self, value: T) -> ConflatedSendFuture<'_, T> {
        self.send(value)
    }

    /// Closes the channel for sending, optionally attaching a cause. Returns
    /// `false` if already closed.
    pub fn close(&self, cause: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>) -> bool {
        self.shared.engine.close(cause.map(CloseCause::cancelled))
    }

    pub fn is_closed(&self) -> bool {
        self.shared.engine.is_closed_for_send()
    }

    /// Always `true`: a conflated channel has capacity for exactly one
    /// element, and a send that overwrites it never needs to suspend. Unlike
    /// [`ArraySender::is_full`](crate::ArraySender::is_full), this does not
    /// reflect whether the slot currently holds a value — it answers "would
    /// a `try_send` still need to evict something", which for this channel
    /// is unconditionally yes.
    pub fn is_full(&self) -> bool {
        true
    }
}

impl<T: Send> Clone for ConflatedSender<T> {
    fn clone(&self) -> Self {
        self.shared.engine.inc_sender_count();
        ConflatedSender {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send> Drop for ConflatedSender<T> {
    fn drop(&mut self) {
        if self.shared.engine.dec_sender_count() {
            self.shared.engine.close(None);
        }
    }
}

impl<T: Send + fmt::Debug> fmt::Debug for ConflatedSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.shared
            .engine
            .with_shape(|shape| match &shape.slot {
                Some(value) => write!(f, "(value={value:?})"),
                None => write!(f, "(value=<empty>)"),
            })
    }
}

/// The receiving half of a [`conflated_channel`].
pub struct ConflatedReceiver<T: Send> {
    shared: Arc<Shared<T>>,
}

impl<T: Send> ConflatedReceiver<T> {
    /// Attempts to receive the current element without suspending.
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        self.shared.engine.try_recv()
    }

    /// Receives the current element, suspending while the slot is empty.
    pub fn recv(&mut self) -> ConflatedRecvFuture<'_, T> {
        ConflatedRecvFuture {
            engine: &self.shared.engine,
            waiter: None,
            select: None,
        }
    }

    /// Returns a [`select_recv`](crate::select_recv) clause for this channel.
    pub fn on_recv(&mut self) -> ConflatedRecvFuture<'_, T> {
        self.recv()
    }

    /// Cancels the channel: discards the slot and resumes a waiting receiver
    /// with `cause` immediately.
    pub fn cancel(&mut self, cause: Arc<dyn std::error::Error + Send + Sync + 'static>) {
        self.shared.engine.cancel(CloseCause::cancelled(cause));
    }

    pub fn is_closed(&self) -> bool {
        self.shared.engine.is_closed_for_receive()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.engine.is_empty()
    }
}

impl<T: Send> Drop for ConflatedReceiver<T> {
    fn drop(&mut self) {
        self.shared.engine.cancel(CloseCause::graceful());
    }
}

impl<T: Send + fmt::Debug> fmt::Debug for ConflatedReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.shared
            .engine
            .with_shape(|shape| match &shape.slot {
                Some(value) => write!(f, "(value={value:?})"),
                None => write!(f, "(value=<empty>)"),
            })
    }
}

impl<T: Send> Stream for ConflatedReceiver<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        let mut fut = this.recv();
        let fut = unsafe { Pin::new_unchecked(&mut fut) };
        match fut.poll(cx) {
            Poll::Ready(Ok(value)) => Poll::Ready(Some(value)),
            Poll::Ready(Err(_)) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

pin_project! {
    /// The future returned by [`ConflatedSender::send`] and [`ConflatedSender::on_send`].
    pub struct ConflatedSendFuture<'a, T: Send> {
        engine: &'a Engine<T, ConflatedShape<T>>,
        value: Option<T>,
        waiter: Option<Arc<SendWaiter<T>>>,
        select: Option<Arc<SelectState>>,
    }

    impl<'a, T: Send> PinnedDrop for ConflatedSendFuture<'a, T> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(waiter) = this.waiter {
                this.engine.cancel_send_waiter(waiter);
            }
        }
    }
}

impl<'a, T: Send> Future for ConflatedSendFuture<'a, T> {
    type Output = Result<(), SendError<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        this.engine.poll_send(this.value, this.waiter, this.select.clone(), cx)
    }
}

impl<'a, T: Send> fmt::Debug for ConflatedSendFuture<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflatedSendFuture").finish_non_exhaustive()
    }
}

impl<'a, T: Send> SendSelectClause<T> for ConflatedSendFuture<'a, T> {
    fn join_select(self: Pin<&mut Self>, group: &SelectGroup) {
        let this = self.project();
        *this.select = Some(group.state());
    }
}

pin_project! {
    /// The future returned by [`ConflatedReceiver::recv`] and [`ConflatedReceiver::on_recv`].
    pub struct ConflatedRecvFuture<'a, T: Send> {
        engine: &'a Engine<T, ConflatedShape<T>>,
        waiter: Option<Arc<ReceiveWaiter<T>>>,
        select: Option<Arc<SelectState>>,
    }

    impl<'a, T: Send> PinnedDrop for ConflatedRecvFuture<'a, T> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(waiter) = this.waiter {
                this.engine.cancel_recv_waiter(waiter);
            }
        }
    }
}

impl<'a, T: Send> Future for ConflatedRecvFuture<'a, T> {
    type Output = Result<T, RecvError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        this.engine.poll_recv(this.waiter, this.select.clone(), cx)
    }
}

impl<'a, T: Send> fmt::Debug for ConflatedRecvFuture<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflatedRecvFuture").finish_non_exhaustive()
    }
}

impl<'a, T: Send> RecvSelectClause<T> for ConflatedRecvFuture<'a, T> {
    fn join_select(self: Pin<&mut Self>, group: &SelectGroup) {
        let this = self.project();
        *this.select = Some(group.state());
    }
}
