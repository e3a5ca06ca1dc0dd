//! The bounded array (FIFO) channel.

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
use crate::waiter::{next_ready_receiver, next_ready_sender, ReceiveWaiter, SelectState, SendWaiter};
use crate::waitqueue::WaitQueue;

/// A growing ring buffer, starting at `min(capacity, 8)` and doubling up to
/// `capacity` the first time more room is needed (spec.md §9).
///
/// Invariant (spec.md I2): `0 <= size <= capacity` and
/// `buffer.len() <= capacity`, with `buffer.len()` monotone non-decreasing.
pub(crate) struct ArrayShape<T: Send> {
    capacity: usize,
    buffer: Vec<Option<T>>,
    head: usize,
    size: usize,
}

impl<T: Send> ArrayShape<T> {
    fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "array channel capacity must be at least 1");
        let initial = capacity.min(8);
        ArrayShape {
            capacity,
            buffer: (0..initial).map(|_| None).collect(),
            head: 0,
            size: 0,
        }
    }

    fn ensure_room_for(&mut self, needed: usize) {
        if needed <= self.buffer.len() {
            return;
        }
        let mut new_len = self.buffer.len().max(1);
        while new_len < needed {
            new_len = (new_len * 2).min(self.capacity);
        }
        let mut new_buffer: Vec<Option<T>> = (0..new_len).map(|_| None).collect();
        for (i, slot) in new_buffer.iter_mut().enumerate().take(self.size) {
            let idx = (self.head + i) % self.buffer.len();
            *slot = self.buffer[idx].take();
        }
        self.buffer = new_buffer;
        self.head = 0;
    }

    fn tail_index(&self) -> usize {
        (self.head + self.size) % self.buffer.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }
}

impl<T: Send> ChannelShape<T> for ArrayShape<T> {
    fn offer(&mut self, value: T, receivers: &mut WaitQueue<ReceiveWaiter<T>>) -> OfferResult<T> {
        if self.size == self.capacity {
            return OfferResult::Full(value);
        }

        // Tentatively reserve the slot before peeking the receiver queue
        // (spec.md §4.5): a receiver that is about to enqueue races against
        // this increment under the same lock, so there is no window in
        // which both sides see an empty queue and a full buffer.
        self.ensure_room_for(self.size + 1);
        let tail = self.tail_index();
        self.buffer[tail] = Some(value);
        self.size += 1;

        // A receiver may already be queued (it raced ahead of us while the
        // buffer was momentarily empty); hand it the element we just stored
        // instead of leaving it parked.
        if let Some(receiver) = next_ready_receiver(receivers) {
            let value = self.buffer[tail].take().expect("slot just written");
            self.size -= 1;
            receiver.deliver(value);
            return OfferResult::Delivered(receiver);
        }
        OfferResult::Buffered
    }

    fn poll(&mut self, senders: &mut WaitQueue<SendWaiter<T>>) -> PollResult<T> {
        if self.size == 0 {
            return PollResult::Empty;
        }
        let was_full = self.size == self.capacity;
        let value = self.buffer[self.head].take().expect("head slot should hold a value");
        self.head = (self.head + 1) % self.buffer.len();
        self.size -= 1;

        let mut promoted_sender = None;
        if was_full {
            if let Some((sender, sender_value)) = next_ready_sender(senders) {
                let tail = self.tail_index();
                self.buffer[tail] = Some(sender_value);
                self.size += 1;
                promoted_sender = Some(sender);
            }
        }
        PollResult::Ready(PollMatch {
            value,
            promoted_sender,
        })
    }

    fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn is_full(&self) -> bool {
        self.size == self.capacity
    }

    fn clear(&mut self) {
        for slot in &mut self.buffer {
            *slot = None;
        }
        self.size = 0;
        self.head = 0;
    }
}

struct Shared<T: Send> {
    engine: Engine<T, ArrayShape<T>>,
}

/// Creates a bounded, FIFO array channel of the given capacity.
///
/// # Panics
///
/// Panics if `capacity` is zero; rendezvous (capacity-0) channels are out of
/// scope for this crate.
pub fn array_channel<T: Send>(capacity: usize) -> (ArraySender<T>, ArrayReceiver<T>) {
    let shared = Arc::new(Shared {
        engine: Engine::new(ArrayShape::new(capacity), 1),
    });
    (
        ArraySender {
            shared: shared.clone(),
        },
        ArrayReceiver { shared },
    )
}

/// The sending half of an [`array_channel`].
pub struct ArraySender<T: Send> {
    shared: Arc<Shared<T>>,
}

impl<T: Send> ArraySender<T> {
    /// Attempts to send `value` without suspending.
    ///
    /// Succeeds immediately if the element is handed directly to a waiting
    /// receiver or fits into the buffer; otherwise returns
    /// [`TrySendError::Full`] without touching the channel.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        self.shared.engine.try_send(value)
    }

    /// Sends `value`, suspending until buffer space or a waiting receiver
    /// becomes available, or the channel is closed.
    pub fn send(&self, value: T) -> ArraySendFuture<'_, T> {
        ArraySendFuture {
            engine: &self.shared.engine,
            value: Some(value),
            waiter: None,
            select: None,
        }
    }

    /// Returns a [`select_send`](crate::select_send) clause sending `value`.
    pub fn on_send(&self, value: T) -> ArraySendFuture<'_, T> {
        self.send(value)
    }

    /// Closes the channel for sending, optionally attaching a cause. Queued
    /// senders are resumed with the close marker; queued receivers are
    /// resumed once the buffer drains. Returns `false` if the channel was
    /// already closed.
    pub fn close(&self, cause: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>) -> bool {
        self.shared.engine.close(cause.map(CloseCause::cancelled))
    }

    /// Returns `true` once the channel is closed for sending.
    pub fn is_closed(&self) -> bool {
        self.shared.engine.is_closed_for_send()
    }

    /// Returns `true` if the buffer currently holds `capacity` elements and
    /// no receiver is waiting (i.e. the next `try_send` would return `Full`).
    pub fn is_full(&self) -> bool {
        self.shared.engine.is_full()
    }
}

impl<T: Send> Clone for ArraySender<T> {
    fn clone(&self) -> Self {
        self.shared.engine.inc_sender_count();
        ArraySender {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send> Drop for ArraySender<T> {
    fn drop(&mut self) {
        if self.shared.engine.dec_sender_count() {
            self.shared.engine.close(None);
        }
    }
}

impl<T: Send> fmt::Debug for ArraySender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.shared.engine.with_shape(|shape| {
            write!(
                f,
                "ArraySender(buffer:capacity={},size={})",
                shape.capacity(),
                shape.size()
            )
        })
    }
}

/// The receiving half of an [`array_channel`].
pub struct ArrayReceiver<T: Send> {
    shared: Arc<Shared<T>>,
}

impl<T: Send> ArrayReceiver<T> {
    /// Attempts to receive a value without suspending.
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        self.shared.engine.try_recv()
    }

    /// Receives a value, suspending until one is available or the channel is
    /// closed and drained.
    pub fn recv(&mut self) -> ArrayRecvFuture<'_, T> {
        ArrayRecvFuture {
            engine: &self.shared.engine,
            waiter: None,
            select: None,
        }
    }

    /// Returns a [`select_recv`](crate::select_recv) clause for this channel.
    pub fn on_recv(&mut self) -> ArrayRecvFuture<'_, T> {
        self.recv()
    }

    /// Cancels the channel: discards any buffered elements and resumes every
    /// waiting party with `cause` immediately (spec.md §4.3 `cancel`).
    pub fn cancel(&mut self, cause: Arc<dyn std::error::Error + Send + Sync + 'static>) {
        self.shared.engine.cancel(CloseCause::cancelled(cause));
    }

    /// Returns `true` once the channel is closed for receiving (closed and
    /// drained).
    pub fn is_closed(&self) -> bool {
        self.shared.engine.is_closed_for_receive()
    }

    /// Returns `true` if the buffer currently holds no element.
    pub fn is_empty(&self) -> bool {
        self.shared.engine.is_empty()
    }
}

impl<T: Send> Drop for ArrayReceiver<T> {
    fn drop(&mut self) {
        // No further element will ever be consumed; disconnect senders
        // immediately rather than letting them block on a buffer that can
        // no longer drain.
        self.shared.engine.cancel(CloseCause::graceful());
    }
}

impl<T: Send> fmt::Debug for ArrayReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.shared.engine.with_shape(|shape| {
            write!(
                f,
                "ArrayReceiver(buffer:capacity={},size={})",
                shape.capacity(),
                shape.size()
            )
        })
    }
}

impl<T: Send> Stream for ArrayReceiver<T> {
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
    /// The future returned by [`ArraySender::send`] and [`ArraySender::on_send`].
    pub struct ArraySendFuture<'a, T: Send> {
        engine: &'a Engine<T, ArrayShape<T>>,
        value: Option<T>,
        waiter: Option<Arc<SendWaiter<T>>>,
        select: Option<Arc<SelectState>>,
    }

    impl<'a, T: Send> PinnedDrop for ArraySendFuture<'a, T> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(waiter) = this.waiter {
                this.engine.cancel_send_waiter(waiter);
            }
        }
    }
}

impl<'a, T: Send> Future for ArraySendFuture<'a, T> {
    type Output = Result<(), SendError<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        this.engine.poll_send(this.value, this.waiter, this.select.clone(), cx)
    }
}

impl<'a, T: Send> fmt::Debug for ArraySendFuture<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArraySendFuture").finish_non_exhaustive()
    }
}

impl<'a, T: Send> SendSelectClause<T> for ArraySendFuture<'a, T> {
    fn join_select(self: Pin<&mut Self>, group: &SelectGroup) {
        let this = self.project();
        *this.select = Some(group.state());
    }
}

pin_project! {
    /// The future returned by [`ArrayReceiver::recv`] and [`ArrayReceiver::on_recv`].
    pub struct ArrayRecvFuture<'a, T: Send> {
        engine: &'a Engine<T, ArrayShape<T>>,
        waiter: Option<Arc<ReceiveWaiter<T>>>,
        select: Option<Arc<SelectState>>,
    }

    impl<'a, T: Send> PinnedDrop for ArrayRecvFuture<'a, T> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(waiter) = this.waiter {
                this.engine.cancel_recv_waiter(waiter);
            }
        }
    }
}

impl<'a, T: Send> Future for ArrayRecvFuture<'a, T> {
    type Output = Result<T, RecvError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        this.engine.poll_recv(this.waiter, this.select.clone(), cx)
    }
}

impl<'a, T: Send> fmt::Debug for ArrayRecvFuture<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayRecvFuture").finish_non_exhaustive()
    }
}

impl<'a, T: Send> RecvSelectClause<T> for ArrayRecvFuture<'a, T> {
    fn join_select(self: Pin<&mut Self>, group: &SelectGroup) {
        let this = self.project();
        *this.select = Some(group.state());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_executor::block_on;

    #[test]
    fn try_send_try_recv_fifo() {
        let (s, mut r) = array_channel::<i32>(2);
        s.try_send(1).unwrap();
        s.try_send(2).unwrap();
        assert!(matches!(s.try_send(3), Err(TrySendError::Full(3))));
        assert_eq!(r.try_recv().unwrap(), 1);
        assert_eq!(r.try_recv().unwrap(), 2);
        assert!(matches!(r.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn growing_buffer_past_initial_len() {
        let (s, mut r) = array_channel::<i32>(20);
        for i in 0..20 {
            s.try_send(i).unwrap();
        }
        for i in 0..20 {
            assert_eq!(r.try_recv().unwrap(), i);
        }
    }

    #[test]
    fn close_drains_buffer_before_closing_receive_side() {
        let (s, mut r) = array_channel::<i32>(4);
        s.try_send(1).unwrap();
        s.close(None);
        assert_eq!(r.try_recv().unwrap(), 1);
        assert!(matches!(r.try_recv(), Err(TryRecvError::Closed(None))));
    }

    #[test]
    fn last_sender_drop_closes_channel() {
        let (s, mut r) = array_channel::<i32>(1);
        drop(s);
        assert!(matches!(r.try_recv(), Err(TryRecvError::Closed(None))));
    }

    #[test]
    fn send_suspends_when_full_and_resumes_on_recv() {
        let (s, mut r) = array_channel::<i32>(1);
        s.try_send(1).unwrap();
        block_on(async {
            r.try_recv().unwrap();
            let send = s.send(2);
            send.await.unwrap();
        });
        assert_eq!(r.try_recv().unwrap(), 2);
    }

    #[test]
    fn recv_suspends_when_empty_and_resumes_on_send() {
        let (s, mut r) = array_channel::<i32>(1);
        let value = block_on(async {
            s.try_send(42).unwrap();
            r.recv().await.unwrap()
        });
        assert_eq!(value, 42);
    }

    #[test]
    fn cancel_discards_buffer_and_wakes_receiver() {
        #[derive(Debug)]
        struct Oops;
        impl fmt::Display for Oops {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                "oops".fmt(f)
            }
        }
        impl std::error::Error for Oops {}

        let (s, mut r) = array_channel::<i32>(2);
        s.try_send(1).unwrap();
        s.try_send(2).unwrap();
        r.cancel(Arc::new(Oops));

        assert!(matches!(r.try_recv(), Err(TryRecvError::Closed(Some(_)))));
        assert!(matches!(s.try_send(3), Err(TrySendError::Closed(3, Some(_)))));
    }
}
