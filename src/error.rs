//! Error and close-cause types shared by the array and conflated channels.

use std::error;
use std::fmt;
use std::sync::Arc;

/// The reason a channel was closed.
///
/// A channel closed gracefully (all senders dropped, or an explicit
/// `close(None)`) carries no cause. A channel closed via
/// [`cancel`](crate::engine::Engine) carries the cause supplied by the
/// caller, shared cheaply across every waiter that observes the closure.
#[derive(Clone)]
pub struct CloseCause(Option<Arc<dyn error::Error + Send + Sync + 'static>>);

impl PartialEq for CloseCause {
    // Two graceful closes compare equal; two cancellations compare equal
    // only if they share the same cause (by identity, not by value — the
    // boxed cause isn't required to implement `PartialEq`).
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl CloseCause {
    pub(crate) fn graceful() -> Self {
        CloseCause(None)
    }

    pub(crate) fn cancelled(cause: Arc<dyn error::Error + Send + Sync + 'static>) -> Self {
        CloseCause(Some(cause))
    }

    /// Returns the cancellation cause, if any.
    pub fn cause(&self) -> Option<&(dyn error::Error + Send + Sync + 'static)> {
        self.0.as_deref()
    }

    /// Returns `true` if the channel was closed because of an explicit
    /// cancellation (as opposed to a graceful close).
    pub fn is_cancellation(&self) -> bool {
        self.0.is_some()
    }
}

impl fmt::Debug for CloseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(cause) => f.debug_tuple("Cancelled").field(cause).finish(),
            None => f.write_str("Closed"),
        }
    }
}

impl fmt::Display for CloseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(cause) => write!(f, "cancelled: {cause}"),
            None => "closed".fmt(f),
        }
    }
}

/// An error returned when an attempt to send a message synchronously is
/// unsuccessful.
#[derive(Clone, Debug, PartialEq)]
pub enum TrySendError<T> {
    /// The channel has no free capacity and no waiting receiver.
    Full(T),
    /// The channel is closed for sending.
    Closed(T, Option<CloseCause>),
}

impl<T> TrySendError<T> {
    /// Returns the value that failed to be sent.
    pub fn into_inner(self) -> T {
        match self {
            TrySendError::Full(v) => v,
            TrySendError::Closed(v, _) => v,
        }
    }
}

impl<T: fmt::Debug> error::Error for TrySendError<T> {}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => "Full(..)".fmt(f),
            TrySendError::Closed(..) => "Closed(..)".fmt(f),
        }
    }
}

/// An error returned when an attempt to receive a message synchronously is
/// unsuccessful.
#[derive(Clone, Debug, PartialEq)]
pub enum TryRecvError {
    /// The channel currently holds no element.
    Empty,
    /// The channel is closed for receiving and drained.
    Closed(Option<CloseCause>),
}

impl error::Error for TryRecvError {}

impl fmt::Display for TryRecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryRecvError::Empty => "receiving from an empty channel".fmt(f),
            TryRecvError::Closed(_) => "receiving from a closed channel".fmt(f),
        }
    }
}

/// An error returned when an attempt to send a message asynchronously is
/// unsuccessful because the channel is closed for sending.
#[derive(Clone, PartialEq)]
pub struct SendError<T> {
    /// The value that could not be delivered.
    pub value: T,
    /// The cause of the closure, if the channel was cancelled rather than
    /// closed gracefully.
    pub cause: Option<CloseCause>,
}

impl<T: fmt::Debug> error::Error for SendError<T> {}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendError").finish_non_exhaustive()
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "sending into a cancelled channel: {cause}"),
            None => "sending into a closed channel".fmt(f),
        }
    }
}

/// An error returned when an attempt to receive a message asynchronously is
/// unsuccessful because the channel is closed for receiving.
#[derive(Clone, Debug, PartialEq)]
pub struct RecvError {
    /// The cause of the closure, if the channel was cancelled rather than
    /// closed gracefully.
    pub cause: Option<CloseCause>,
}

impl error::Error for RecvError {}

impl fmt::Display for RecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "receiving from a cancelled channel: {cause}"),
            None => "receiving from a closed channel".fmt(f),
        }
    }
}
