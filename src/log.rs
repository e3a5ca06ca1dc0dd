//! A tracing shim.
//!
//! Instrumentation is kept off the fast path: the engine's lock-protected
//! send/receive/offer/poll machinery never calls into this module. Only the
//! `close`/`cancel` boundaries and waiter-queue bookkeeping do, and only when
//! the `tracing` feature is enabled; otherwise `trace!` expands to nothing.

#[cfg(feature = "tracing")]
macro_rules! trace {
    ($($arg:tt)*) => {
        ::tracing::trace!($($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

pub(crate) use trace;
