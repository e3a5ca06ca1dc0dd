//! Asynchronous array (bounded-buffer) and conflated channels.
//!
//! This crate provides two channel shapes built on one shared engine:
//!
//! - [`array_channel`]: a fixed-capacity FIFO buffer. Producers suspend when
//!   the buffer is full; consumers suspend when it is empty.
//! - [`conflated_channel`]: a single-slot channel. Producers never suspend —
//!   each send overwrites any unreceived element; consumers suspend only
//!   while the slot is empty.
//!
//! Both are multi-producer, single-consumer: any number of sender handles
//! may be cloned and used from any thread, while each receiver is used from
//! one logical consumer at a time. A [`select_recv`]/[`select_send`] pair
//! lets a consumer or producer race several channel clauses — possibly
//! spanning both shapes — to whichever resolves first, with an at-most-one
//! winner guarantee.
//!
//! # Disconnection
//!
//! A channel is disconnected automatically once every [`ArraySender`] (resp.
//! [`ConflatedSender`]) is dropped, or once its receiver is dropped, or by an
//! explicit `close()`/`cancel()` call. Disconnection is reported through the
//! `Result` of the send/receive operations: once a channel is closed, every
//! further send fails, while a receiver first drains whatever was already
//! buffered and only then starts failing.
//!
//! # Example
//!
//! ```
//! use futures_executor::{block_on, ThreadPool};
//! use chanselect::array_channel;
//!
//! let pool = ThreadPool::new().unwrap();
//! let (s, mut r) = array_channel(3);
//!
//! block_on(async move {
//!     pool.spawn_ok(async move {
//!         assert_eq!(s.send("Hello").await, Ok(()));
//!     });
//!
//!     assert_eq!(r.recv().await, Ok("Hello"));
//! });
//! # std::thread::sleep(std::time::Duration::from_millis(100)); // MIRI bug workaround
//! ```
#![warn(missing_docs, missing_debug_implementations, unreachable_pub)]

mod array;
mod conflated;
mod engine;
mod error;
mod log;
mod loom_exports;
mod select;
mod spinlock;
mod waiter;
mod waitqueue;

pub use array::{array_channel, ArrayReceiver, ArrayRecvFuture, ArraySendFuture, ArraySender};
pub use conflated::{
    conflated_channel, ConflatedReceiver, ConflatedRecvFuture, ConflatedSendFuture, ConflatedSender,
};
pub use error::{CloseCause, RecvError, SendError, TryRecvError, TrySendError};
pub use select::{select_recv, select_send, RecvSelectClause, SelectGroup, SendSelectClause};
