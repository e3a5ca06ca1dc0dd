//! Multi-way choice (`select`) over several pending channel clauses
//! (spec.md §4.4).
//!
//! A clause is an in-flight `send`/`recv` future ([`ArraySendFuture`](crate::ArraySendFuture),
//! [`ConflatedRecvFuture`](crate::ConflatedRecvFuture), etc.) returned by a
//! channel's `on_send`/`on_recv` method. [`select_recv`] and [`select_send`]
//! join a fixed set of clauses to one shared [`SelectGroup`] election and
//! race them: the first to resolve wins, and every other clause is dropped
//! without having mutated its channel (spec.md P7). A clause still queued as
//! a waiter when it loses is cancelled exactly like any other dropped
//! `recv`/`send` future — see the `PinnedDrop` impls in `array.rs` and
//! `conflated.rs`.
//!
//! This crate exposes `select` as a pair of plain async functions over a
//! `Vec` of boxed clauses rather than a `select!` macro, matching
//! spec.md's restated non-goal that the macro's proc-macro sugar is out of
//! scope; the underlying at-most-one-winner coordination is the same either
//! way.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::error::{RecvError, SendError};
use crate::waiter::SelectState;

/// The shared election every clause of one [`select_recv`]/[`select_send`]
/// call contends on.
///
/// Opaque to callers; obtained only through [`RecvSelectClause::join_select`]
/// / [`SendSelectClause::join_select`], which `select_recv`/`select_send`
/// invoke on every clause before the first poll.
pub struct SelectGroup(Arc<SelectState>);

impl SelectGroup {
    fn new() -> Self {
        SelectGroup(SelectState::new())
    }

    pub(crate) fn state(&self) -> Arc<SelectState> {
        self.0.clone()
    }
}

impl fmt::Debug for SelectGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectGroup").finish_non_exhaustive()
    }
}

/// A clause of a [`select_recv`] call.
///
/// Implemented by the `recv` futures of every channel shape in this crate;
/// not meant to be implemented outside it.
pub trait RecvSelectClause<T>: Future<Output = Result<T, RecvError>> {
    /// Joins `group`'s election. Must be called before this clause is first
    /// polled; `select_recv` handles this.
    fn join_select(self: Pin<&mut Self>, group: &SelectGroup);
}

/// A clause of a [`select_send`] call.
///
/// Implemented by the `send` futures of every channel shape in this crate;
/// not meant to be implemented outside it.
pub trait SendSelectClause<T>: Future<Output = Result<(), SendError<T>>> {
    /// Joins `group`'s election. Must be called before this clause is first
    /// polled; `select_send` handles this.
    fn join_select(self: Pin<&mut Self>, group: &SelectGroup);
}

/// Races `clauses` to their first winner.
///
/// Every losing clause is dropped once a winner resolves; per spec.md P7,
/// a clause that loses before it has mutated any channel state never gets
/// the chance to, and a clause still queued as a waiter is cancelled exactly
/// like any other dropped `recv` future.
///
/// # Panics
///
/// Panics if `clauses` is empty.
pub async fn select_recv<'a, T>(
    mut clauses: Vec<Pin<Box<dyn RecvSelectClause<T> + 'a>>>,
) -> Result<T, RecvError> {
    assert!(!clauses.is_empty(), "select_recv requires at least one clause");
    let group = SelectGroup::new();
    for clause in &mut clauses {
        clause.as_mut().join_select(&group);
    }
    RaceRecv { clauses }.await
}

/// Races `clauses` to their first winner. See [`select_recv`] for the
/// election and cancellation semantics.
///
/// # Panics
///
/// Panics if `clauses` is empty.
pub async fn select_send<'a, T>(
    mut clauses: Vec<Pin<Box<dyn SendSelectClause<T> + 'a>>>,
) -> Result<(), SendError<T>> {
    assert!(!clauses.is_empty(), "select_send requires at least one clause");
    let group = SelectGroup::new();
    for clause in &mut clauses {
        clause.as_mut().join_select(&group);
    }
    RaceSend { clauses }.await
}

struct RaceRecv<'a, T> {
    clauses: Vec<Pin<Box<dyn RecvSelectClause<T> + 'a>>>,
}

// `Vec<Pin<Box<_>>>` is `Unpin` regardless of what it boxes: the boxed data
// never moves even if the vector reallocates.
impl<'a, T> Future for RaceRecv<'a, T> {
    type Output = Result<T, RecvError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        for clause in this.clauses.iter_mut() {
            if let Poll::Ready(v) = clause.as_mut().poll(cx) {
                return Poll::Ready(v);
            }
        }
        Poll::Pending
    }
}

struct RaceSend<'a, T> {
    clauses: Vec<Pin<Box<dyn SendSelectClause<T> + 'a>>>,
}

impl<'a, T> Future for RaceSend<'a, T> {
    type Output = Result<(), SendError<T>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        for clause in this.clauses.iter_mut() {
            if let Poll::Ready(v) = clause.as_mut().poll(cx) {
                return Poll::Ready(v);
            }
        }
        Poll::Pending
    }
}
