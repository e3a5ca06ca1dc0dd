//! Testable properties and end-to-end scenarios for the array channel
//! (spec.md §8, scenarios A1, A2, A4, A5; properties P1, P2, P4, P5, P6).
//!
//! Note: timer-based tests are disabled for MIRI.

#[cfg(not(miri))]
use std::future::Future;
#[cfg(not(miri))]
use std::task::{Context, Poll};
use std::thread;
#[cfg(not(miri))]
use std::time::Duration;

use chanselect::{array_channel, RecvError, TryRecvError, TrySendError};
use futures_executor::block_on;
#[cfg(not(miri))]
use futures_task::noop_waker;
#[cfg(not(miri))]
use futures_util::pin_mut;

#[cfg(not(miri))]
fn sleep(millis: u64) {
    thread::sleep(Duration::from_millis(millis));
}

// Poll the future once and keep it alive for the specified number of
// milliseconds before it is dropped (to exercise cancellation at a known
// point in time).
#[cfg(not(miri))]
fn poll_once_and_keep_alive<F: Future>(f: F, millis: u64) -> Poll<F::Output> {
    pin_mut!(f);
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);

    let res = f.poll(&mut cx);
    sleep(millis);

    res
}

// A1: bounded FIFO. ArrayChannel(2), producer sends 1,2,3 concurrently with a
// consumer receiving 3 times; the consumer observes 1,2,3 in order.
#[test]
fn a1_bounded_fifo() {
    let (s, mut r) = array_channel(2);

    let th_send = thread::spawn(move || {
        block_on(async {
            s.send(1).await.unwrap();
            s.send(2).await.unwrap();
            s.send(3).await.unwrap();
        });
    });

    let received = block_on(async {
        let mut out = Vec::new();
        for _ in 0..3 {
            out.push(r.recv().await.unwrap());
        }
        out
    });

    assert_eq!(received, vec![1, 2, 3]);
    assert!(r.is_empty());
    th_send.join().unwrap();
}

// A2: blocking then close. ArrayChannel(1); send 10 succeeds, send 20
// suspends; close(None) fails the suspended send with Closed(None); the
// buffered element is still delivered, then the next receive fails.
#[cfg(not(miri))]
#[test]
fn a2_blocking_then_close() {
    let (s1, mut r) = array_channel(1);
    let s2 = s1.clone();
    s1.try_send(10).unwrap();

    let th_send = thread::spawn(move || {
        let err = block_on(s1.send(20)).unwrap_err();
        assert_eq!(err.value, 20);
        assert!(err.cause.is_none());
    });

    sleep(100); // give the second send time to suspend
    assert!(s2.close(None));

    assert_eq!(block_on(r.recv()), Ok(10));
    let err = block_on(r.recv()).unwrap_err();
    assert!(err.cause.is_none());

    th_send.join().unwrap();
}

// P2: capacity. The array channel never holds more than `capacity` elements
// and a `try_send` never succeeds once full without a waiting receiver.
#[test]
fn p2_capacity_never_exceeded() {
    let (s, mut r) = array_channel(3);
    for i in 0..3 {
        s.try_send(i).unwrap();
    }
    assert!(s.is_full());
    assert!(matches!(s.try_send(99), Err(TrySendError::Full(99))));

    for i in 0..3 {
        assert_eq!(r.try_recv().unwrap(), i);
    }
    assert!(r.is_empty());
}

// P4: no duplication, no loss. Four producers each send a disjoint range of
// values; the consumer must observe every one exactly once.
#[test]
fn p4_no_duplication_no_loss() {
    const CAPACITY: usize = 3;
    const COUNT: usize = if cfg!(miri) { 50 } else { 10_000 };
    const PRODUCERS: usize = 4;

    let (s, mut r) = array_channel(CAPACITY);

    let senders: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let s = s.clone();
            thread::spawn(move || {
                block_on(async {
                    for i in 0..COUNT {
                        s.send((p, i)).await.unwrap();
                    }
                });
            })
        })
        .collect();
    drop(s);

    let mut seen = vec![vec![false; COUNT]; PRODUCERS];
    block_on(async {
        for _ in 0..COUNT * PRODUCERS {
            let (p, i) = r.recv().await.unwrap();
            assert!(!seen[p][i], "duplicate delivery of ({p}, {i})");
            seen[p][i] = true;
        }
    });
    assert_eq!(block_on(r.recv()), Err(RecvError { cause: None }));

    for producer in seen {
        assert!(producer.into_iter().all(|v| v), "a value was lost");
    }

    for th in senders {
        th.join().unwrap();
    }
}

// P5: close monotonicity. Once `close` returns `true`, further calls return
// `false`; `try_send` returns `Closed`; `try_recv` drains the buffer, then
// returns `Closed`.
#[test]
fn p5_close_monotonicity() {
    let (s, mut r) = array_channel(2);
    s.try_send(1).unwrap();

    assert!(s.close(None));
    assert!(!s.close(None));

    assert!(matches!(s.try_send(2), Err(TrySendError::Closed(2, None))));
    assert_eq!(r.try_recv(), Ok(1));
    assert!(matches!(r.try_recv(), Err(TryRecvError::Closed(None))));
}

// A4 / A5: rendezvous via waiter, and cancellation safety (P6). A full
// one-slot channel has one sender suspended with a value; cancelling that
// send must not deliver it, and a second, later sender must be the one
// promoted into the freed slot.
#[cfg(not(miri))]
#[test]
fn a5_cancellation_does_not_deliver() {
    let (s1, mut r) = array_channel(1);
    let s2 = s1.clone();
    let s3 = s1.clone();

    s1.try_send(10).unwrap();

    // S2 suspends trying to send 20, then its task is cancelled (the future
    // is dropped without ever completing).
    let th2 = thread::spawn(move || {
        assert!(matches!(poll_once_and_keep_alive(s2.send(20), 100), Poll::Pending));
        // Dropping the future here cancels the send: 20 is never delivered.
    });
    sleep(50);

    // S3 then suspends trying to send 30; once R1 drains the buffered 10, S3
    // (not the cancelled S2) must be the one promoted into the freed slot.
    let th3 = thread::spawn(move || {
        sleep(100);
        block_on(s3.send(30)).unwrap();
    });

    sleep(200);
    assert_eq!(block_on(r.recv()), Ok(10)); // A4: buffered rendezvous.
    assert_eq!(block_on(r.recv()), Ok(30)); // A5: S3, not cancelled S2.
    assert!(r.is_empty());

    th2.join().unwrap();
    th3.join().unwrap();
}

// SPSC stress test, grounded on the teacher's `spsc_stress`.
#[test]
fn spsc_stress() {
    const CAPACITY: usize = 3;
    const COUNT: usize = if cfg!(miri) { 50 } else { 200_000 };

    let (s, mut r) = array_channel(CAPACITY);

    let th_send = thread::spawn(move || {
        block_on(async {
            for i in 0..COUNT {
                s.send(i).await.unwrap();
            }
        });
    });
    let th_recv = thread::spawn(move || {
        block_on(async {
            for i in 0..COUNT {
                assert_eq!(r.recv().await, Ok(i));
            }
        });
        assert!(r.try_recv().is_err());
    });

    th_send.join().unwrap();
    th_recv.join().unwrap();
}

// Channel closed due to the receiver being dropped while a sender is blocked
// on a full channel.
#[cfg(not(miri))]
#[test]
fn blocked_send_after_receiver_drop() {
    let (s1, r) = array_channel(2);
    let s2 = s1.clone();

    block_on(s1.send(3)).unwrap();
    block_on(s1.send(7)).unwrap();

    let th_send1 = thread::spawn(move || {
        assert!(block_on(s1.send(13)).is_err());
    });
    let th_send2 = thread::spawn(move || {
        assert!(block_on(s2.send(42)).is_err());
    });

    sleep(100);
    drop(r);

    th_send1.join().unwrap();
    th_send2.join().unwrap();
}
