// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A single-value completion channel, usable both as a `Future` (for the async `JoinAsync`
//! path) and as a blocking wait (for the worker-thread `Join` path, and for the re-entrant pump's
//! "park on a condition variable" fallback).
//!
//! Grounded in the `Mutex<EventState<T>>` once-event shape used throughout the runtime this
//! crate is descended from, extended with a condition variable since this system additionally
//! needs a true blocking wait (the original only needed async polling).

use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

enum SlotState<T> {
    Pending(Option<Waker>),
    Ready(T),
    Taken,
}

struct Shared<T> {
    state: Mutex<SlotState<T>>,
    condvar: Condvar,
}

/// The write side of a completion channel. Consumed by [`Sender::set`].
pub(crate) struct Sender<T> {
    shared: Arc<Shared<T>>,
}

/// The read side of a completion channel. May be polled as a `Future` or blocked on directly.
#[derive(Clone)]
pub(crate) struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

pub(crate) fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(SlotState::Pending(None)),
        condvar: Condvar::new(),
    });
    (
        Sender {
            shared: shared.clone(),
        },
        Receiver { shared },
    )
}

impl<T> Sender<T> {
    /// Resolves the channel with `value`, waking whoever is polling or blocked on the receiver.
    ///
    /// # Panics
    ///
    /// Panics if called more than once for the same channel.
    pub(crate) fn set(self, value: T) {
        let waker = {
            let mut state = self.shared.state.lock();
            match std::mem::replace(&mut *state, SlotState::Ready(value)) {
                SlotState::Pending(waker) => waker,
                SlotState::Ready(_) | SlotState::Taken => {
                    panic!("joinable_task completion channel set more than once")
                }
            }
        };
        self.shared.condvar.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T> Receiver<T> {
    /// Takes the value without blocking, if it is already present.
    pub(crate) fn try_take(&self) -> Option<T> {
        let mut state = self.shared.state.lock();
        if matches!(&*state, SlotState::Ready(_)) {
            match std::mem::replace(&mut *state, SlotState::Taken) {
                SlotState::Ready(value) => Some(value),
                _ => unreachable!(),
            }
        } else {
            None
        }
    }

    /// Blocks the current thread until the value is ready, then returns it.
    pub(crate) fn block_until_ready(self) -> T {
        let mut state = self.shared.state.lock();
        loop {
            if matches!(&*state, SlotState::Ready(_)) {
                return match std::mem::replace(&mut *state, SlotState::Taken) {
                    SlotState::Ready(value) => value,
                    _ => unreachable!(),
                };
            }
            self.shared.condvar.wait(&mut state);
        }
    }

    /// Blocks the current thread for at most `timeout`, returning whether the value became
    /// ready. Used by the worker-thread `Run` path, which must periodically wake up to drain its
    /// task's own thread-pool queue rather than waiting forever.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.shared.state.lock();
        if matches!(&*state, SlotState::Ready(_)) {
            return true;
        }
        self.shared.condvar.wait_for(&mut state, timeout);
        matches!(&*state, SlotState::Ready(_))
    }
}

impl<T> Future for Receiver<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.state.lock();
        match &mut *state {
            SlotState::Ready(_) => match std::mem::replace(&mut *state, SlotState::Taken) {
                SlotState::Ready(value) => Poll::Ready(value),
                _ => unreachable!(),
            },
            SlotState::Pending(waker) => {
                *waker = Some(cx.waker().clone());
                Poll::Pending
            }
            SlotState::Taken => panic!("joinable_task completion channel polled after completion"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_take_before_set_is_none() {
        let (_tx, rx) = channel::<u32>();
        assert_eq!(rx.try_take(), None);
    }

    #[test]
    fn set_then_try_take() {
        let (tx, rx) = channel::<u32>();
        tx.set(42);
        assert_eq!(rx.try_take(), Some(42));
    }

    #[test]
    fn block_until_ready_from_another_thread() {
        let (tx, rx) = channel::<u32>();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            tx.set(7);
        });
        assert_eq!(rx.block_until_ready(), 7);
        handle.join().unwrap();
    }

    #[test]
    #[should_panic(expected = "set more than once")]
    fn double_set_panics() {
        let (tx, _rx) = channel::<u32>();
        let shared = tx.shared.clone();
        let tx2 = Sender { shared };
        tx.set(1);
        tx2.set(2);
    }
}
