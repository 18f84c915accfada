//! Single-shot, cancellable rendezvous between one waiter and one signaler.
//!
//! ```text
//! idle ──arm──▶ armed(waker) ──fire──▶ fired
//!   │               │
//!   └─────cancel────┴──────────────▶ cancelled
//! ```
//!
//! `fire` and `cancel` race for the same transition and report whether they
//! won it; the loser is a no-op.
//!
//! # Early fire
//!
//! A plain rendezvous drops a `fire` that arrives while the gate is still
//! idle. This gate deliberately departs from that: an idle `fire` moves
//! straight to `fired`, so the waiter observes it on its first poll instead
//! of parking forever. [`AsyncMutex`](crate::AsyncMutex) arms before it can
//! be fired and behaves the same either way.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

#[derive(Debug)]
enum GateState {
    Idle,
    Armed(Waker),
    Fired,
    Cancelled,
}

/// Outcome observed by the waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    Fired,
    Cancelled,
}

/// One-shot wait primitive. See the module docs for the state machine.
#[derive(Debug)]
pub struct AsyncGate {
    state: Mutex<GateState>,
}

impl AsyncGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Idle),
        }
    }

    fn state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register (or refresh) the waiter's waker and report a terminal
    /// outcome if one has already been reached.
    pub fn poll_wait(&self, cx: &mut Context<'_>) -> Poll<GateOutcome> {
        let mut state = self.state();
        match &mut *state {
            GateState::Fired => return Poll::Ready(GateOutcome::Fired),
            GateState::Cancelled => return Poll::Ready(GateOutcome::Cancelled),
            GateState::Armed(waker) => {
                if !waker.will_wake(cx.waker()) {
                    *waker = cx.waker().clone();
                }
                return Poll::Pending;
            }
            GateState::Idle => {}
        }
        *state = GateState::Armed(cx.waker().clone());
        Poll::Pending
    }

    /// Wait until the gate fires or is cancelled.
    pub fn wait(&self) -> Wait<'_> {
        Wait { gate: self }
    }

    /// Fire the gate, waking the armed waiter.
    ///
    /// Returns `false` if the gate had already fired or been cancelled.
    pub fn fire(&self) -> bool {
        let waker = {
            let mut state = self.state();
            match std::mem::replace(&mut *state, GateState::Fired) {
                GateState::Armed(waker) => Some(waker),
                GateState::Idle => None,
                previous @ (GateState::Fired | GateState::Cancelled) => {
                    *state = previous;
                    return false;
                }
            }
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// Cancel the gate without waking anyone.
    ///
    /// Returns `false` if the gate already fired: the signal was delivered
    /// and the caller now owns whatever it stood for.
    pub fn cancel(&self) -> bool {
        let mut state = self.state();
        match *state {
            GateState::Fired => false,
            GateState::Cancelled => true,
            _ => {
                *state = GateState::Cancelled;
                true
            }
        }
    }

    pub fn is_fired(&self) -> bool {
        matches!(*self.state(), GateState::Fired)
    }
}

impl Default for AsyncGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Future returned by [`AsyncGate::wait`].
#[derive(Debug)]
pub struct Wait<'a> {
    gate: &'a AsyncGate,
}

impl Future for Wait<'_> {
    type Output = GateOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.gate.poll_wait(cx)
    }
}
