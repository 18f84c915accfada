//! FIFO async mutex built from [`AsyncGate`]s.
//!
//! Each contended `lock()` enqueues a gate. Releasing the lock pops gates
//! in arrival order and fires the first one whose waiter is still
//! interested; cancelled waiters are skipped. Ownership passes directly
//! to the fired waiter, so the lock is never observed free in between.
//!
//! Dropping a queued [`Lock`] future cancels its gate. If the gate had
//! already fired, the dropped waiter owned the lock without knowing it and
//! the drop releases it to the next waiter, so cancellation never leaks a
//! held lock.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::future::Future;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use crate::gate::{AsyncGate, GateOutcome};

#[derive(Debug, Default)]
struct LockState {
    locked: bool,
    waiters: VecDeque<Arc<AsyncGate>>,
}

/// Cooperatively scheduled, FIFO-fair mutual exclusion around a `T`.
pub struct AsyncMutex<T: ?Sized> {
    state: Mutex<LockState>,
    value: UnsafeCell<T>,
}

// SAFETY: access to `value` is only handed out through a guard, and at most
// one guard exists at a time (`LockState::locked`).
unsafe impl<T: ?Sized + Send> Send for AsyncMutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for AsyncMutex<T> {}

impl<T> AsyncMutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            value: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: ?Sized> AsyncMutex<T> {
    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Suspend until the caller is the sole holder.
    pub fn lock(&self) -> Lock<'_, T> {
        Lock {
            mutex: self,
            gate: None,
        }
    }

    /// Acquire without waiting, if the lock is free.
    pub fn try_lock(&self) -> Option<AsyncMutexGuard<'_, T>> {
        let mut state = self.state();
        if state.locked {
            return None;
        }
        state.locked = true;
        Some(AsyncMutexGuard::new(self))
    }

    /// Run `body` while holding the lock; released on every exit path.
    pub async fn with_lock<R>(&self, body: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.lock().await;
        body(&mut guard)
    }

    pub fn is_locked(&self) -> bool {
        self.state().locked
    }

    /// Number of queued waiters, including cancelled ones not yet skipped.
    pub fn queued(&self) -> usize {
        self.state().waiters.len()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    /// Hand the lock to the next live waiter, or mark it free.
    fn release(&self) {
        let mut state = self.state();
        while let Some(gate) = state.waiters.pop_front() {
            if gate.fire() {
                return;
            }
        }
        state.locked = false;
    }
}

impl<T: Default> Default for AsyncMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized> std::fmt::Debug for AsyncMutex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("AsyncMutex")
            .field("locked", &state.locked)
            .field("queued", &state.waiters.len())
            .finish_non_exhaustive()
    }
}

/// Future returned by [`AsyncMutex::lock`].
#[must_use = "futures do nothing unless awaited"]
pub struct Lock<'a, T: ?Sized> {
    mutex: &'a AsyncMutex<T>,
    gate: Option<Arc<AsyncGate>>,
}

impl<'a, T: ?Sized> Future for Lock<'a, T> {
    type Output = AsyncMutexGuard<'a, T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(gate) = &this.gate {
            return match gate.poll_wait(cx) {
                Poll::Ready(GateOutcome::Fired) => {
                    this.gate = None;
                    Poll::Ready(AsyncMutexGuard::new(this.mutex))
                }
                Poll::Ready(GateOutcome::Cancelled) => {
                    unreachable!("lock waiter cancelled while still being polled")
                }
                Poll::Pending => Poll::Pending,
            };
        }

        let mut state = this.mutex.state();
        if !state.locked {
            state.locked = true;
            return Poll::Ready(AsyncMutexGuard::new(this.mutex));
        }

        let gate = Arc::new(AsyncGate::new());
        // Arms the gate; a fresh gate cannot be ready yet.
        let _ = gate.poll_wait(cx);
        state.waiters.push_back(gate.clone());
        this.gate = Some(gate);
        Poll::Pending
    }
}

impl<T: ?Sized> Drop for Lock<'_, T> {
    fn drop(&mut self) {
        if let Some(gate) = self.gate.take() {
            if !gate.cancel() {
                // Fired before we could observe it: we hold the lock.
                self.mutex.release();
            }
        }
    }
}

/// RAII guard; dropping it releases the lock.
pub struct AsyncMutexGuard<'a, T: ?Sized> {
    mutex: &'a AsyncMutex<T>,
    _marker: PhantomData<&'a mut T>,
}

impl<'a, T: ?Sized> AsyncMutexGuard<'a, T> {
    fn new(mutex: &'a AsyncMutex<T>) -> Self {
        Self {
            mutex,
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized> Deref for AsyncMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard is proof of exclusive ownership of the lock.
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T: ?Sized> DerefMut for AsyncMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard is proof of exclusive ownership of the lock.
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T: ?Sized> Drop for AsyncMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.release();
    }
}

impl<T: ?Sized + std::fmt::Debug> std::fmt::Debug for AsyncMutexGuard<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&**self, f)
    }
}
