//! Cancellable condition variable with a FIFO wait queue.
//!
//! A [`Condition`] is bound at construction to one `Arc<Mutex<T>>`. Callers
//! must hold that lock on entry to every method; [`Condition::wait_for`]
//! enforces this by taking the guard, releasing it for the duration of the
//! suspension, and re-acquiring it before returning.
//!
//! Each wait enqueues a one-shot event at the tail of the queue. A waiter
//! record is in the queue if and only if it has not been woken:
//! [`Condition::signal`] and [`Condition::broadcast`] unlink the record
//! before delivering its event, so a cancelled wait can tell "already
//! woken" (record gone, report success) from "still queued" (unlink it,
//! report the token's error). A wakeup that races the cancellation token
//! therefore always wins.

use std::sync::Arc;

use crossbeam_channel::{bounded, Sender};
use parking_lot::{Mutex, MutexGuard};

use crate::cancel::{self, CancelError, CancelToken};
use crate::list::List;

/// A FIFO wait queue bound to one external lock.
#[derive(Debug)]
pub struct Condition<T> {
    lock: Arc<Mutex<T>>,
    /// Only touched while the bound lock is held, so this inner mutex is
    /// never contended; it exists to satisfy ownership rules. Lock order
    /// is always bound lock first.
    waiters: Mutex<List<Waiter>>,
}

#[derive(Debug)]
struct Waiter {
    event: Sender<()>,
}

impl<T> Condition<T> {
    /// Binds a new condition to `lock`.
    #[must_use]
    pub fn new(lock: Arc<Mutex<T>>) -> Self {
        Self {
            lock,
            waiters: Mutex::new(List::new()),
        }
    }

    /// Acquires the bound lock.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.lock.lock()
    }

    /// Suspends the caller until woken or until `token` fires.
    ///
    /// `guard` must belong to the bound lock. It is released while the
    /// caller is suspended and re-acquired before returning. `None` waits
    /// indefinitely.
    ///
    /// `Ok(())` means the caller was woken by [`signal`](Self::signal) or
    /// [`broadcast`](Self::broadcast) — including when the token fired in
    /// the same instant, in which case the wakeup wins. The token's error
    /// is returned only if the waiter was still queued when it fired.
    pub fn wait_for<'a>(
        &'a self,
        guard: MutexGuard<'a, T>,
        token: Option<&CancelToken>,
    ) -> (MutexGuard<'a, T>, Result<(), CancelError>) {
        let (event_tx, event_rx) = bounded::<()>(1);
        let key = self.waiters.lock().push_back(Waiter { event: event_tx });
        drop(guard);

        let (cancel_rx, deadline_rx) = cancel::select_channels(token);
        let interrupted = crossbeam_channel::select! {
            recv(event_rx) -> _ => None,
            recv(cancel_rx) -> _ => Some(CancelError::Cancelled),
            recv(deadline_rx) -> _ => Some(CancelError::DeadlineExceeded),
        };

        let guard = self.lock.lock();
        let still_queued = self.waiters.lock().remove(key).is_some();
        let result = match interrupted {
            Some(err) if still_queued => Err(err),
            // Record already unlinked: a wakeup was delivered, and it wins
            // over a simultaneous cancellation.
            _ => Ok(()),
        };
        (guard, result)
    }

    /// Wakes the longest-waiting caller, if any.
    ///
    /// The bound lock must be held.
    pub fn signal(&self) {
        if let Some(waiter) = self.waiters.lock().pop_front() {
            let _ = waiter.event.try_send(());
        }
    }

    /// Wakes every queued caller.
    ///
    /// The bound lock must be held.
    pub fn broadcast(&self) {
        let mut queue = self.waiters.lock();
        while let Some(waiter) = queue.pop_front() {
            let _ = waiter.event.try_send(());
        }
    }
}
