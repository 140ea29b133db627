//! Cancellation and deadline tokens for blocking operations.
//!
//! Every blocking operation in this crate accepts an `Option<&CancelToken>`.
//! A token fires either when its [`CancelHandle`] is cancelled (or dropped)
//! or when its deadline passes, whichever comes first. Waiters observe the
//! token while suspended by selecting over [`CancelToken::cancelled`] and a
//! fresh deadline receiver; non-blocking paths use the cheap
//! [`CancelToken::is_cancelled`] check.
//!
//! Firing a token wakes every waiter currently selecting on it, and the
//! token stays fired forever afterwards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{at, bounded, never, Receiver, Sender};
use parking_lot::Mutex;

/// Error reported by a fired cancellation token.
///
/// Propagated verbatim through the toolkit: the primitives never reword or
/// wrap it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CancelError {
    /// The token's handle was cancelled (or dropped).
    #[error("operation cancelled")]
    Cancelled,
    /// The token's deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// A cancellation token with an optional deadline.
///
/// Cheap to clone; all clones observe the same fire.
#[derive(Debug, Clone)]
pub struct CancelToken {
    fired: Arc<AtomicBool>,
    /// Becomes ready (by disconnection) when the handle fires.
    /// A `never` channel for deadline-only tokens.
    cancelled: Receiver<()>,
    deadline: Option<Instant>,
}

/// The firing side of a manually cancellable token.
///
/// Dropping the handle fires the token, so a handle can double as a scope
/// guard. `cancel` is idempotent.
#[derive(Debug)]
pub struct CancelHandle {
    fired: Arc<AtomicBool>,
    tx: Mutex<Option<Sender<()>>>,
}

impl CancelToken {
    /// Creates a manually cancellable token and its handle.
    #[must_use]
    pub fn new() -> (Self, CancelHandle) {
        Self::build(None)
    }

    /// Creates a token that fires when `deadline` passes.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            fired: Arc::new(AtomicBool::new(false)),
            cancelled: never(),
            deadline: Some(deadline),
        }
    }

    /// Creates a token that fires after `timeout`.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Creates a token that fires after `timeout` or when the handle is
    /// cancelled, whichever comes first.
    #[must_use]
    pub fn deadline_handle(timeout: Duration) -> (Self, CancelHandle) {
        Self::build(Some(Instant::now() + timeout))
    }

    fn build(deadline: Option<Instant>) -> (Self, CancelHandle) {
        let (tx, rx) = bounded::<()>(0);
        let fired = Arc::new(AtomicBool::new(false));
        let token = Self {
            fired: Arc::clone(&fired),
            cancelled: rx,
            deadline,
        };
        let handle = CancelHandle {
            fired,
            tx: Mutex::new(Some(tx)),
        };
        (token, handle)
    }

    /// Returns true once the token has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.fired.load(Ordering::Acquire)
            || self
                .deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Returns the error a fired token reports.
    ///
    /// An explicit cancel takes precedence over an elapsed deadline when
    /// both have happened.
    #[must_use]
    pub fn error(&self) -> CancelError {
        if self.fired.load(Ordering::Acquire) {
            CancelError::Cancelled
        } else {
            CancelError::DeadlineExceeded
        }
    }

    /// Returns the token's deadline, if it has one.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Receiver that becomes ready when the handle fires.
    ///
    /// Never carries a message; readiness is by disconnection.
    #[must_use]
    pub fn cancelled(&self) -> &Receiver<()> {
        &self.cancelled
    }

    /// Fresh receiver that becomes ready at the deadline.
    ///
    /// A new receiver per wait: `crossbeam` deadline channels deliver a
    /// single message, so sharing one across waiters would lose wakeups.
    #[must_use]
    pub fn deadline_receiver(&self) -> Receiver<Instant> {
        self.deadline.map_or_else(never, at)
    }
}

impl CancelHandle {
    /// Fires the token. Idempotent; wakes every selecting waiter.
    pub fn cancel(&self) {
        self.fired.store(true, Ordering::Release);
        // Dropping the only sender disconnects the channel, which makes
        // every cloned receiver ready at once.
        drop(self.tx.lock().take());
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Select receivers for an optional token: `(cancelled, deadline)`.
///
/// `None` yields a pair of `never` channels, so callers can select
/// unconditionally and wait forever when no token is supplied.
pub(crate) fn select_channels(
    token: Option<&CancelToken>,
) -> (Receiver<()>, Receiver<Instant>) {
    match token {
        Some(token) => (token.cancelled().clone(), token.deadline_receiver()),
        None => (never(), never()),
    }
}
