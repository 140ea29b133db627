//! Generalized bounded semaphore with adjustable bounds.
//!
//! The semaphore holds a signed `value` constrained to `min ..= max`, where
//! both bounds can move at run time. [`Semaphore::up`] blocks until
//! `value < max`, [`Semaphore::down`] blocks until `value > min`; the
//! `*_all` variants move the value to the far bound in one step. Every
//! transition can run a caller-supplied `mutate` callback under the
//! semaphore's lock, atomically with the value change — the deque passes
//! its list manipulation here so list length and semaphore value never
//! disagree.
//!
//! # Waiter notification
//!
//! Each side (up/down) tracks a waiter count and a single
//! notification-pending bit. Freed capacity signals one waiter only if no
//! notification is already outstanding on that side, then sets the bit.
//! The woken waiter clears the bit before re-validating and, if room
//! remains after its own transition, signals the next waiter itself. This
//! chains wakeups through the waiters without the original mutator knowing
//! how many there are, and it guarantees a single freed unit wakes exactly
//! one waiter — the longest-waiting one, since the condition queue is FIFO.
//!
//! A cancelled waiter decrements its side's count and re-triggers
//! notification if capacity is available, so a cancelled exit never
//! swallows a wakeup another waiter is entitled to.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cancel::{CancelError, CancelToken};
use crate::condition::Condition;

/// Error returned by semaphore operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SemaphoreError {
    /// The semaphore has been closed.
    #[error("semaphore closed")]
    Closed,
    /// The supplied cancellation token fired while blocked.
    #[error(transparent)]
    Cancelled(#[from] CancelError),
}

#[derive(Debug, Default)]
struct Side {
    waiters: u32,
    /// The notification-pending bit: set after signalling one waiter,
    /// cleared by the woken waiter before it re-validates.
    notified: bool,
}

#[derive(Debug)]
struct Core {
    min: i32,
    max: i32,
    value: i32,
    up: Side,
    down: Side,
    /// Authoritative closed flag; the atomic outside is only a fast path.
    closed: bool,
}

/// A counting resource gate with independently adjustable bounds.
#[derive(Debug)]
pub struct Semaphore {
    closed: AtomicBool,
    core: Arc<Mutex<Core>>,
    up_cond: Condition<Core>,
    down_cond: Condition<Core>,
}

impl Semaphore {
    /// Creates a semaphore with the given bounds and initial value.
    ///
    /// # Panics
    ///
    /// Panics unless `min <= value <= max`; an out-of-range construction is
    /// a contract violation, not a runtime condition.
    #[must_use]
    pub fn new(min: i32, max: i32, value: i32) -> Self {
        assert!(
            min <= value && value <= max,
            "semaphore: invalid construction: min={min}, max={max}, value={value}"
        );
        let core = Arc::new(Mutex::new(Core {
            min,
            max,
            value,
            up: Side::default(),
            down: Side::default(),
            closed: false,
        }));
        Self {
            closed: AtomicBool::new(false),
            up_cond: Condition::new(Arc::clone(&core)),
            down_cond: Condition::new(Arc::clone(&core)),
            core,
        }
    }

    /// Increments the value by one, blocking while `value == max`.
    ///
    /// `mutate` runs under the lock, atomically with the increment. With
    /// `increase_min` the minimum bound is dragged up by the same amount.
    pub fn up(
        &self,
        token: Option<&CancelToken>,
        increase_min: bool,
        mutate: impl FnOnce(),
    ) -> Result<(), SemaphoreError> {
        self.do_up(token, false, increase_min, |_| mutate())
            .map(|_| ())
    }

    /// Raises the value all the way to `max`, blocking while `value == max`.
    ///
    /// Returns the magnitude moved, which `mutate` also receives.
    pub fn up_all(
        &self,
        token: Option<&CancelToken>,
        increase_min: bool,
        mutate: impl FnOnce(i32),
    ) -> Result<i32, SemaphoreError> {
        self.do_up(token, true, increase_min, mutate)
    }

    /// Decrements the value by one, blocking while `value == min`.
    ///
    /// With `decrease_max` the maximum bound is dragged down by the same
    /// amount — this is the reservation step of the deque's two-phase
    /// removal: the vacated unit is not yet reusable.
    pub fn down(
        &self,
        token: Option<&CancelToken>,
        decrease_max: bool,
        mutate: impl FnOnce(),
    ) -> Result<(), SemaphoreError> {
        self.do_down(token, false, decrease_max, |_| mutate())
            .map(|_| ())
    }

    /// Lowers the value all the way to `min`, blocking while `value == min`.
    ///
    /// Returns the magnitude moved, which `mutate` also receives.
    pub fn down_all(
        &self,
        token: Option<&CancelToken>,
        decrease_max: bool,
        mutate: impl FnOnce(i32),
    ) -> Result<i32, SemaphoreError> {
        self.do_down(token, true, decrease_max, mutate)
    }

    /// Raises the maximum bound by `increment` (no-op if `increment < 1`).
    ///
    /// With `increase_value` the value rises by the same amount. Wakes a
    /// waiter on the side that gained room.
    pub fn increase_max_value(
        &self,
        increment: i32,
        increase_value: bool,
        mutate: impl FnOnce(),
    ) -> Result<(), SemaphoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SemaphoreError::Closed);
        }
        if increment < 1 {
            return Ok(());
        }
        let mut core = self.core.lock();
        if core.closed {
            return Err(SemaphoreError::Closed);
        }
        mutate();
        core.max += increment;
        if increase_value {
            core.value += increment;
            if core.value - increment == core.min {
                self.notify_down(&mut core);
            }
        } else if core.value == core.max - increment {
            self.notify_up(&mut core);
        }
        Ok(())
    }

    /// Lowers the minimum bound by `decrement` (no-op if `decrement < 1`).
    ///
    /// With `decrease_value` the value drops by the same amount. Wakes a
    /// waiter on the side that gained room.
    pub fn decrease_min_value(
        &self,
        decrement: i32,
        decrease_value: bool,
        mutate: impl FnOnce(),
    ) -> Result<(), SemaphoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SemaphoreError::Closed);
        }
        if decrement < 1 {
            return Ok(());
        }
        let mut core = self.core.lock();
        if core.closed {
            return Err(SemaphoreError::Closed);
        }
        mutate();
        core.min -= decrement;
        if decrease_value {
            core.value -= decrement;
            if core.value + decrement == core.max {
                self.notify_up(&mut core);
            }
        } else if core.value == core.min + decrement {
            self.notify_down(&mut core);
        }
        Ok(())
    }

    /// Lowers the maximum bound by `decrement`, clamping the value down to
    /// the new bound if necessary. Returns the (non-positive) value delta,
    /// which `mutate` receives before the state changes so the caller can
    /// release what the clamp evicts.
    ///
    /// # Panics
    ///
    /// Panics if the new maximum would fall below the minimum bound.
    pub fn decrease_max_value(
        &self,
        decrement: i32,
        mutate: impl FnOnce(i32),
    ) -> Result<i32, SemaphoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SemaphoreError::Closed);
        }
        if decrement < 1 {
            return Ok(0);
        }
        let mut core = self.core.lock();
        if core.closed {
            return Err(SemaphoreError::Closed);
        }
        let new_max = core.max - decrement;
        assert!(
            new_max >= core.min,
            "semaphore: decrease_max_value below min: min={}, new max={new_max}",
            core.min
        );
        let delta = if core.value > new_max {
            new_max - core.value
        } else {
            0
        };
        mutate(delta);
        core.value += delta;
        core.max = new_max;
        Ok(delta)
    }

    /// Closes the semaphore: a one-way transition that wakes every waiter
    /// on both sides, each of which then observes the closed state and
    /// returns [`SemaphoreError::Closed`].
    ///
    /// `mutate` runs under the lock before the broadcast. A second close
    /// returns `Closed` and performs no further mutation.
    pub fn close(&self, mutate: impl FnOnce()) -> Result<(), SemaphoreError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(SemaphoreError::Closed);
        }
        let mut core = self.core.lock();
        core.closed = true;
        mutate();
        self.up_cond.broadcast();
        self.down_cond.broadcast();
        tracing::debug!(value = core.value, "semaphore closed");
        Ok(())
    }

    /// Returns true once the semaphore has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Current value.
    #[must_use]
    pub fn value(&self) -> i32 {
        self.core.lock().value
    }

    /// Current minimum bound.
    #[must_use]
    pub fn min_value(&self) -> i32 {
        self.core.lock().min
    }

    /// Current maximum bound.
    #[must_use]
    pub fn max_value(&self) -> i32 {
        self.core.lock().max
    }

    fn do_up(
        &self,
        token: Option<&CancelToken>,
        maximize: bool,
        increase_min: bool,
        mutate: impl FnOnce(i32),
    ) -> Result<i32, SemaphoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SemaphoreError::Closed);
        }
        let mut core = self.core.lock();
        if core.closed {
            return Err(SemaphoreError::Closed);
        }

        // Queue behind existing waiters even if there is room: arrivals on
        // a side are served in FIFO order.
        if core.value == core.max || core.up.waiters > 0 {
            core.up.waiters += 1;
            loop {
                let (guard, waited) = self.up_cond.wait_for(core, token);
                core = guard;
                if let Err(err) = waited {
                    core.up.waiters -= 1;
                    if core.value < core.max {
                        self.notify_up(&mut core);
                    }
                    return Err(err.into());
                }
                if core.closed {
                    return Err(SemaphoreError::Closed);
                }
                core.up.notified = false;
                if core.value < core.max {
                    break;
                }
            }
            core.up.waiters -= 1;
        }

        let increment = if maximize { core.max - core.value } else { 1 };
        mutate(increment);
        core.value += increment;
        if !maximize && core.value < core.max {
            self.notify_up(&mut core);
        }
        if increase_min {
            core.min += increment;
        } else if core.value - increment == core.min {
            self.notify_down(&mut core);
        }
        Ok(increment)
    }

    fn do_down(
        &self,
        token: Option<&CancelToken>,
        maximize: bool,
        decrease_max: bool,
        mutate: impl FnOnce(i32),
    ) -> Result<i32, SemaphoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SemaphoreError::Closed);
        }
        let mut core = self.core.lock();
        if core.closed {
            return Err(SemaphoreError::Closed);
        }

        if core.value == core.min || core.down.waiters > 0 {
            core.down.waiters += 1;
            loop {
                let (guard, waited) = self.down_cond.wait_for(core, token);
                core = guard;
                if let Err(err) = waited {
                    core.down.waiters -= 1;
                    if core.value > core.min {
                        self.notify_down(&mut core);
                    }
                    return Err(err.into());
                }
                if core.closed {
                    return Err(SemaphoreError::Closed);
                }
                core.down.notified = false;
                if core.value > core.min {
                    break;
                }
            }
            core.down.waiters -= 1;
        }

        let decrement = if maximize { core.value - core.min } else { 1 };
        mutate(decrement);
        core.value -= decrement;
        if !maximize && core.value > core.min {
            self.notify_down(&mut core);
        }
        if decrease_max {
            core.max -= decrement;
        } else if core.value + decrement == core.max {
            self.notify_up(&mut core);
        }
        Ok(decrement)
    }

    fn notify_up(&self, core: &mut Core) {
        if core.up.waiters > 0 && !core.up.notified {
            self.up_cond.signal();
            core.up.notified = true;
        }
    }

    fn notify_down(&self, core: &mut Core) {
        if core.down.waiters > 0 && !core.down.notified {
            self.down_cond.signal();
            core.down.notified = true;
        }
    }
}
