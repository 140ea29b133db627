//! Paced value pool.
//!
//! A [`DelayPool`] hands out values from a shuffled set at a bounded rate:
//! `reset` grants a budget of `uses` draws spread evenly over
//! `max_total_delay`, and [`DelayPool::get`] sleeps out each draw's share of
//! the budget before returning. The set is cycled if the budget outlasts it.
//! Pacing sleeps honor a cancellation token. Typical use is retry targets:
//! a list of addresses to dial, paced so the whole set is not burned at
//! once.

use std::time::{Duration, Instant};

use rand::seq::SliceRandom;

use crate::cancel::{self, CancelError, CancelToken};

/// Error from [`DelayPool::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The use budget granted by the last `reset` is spent.
    #[error("no more values")]
    Exhausted,
    /// The caller's token fired during the pacing sleep.
    #[error(transparent)]
    Cancelled(#[from] CancelError),
}

/// A pool that paces draws of shuffled values over a time budget.
#[derive(Debug)]
pub struct DelayPool<T> {
    values: Vec<T>,
    uses: usize,
    max_delay: Duration,
    used: usize,
    next_usable_at: Option<Instant>,
}

impl<T> DelayPool<T> {
    /// Creates a pool granting `uses` draws of `values` spread over
    /// `max_total_delay`.
    ///
    /// Asserts that `values` is non-empty, `uses >= 1`, and the delay is
    /// non-zero.
    #[must_use]
    pub fn new(values: Vec<T>, uses: usize, max_total_delay: Duration) -> Self {
        let mut pool = Self {
            values: Vec::new(),
            uses: 0,
            max_delay: Duration::ZERO,
            used: 0,
            next_usable_at: None,
        };
        pool.reset(values, uses, max_total_delay);
        pool
    }

    /// Replaces the value set and re-grants the use budget.
    ///
    /// The values are shuffled so repeated resets do not always lead with
    /// the same draw.
    pub fn reset(&mut self, mut values: Vec<T>, uses: usize, max_total_delay: Duration) {
        assert!(!values.is_empty(), "delaypool: empty value set");
        assert!(uses >= 1, "delaypool: invalid use budget: {uses}");
        assert!(
            !max_total_delay.is_zero(),
            "delaypool: zero total delay"
        );
        values.shuffle(&mut rand::thread_rng());
        self.values = values;
        self.uses = uses;
        self.max_delay = max_total_delay / u32::try_from(uses).unwrap_or(u32::MAX);
        self.used = 0;
    }

    /// Draws the next value after its pacing delay.
    ///
    /// The first draw is immediate; each subsequent draw waits until its
    /// slot of the time budget opens. Once the budget is spent, the first
    /// exhausted call still waits out the final slot (so callers that loop
    /// on `reset` keep the pace), then `Exhausted` is reported.
    pub fn get(&mut self, token: Option<&CancelToken>) -> Result<&T, PoolError> {
        let now = Instant::now();
        if self.used == self.uses {
            if let Some(at) = self.next_usable_at.take() {
                sleep_until(at, token)?;
            }
            return Err(PoolError::Exhausted);
        }

        let ready_at = if self.used == 0 {
            self.next_usable_at = Some(now);
            now
        } else {
            // Set by the previous draw.
            self.next_usable_at.unwrap_or(now)
        };
        let index = self.used % self.values.len();
        self.used += 1;
        self.next_usable_at = Some(ready_at + self.max_delay);
        sleep_until(ready_at, token)?;
        Ok(&self.values[index])
    }

    /// When the next draw becomes usable, if pacing is active.
    #[must_use]
    pub fn next_usable_at(&self) -> Option<Instant> {
        self.next_usable_at
    }
}

/// Cancellable sleep. Sub-millisecond waits are skipped.
fn sleep_until(at: Instant, token: Option<&CancelToken>) -> Result<(), CancelError> {
    if at.saturating_duration_since(Instant::now()) < Duration::from_millis(1) {
        return Ok(());
    }
    let (cancel_rx, deadline_rx) = cancel::select_channels(token);
    crossbeam_channel::select! {
        recv(crossbeam_channel::at(at)) -> _ => Ok(()),
        recv(cancel_rx) -> _ => Err(CancelError::Cancelled),
        recv(deadline_rx) -> _ => Err(CancelError::DeadlineExceeded),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::init_test_logging;

    #[test]
    fn first_draw_is_immediate() {
        init_test_logging();
        let mut pool = DelayPool::new(vec!["a"], 4, Duration::from_secs(4));
        let started = Instant::now();
        assert_eq!(pool.get(None).unwrap(), &"a");
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn draws_are_paced_and_budget_runs_out() {
        init_test_logging();
        let mut pool = DelayPool::new(vec![1, 2], 3, Duration::from_millis(150));
        let started = Instant::now();
        for _ in 0..3 {
            pool.get(None).unwrap();
        }
        assert_eq!(pool.get(None).unwrap_err(), PoolError::Exhausted);
        // Two paced gaps plus the final slot, 50ms each.
        assert!(started.elapsed() >= Duration::from_millis(150));
        // Exhaustion is stable once the final slot is drained.
        assert_eq!(pool.get(None).unwrap_err(), PoolError::Exhausted);
    }

    #[test]
    fn values_cycle_when_budget_outlasts_them() {
        init_test_logging();
        let mut pool = DelayPool::new(vec![7], 3, Duration::from_millis(30));
        for _ in 0..3 {
            assert_eq!(pool.get(None).unwrap(), &7);
        }
    }

    #[test]
    fn pacing_sleep_is_cancellable() {
        init_test_logging();
        let mut pool = DelayPool::new(vec!["a"], 2, Duration::from_secs(10));
        pool.get(None).unwrap();
        let token = CancelToken::with_timeout(Duration::from_millis(30));
        let started = Instant::now();
        let err = pool.get(Some(&token)).unwrap_err();
        assert_eq!(err, PoolError::Cancelled(CancelError::DeadlineExceeded));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn reset_regrants_the_budget() {
        init_test_logging();
        let mut pool = DelayPool::new(vec![1], 1, Duration::from_millis(10));
        pool.get(None).unwrap();
        assert_eq!(pool.get(None).unwrap_err(), PoolError::Exhausted);
        pool.reset(vec![2], 1, Duration::from_millis(10));
        assert_eq!(pool.get(None).unwrap(), &2);
    }

    #[test]
    #[should_panic(expected = "empty value set")]
    fn empty_value_set_is_fatal() {
        let _ = DelayPool::<u32>::new(Vec::new(), 1, Duration::from_secs(1));
    }
}
