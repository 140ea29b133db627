//! Bounded blocking deque with two-phase node removal.
//!
//! A [`Deque`] composes a [`Semaphore`] with a [`List`]: the semaphore's
//! value is the current length and its bounds are `[0, capacity]`, so
//! insertion blocks on a full deque and removal blocks on an empty one.
//! Every list mutation runs as the semaphore's `mutate` callback, under the
//! semaphore's lock, which keeps `length == list.len()` at every point
//! where no operation is in flight.
//!
//! # Two-phase removal
//!
//! `remove_head(token, without_commitment = true)` unlinks a node and
//! lowers the semaphore's value *and* maximum bound together: the vacated
//! slot is reserved, not freed, so producers cannot reuse it yet. The
//! caller then either [`commit_node_removal`](Deque::commit_node_removal)
//! (restore the bound, finalizing the removal) or
//! [`discard_node_removal`](Deque::discard_node_removal) (relink the node
//! and restore both value and bound, undoing the removal entirely). While a
//! removal is pending, `length()` and `capacity()` both report the slot as
//! gone.

use core::fmt;

use parking_lot::Mutex;

use crate::cancel::{CancelError, CancelToken};
use crate::list::List;
use crate::semaphore::{Semaphore, SemaphoreError};

/// Error returned by deque operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DequeError {
    /// The deque has been closed.
    #[error("deque closed")]
    Closed,
    /// The supplied cancellation token fired while blocked.
    #[error(transparent)]
    Cancelled(#[from] CancelError),
}

impl From<SemaphoreError> for DequeError {
    fn from(err: SemaphoreError) -> Self {
        match err {
            SemaphoreError::Closed => Self::Closed,
            SemaphoreError::Cancelled(cancel) => Self::Cancelled(cancel),
        }
    }
}

/// Error from a failed insertion, handing the rejected value back.
#[derive(Debug)]
pub struct AppendError<T> {
    /// The value that was not inserted.
    pub value: T,
    /// Why the insertion failed.
    pub reason: DequeError,
}

impl<T> fmt::Display for AppendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.reason.fmt(f)
    }
}

impl<T: fmt::Debug> std::error::Error for AppendError<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.reason)
    }
}

/// A bounded, blocking, double-ended queue.
#[derive(Debug)]
pub struct Deque<T> {
    semaphore: Semaphore,
    /// Only touched from `mutate` callbacks running under the semaphore's
    /// lock; the local mutex is never contended.
    list: Mutex<List<T>>,
}

impl<T> Deque<T> {
    /// Creates a deque holding at most `capacity` nodes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` does not fit the semaphore's value range.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = i32::try_from(capacity).expect("deque capacity overflows i32");
        Self {
            semaphore: Semaphore::new(0, capacity, 0),
            list: Mutex::new(List::new()),
        }
    }

    /// Links `value` at the tail, blocking while the deque is full.
    ///
    /// On failure the value comes back inside the error.
    pub fn append_node(
        &self,
        token: Option<&CancelToken>,
        value: T,
    ) -> Result<(), AppendError<T>> {
        self.insert(token, value, false)
    }

    /// Links `value` at the head, blocking while the deque is full.
    pub fn prepend_node(
        &self,
        token: Option<&CancelToken>,
        value: T,
    ) -> Result<(), AppendError<T>> {
        self.insert(token, value, true)
    }

    /// Unlinks and returns the head, blocking while the deque is empty.
    ///
    /// With `without_commitment` the removal is tentative: the slot stays
    /// reserved until committed or discarded.
    pub fn remove_head(
        &self,
        token: Option<&CancelToken>,
        without_commitment: bool,
    ) -> Result<T, DequeError> {
        self.take(token, without_commitment, true)
    }

    /// Unlinks and returns the tail, blocking while the deque is empty.
    pub fn remove_tail(
        &self,
        token: Option<&CancelToken>,
        without_commitment: bool,
    ) -> Result<T, DequeError> {
        self.take(token, without_commitment, false)
    }

    /// Finalizes one tentative removal, releasing its reserved slot.
    pub fn commit_node_removal(&self) -> Result<(), DequeError> {
        self.commit_nodes_removal(1)
    }

    /// Finalizes `count` tentative removals.
    pub fn commit_nodes_removal(&self, count: usize) -> Result<(), DequeError> {
        let count = i32::try_from(count).expect("removal count overflows i32");
        self.semaphore
            .increase_max_value(count, false, || {})
            .map_err(Into::into)
    }

    /// Undoes one tentative removal: relinks `value` (at the head with
    /// `prepend`, else at the tail) and restores both value and bound.
    pub fn discard_node_removal(
        &self,
        value: T,
        prepend: bool,
    ) -> Result<(), AppendError<T>> {
        let mut slot = Some(value);
        let result = self.semaphore.increase_max_value(1, true, || {
            let mut list = self.list.lock();
            if let Some(value) = slot.take() {
                if prepend {
                    list.push_front(value);
                } else {
                    list.push_back(value);
                }
            }
        });
        Self::hand_back(result.map_err(Into::into), slot)
    }

    /// Undoes a batch of tentative removals, splicing `nodes` back in
    /// order (before the head with `prepend`, else after the tail).
    pub fn discard_nodes_removal(
        &self,
        nodes: &mut List<T>,
        prepend: bool,
    ) -> Result<(), DequeError> {
        let count = i32::try_from(nodes.len()).expect("removal count overflows i32");
        self.semaphore
            .increase_max_value(count, true, || {
                let mut list = self.list.lock();
                if prepend {
                    list.prepend(nodes);
                } else {
                    list.append(nodes);
                }
            })
            .map_err(Into::into)
    }

    /// Drains every node into `out`, blocking while the deque is empty.
    ///
    /// Returns the number drained. Same commitment semantics as single
    /// removal.
    pub fn remove_nodes(
        &self,
        token: Option<&CancelToken>,
        without_commitment: bool,
        out: &mut List<T>,
    ) -> Result<usize, DequeError> {
        let drained = self.semaphore.down_all(token, without_commitment, |_| {
            out.append(&mut self.list.lock());
        })?;
        Ok(drained.unsigned_abs() as usize)
    }

    /// Permanently lowers the capacity by `capacity_decrement`.
    ///
    /// If the current length exceeds the new capacity, the excess nodes
    /// are evicted from the head (`remove_front`) or the tail into `out`,
    /// preserving their relative order. Returns the number evicted.
    pub fn shrink(
        &self,
        capacity_decrement: usize,
        remove_front: bool,
        out: &mut List<T>,
    ) -> Result<usize, DequeError> {
        let decrement =
            i32::try_from(capacity_decrement).expect("capacity decrement overflows i32");
        let delta = self.semaphore.decrease_max_value(decrement, |delta| {
            let evict = delta.unsigned_abs() as usize;
            let mut list = self.list.lock();
            if remove_front {
                for _ in 0..evict {
                    if let Some(value) = list.pop_front() {
                        out.push_back(value);
                    }
                }
            } else {
                let mut tail = Vec::with_capacity(evict);
                for _ in 0..evict {
                    if let Some(value) = list.pop_back() {
                        tail.push(value);
                    }
                }
                while let Some(value) = tail.pop() {
                    out.push_back(value);
                }
            }
        })?;
        Ok(delta.unsigned_abs() as usize)
    }

    /// Closes the deque; blocked callers wake and fail with
    /// [`DequeError::Closed`].
    ///
    /// Remaining nodes move into `out` (caller takes ownership) or are
    /// dropped if none is supplied. Returns the number of nodes that were
    /// still linked. A second close fails.
    pub fn close(&self, out: Option<&mut List<T>>) -> Result<usize, DequeError> {
        let mut remaining = 0;
        self.semaphore.close(|| {
            let mut list = self.list.lock();
            remaining = list.len();
            match out {
                Some(out) => out.append(&mut list),
                None => list.clear(),
            }
        })?;
        Ok(remaining)
    }

    /// Current number of linked nodes.
    #[must_use]
    pub fn length(&self) -> usize {
        self.semaphore.value().max(0) as usize
    }

    /// Current capacity, reserved removals excluded.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.semaphore.max_value().max(0) as usize
    }

    /// Returns true once the deque has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    fn insert(
        &self,
        token: Option<&CancelToken>,
        value: T,
        front: bool,
    ) -> Result<(), AppendError<T>> {
        let mut slot = Some(value);
        let result = self.semaphore.up(token, false, || {
            let mut list = self.list.lock();
            if let Some(value) = slot.take() {
                if front {
                    list.push_front(value);
                } else {
                    list.push_back(value);
                }
            }
        });
        Self::hand_back(result.map_err(Into::into), slot)
    }

    fn take(
        &self,
        token: Option<&CancelToken>,
        without_commitment: bool,
        front: bool,
    ) -> Result<T, DequeError> {
        let mut removed = None;
        self.semaphore.down(token, without_commitment, || {
            let mut list = self.list.lock();
            removed = if front {
                list.pop_front()
            } else {
                list.pop_back()
            };
        })?;
        Ok(removed.expect("deque list out of sync with semaphore value"))
    }

    fn hand_back(
        result: Result<(), DequeError>,
        slot: Option<T>,
    ) -> Result<(), AppendError<T>> {
        match result {
            Ok(()) => Ok(()),
            Err(reason) => Err(AppendError {
                value: slot.expect("mutate callback ran despite an error"),
                reason,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::init_test_logging;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    /// Capacity 2, three appends from one thread: the third blocks until a
    /// removal commits, and removal order is FIFO.
    #[test]
    fn third_append_blocks_until_a_slot_frees() {
        init_test_logging();
        let deque = Arc::new(Deque::new(2));
        let appended = Arc::new(AtomicI32::new(0));
        let producer = {
            let deque = Arc::clone(&deque);
            let appended = Arc::clone(&appended);
            thread::spawn(move || {
                for value in 1..=3 {
                    deque.append_node(None, value).unwrap();
                    appended.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert_eq!(appended.load(Ordering::SeqCst), 2);

        let reserved = deque.remove_head(None, true).unwrap();
        assert_eq!(reserved, 1);
        // The reserved slot is not reusable yet.
        thread::sleep(Duration::from_millis(100));
        assert_eq!(appended.load(Ordering::SeqCst), 2);

        deque.commit_node_removal().unwrap();
        producer.join().expect("producer panicked");
        assert_eq!(appended.load(Ordering::SeqCst), 3);

        assert_eq!(deque.remove_head(None, false).unwrap(), 2);
        assert_eq!(deque.remove_head(None, false).unwrap(), 3);
    }

    #[test]
    fn blocked_appends_fail_on_close() {
        init_test_logging();
        let deque = Arc::new(Deque::new(3));
        let closed = Arc::new(AtomicI32::new(0));
        let workers: Vec<_> = (0..10)
            .map(|value| {
                let deque = Arc::clone(&deque);
                let closed = Arc::clone(&closed);
                thread::spawn(move || {
                    if let Err(err) = deque.append_node(None, value) {
                        assert_eq!(err.reason, DequeError::Closed);
                        assert_eq!(err.value, value);
                        closed.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(100));
        deque.close(None).unwrap();
        for worker in workers {
            worker.join().expect("worker panicked");
        }
        assert_eq!(closed.load(Ordering::SeqCst), 7);
    }

    /// Reserve-then-discard restores both the length and the head identity.
    #[test]
    fn discard_restores_length_and_head() {
        init_test_logging();
        let deque = Deque::new(4);
        for value in [10, 20, 30] {
            deque.append_node(None, value).unwrap();
        }

        let head = deque.remove_head(None, true).unwrap();
        assert_eq!(head, 10);
        assert_eq!(deque.length(), 2);
        assert_eq!(deque.capacity(), 3);

        deque.discard_node_removal(head, true).unwrap();
        assert_eq!(deque.length(), 3);
        assert_eq!(deque.capacity(), 4);
        assert_eq!(deque.remove_head(None, false).unwrap(), 10);
    }

    #[test]
    fn batch_removal_commit_and_discard() {
        init_test_logging();
        let deque = Deque::new(8);
        for value in 0..6 {
            deque.append_node(None, value).unwrap();
        }

        let mut drained = List::new();
        let count = deque.remove_nodes(None, true, &mut drained).unwrap();
        assert_eq!(count, 6);
        assert_eq!(deque.length(), 0);
        assert_eq!(deque.capacity(), 2);

        deque.discard_nodes_removal(&mut drained, false).unwrap();
        assert_eq!(deque.length(), 6);
        assert_eq!(deque.capacity(), 8);

        let mut drained = List::new();
        deque.remove_nodes(None, true, &mut drained).unwrap();
        assert_eq!(
            drained.iter().copied().collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4, 5]
        );
        deque.commit_nodes_removal(6).unwrap();
        assert_eq!(deque.capacity(), 8);
        assert_eq!(deque.length(), 0);
    }

    /// Shrinking from the back evicts the most recently appended nodes,
    /// preserving their order.
    #[test]
    fn shrink_evicts_excess_from_the_back() {
        init_test_logging();
        let deque = Deque::new(8);
        for value in 0..6 {
            deque.append_node(None, value).unwrap();
        }

        let mut evicted = List::new();
        let count = deque.shrink(4, false, &mut evicted).unwrap();
        assert_eq!(count, 2);
        assert_eq!(evicted.iter().copied().collect::<Vec<_>>(), vec![4, 5]);
        assert_eq!(deque.length(), 4);
        assert_eq!(deque.capacity(), 4);
    }

    #[test]
    fn shrink_within_length_only_lowers_capacity() {
        init_test_logging();
        let deque = Deque::new(8);
        deque.append_node(None, 1).unwrap();
        let mut evicted = List::new();
        let count = deque.shrink(3, true, &mut evicted).unwrap();
        assert_eq!(count, 0);
        assert!(evicted.is_empty());
        assert_eq!(deque.length(), 1);
        assert_eq!(deque.capacity(), 5);
    }

    /// A zero-capacity deque blocks every append until it is closed.
    #[test]
    fn zero_capacity_blocks_appends() {
        init_test_logging();
        let deque: Arc<Deque<u32>> = Arc::new(Deque::new(0));
        let producer = {
            let deque = Arc::clone(&deque);
            thread::spawn(move || deque.append_node(None, 1))
        };
        thread::sleep(Duration::from_millis(100));
        assert!(!producer.is_finished());
        deque.close(None).unwrap();
        let err = producer.join().expect("producer panicked").unwrap_err();
        assert_eq!(err.reason, DequeError::Closed);
    }

    #[test]
    fn close_hands_remaining_nodes_to_the_caller() {
        init_test_logging();
        let deque = Deque::new(4);
        for value in [7, 8, 9] {
            deque.append_node(None, value).unwrap();
        }
        let mut leftovers = List::new();
        let remaining = deque.close(Some(&mut leftovers)).unwrap();
        assert_eq!(remaining, 3);
        assert_eq!(leftovers.iter().copied().collect::<Vec<_>>(), vec![7, 8, 9]);
        assert!(deque.is_closed());
        assert_eq!(deque.close(None), Err(DequeError::Closed));
    }

    #[test]
    fn prepend_and_remove_tail() {
        init_test_logging();
        let deque = Deque::new(4);
        deque.append_node(None, 2).unwrap();
        deque.prepend_node(None, 1).unwrap();
        deque.append_node(None, 3).unwrap();
        assert_eq!(deque.remove_tail(None, false).unwrap(), 3);
        assert_eq!(deque.remove_head(None, false).unwrap(), 1);
        assert_eq!(deque.remove_head(None, false).unwrap(), 2);
    }

    #[test]
    fn cancelled_removal_leaves_state_unchanged() {
        init_test_logging();
        let deque: Deque<u32> = Deque::new(2);
        let token = CancelToken::with_timeout(Duration::from_millis(50));
        let err = deque.remove_head(Some(&token), false).unwrap_err();
        assert_eq!(err, DequeError::Cancelled(CancelError::DeadlineExceeded));
        assert_eq!(deque.length(), 0);
        assert_eq!(deque.capacity(), 2);
    }
}
