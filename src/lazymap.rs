//! Memoizing map with single-flight, cancellable fills.
//!
//! [`LazyMap::get_or_fill`] returns the cached value for a key when one
//! exists; otherwise exactly one caller runs the factory while every other
//! caller for the same key blocks on a per-key lock. Blocked callers can be
//! cancelled through their token without disturbing the fill in flight. A
//! failed factory releases the key so the next caller retries.

use std::collections::hash_map::{Entry, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::cancel::{self, CancelError, CancelToken};

/// Error from [`LazyMap::get_or_fill`].
#[derive(Debug, thiserror::Error)]
pub enum LazyError<E> {
    /// The caller's token fired while waiting for the per-key lock.
    #[error(transparent)]
    Cancelled(#[from] CancelError),
    /// The value factory failed; the key is released for the next caller.
    #[error("value factory failed: {0}")]
    Factory(E),
}

/// How [`LazyMap::get_or_fill`] obtained its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetched<V> {
    /// The value was already cached.
    Cached(V),
    /// This caller ran the factory and filled the cache.
    Filled(V),
}

impl<V> Fetched<V> {
    /// Unwraps the value either way.
    pub fn into_value(self) -> V {
        match self {
            Self::Cached(value) | Self::Filled(value) => value,
        }
    }
}

/// A one-slot channel used as a cancellably-acquirable mutex.
///
/// Acquiring sends into the slot; releasing receives it back. Identity
/// (`Arc::ptr_eq`) tells a waiter whether the lock it slept on is still the
/// one guarding the key.
#[derive(Debug)]
struct KeyLock {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl KeyLock {
    fn new() -> Arc<Self> {
        let (tx, rx) = bounded(1);
        Arc::new(Self { tx, rx })
    }

    fn acquire(&self, token: Option<&CancelToken>) -> Result<(), CancelError> {
        let (cancel_rx, deadline_rx) = cancel::select_channels(token);
        crossbeam_channel::select! {
            send(self.tx, ()) -> result => {
                // The receiver lives in the same struct, so the channel
                // cannot be disconnected while we hold `self`.
                let _ = result;
                Ok(())
            }
            recv(cancel_rx) -> _ => Err(CancelError::Cancelled),
            recv(deadline_rx) -> _ => Err(CancelError::DeadlineExceeded),
        }
    }

    fn release(&self) {
        let _ = self.rx.try_recv();
    }
}

#[derive(Debug)]
enum Slot<V> {
    Value(V),
    Filling(Arc<KeyLock>),
}

/// A concurrent map whose values are computed once, on first request.
#[derive(Debug, Default)]
pub struct LazyMap<K, V> {
    base: Mutex<HashMap<K, Slot<V>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> LazyMap<K, V> {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the value for `key`, running `factory` to compute it if it
    /// is not cached.
    ///
    /// At most one caller per key runs the factory at a time; the rest
    /// block until the fill resolves, then observe the cached value. The
    /// factory runs without any internal lock held and receives the
    /// caller's token so it can honor cancellation itself.
    pub fn get_or_fill<E>(
        &self,
        token: Option<&CancelToken>,
        key: &K,
        factory: impl FnOnce(Option<&CancelToken>) -> Result<V, E>,
    ) -> Result<Fetched<V>, LazyError<E>> {
        let lock = loop {
            let candidate = {
                let mut map = self.base.lock();
                match map.entry(key.clone()) {
                    Entry::Occupied(entry) => match entry.get() {
                        Slot::Value(value) => return Ok(Fetched::Cached(value.clone())),
                        Slot::Filling(lock) => Arc::clone(lock),
                    },
                    Entry::Vacant(entry) => {
                        let lock = KeyLock::new();
                        entry.insert(Slot::Filling(Arc::clone(&lock)));
                        Arc::clone(&lock)
                    }
                }
            };
            candidate.acquire(token)?;

            // Re-check: the fill we waited on may have resolved, failed, or
            // been cleared while we slept.
            let map = self.base.lock();
            match map.get(key) {
                Some(Slot::Value(value)) => {
                    let value = value.clone();
                    drop(map);
                    candidate.release();
                    return Ok(Fetched::Cached(value));
                }
                Some(Slot::Filling(current)) if Arc::ptr_eq(current, &candidate) => {
                    // We hold the lock guarding the key: our turn to fill.
                    break candidate;
                }
                // The key was cleared or re-locked under a different lock;
                // start over.
                _ => {
                    drop(map);
                    candidate.release();
                }
            }
        };

        match factory(token) {
            Ok(value) => {
                self.base
                    .lock()
                    .insert(key.clone(), Slot::Value(value.clone()));
                lock.release();
                Ok(Fetched::Filled(value))
            }
            Err(err) => {
                lock.release();
                Err(LazyError::Factory(err))
            }
        }
    }

    /// Removes the cached value for `key`, if any.
    ///
    /// A fill in flight is left alone; its result will be cached as usual.
    pub fn remove(&self, key: &K) {
        let mut map = self.base.lock();
        if matches!(map.get(key), Some(Slot::Value(_))) {
            map.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::init_test_logging;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn fills_once_then_serves_the_cache() {
        init_test_logging();
        let map: LazyMap<&str, u32> = LazyMap::new();
        let calls = AtomicU32::new(0);
        for _ in 0..3 {
            let fetched = map
                .get_or_fill::<Infallible>(None, &"k", |_| {
                    calls.fetch_add(1, Ordering::Relaxed);
                    Ok(7)
                })
                .unwrap();
            assert_eq!(fetched.into_value(), 7);
        }
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn concurrent_callers_single_flight() {
        init_test_logging();
        let map: Arc<LazyMap<&str, &str>> = Arc::new(LazyMap::new());
        let fills = Arc::new(AtomicU32::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let map = Arc::clone(&map);
                let fills = Arc::clone(&fills);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let fetched = map
                            .get_or_fill::<Infallible>(None, &"k", |_| {
                                thread::sleep(Duration::from_millis(1));
                                Ok("v")
                            })
                            .unwrap();
                        assert_eq!(fetched.into_value(), "v");
                        if matches!(fetched, Fetched::Filled(_)) {
                            fills.fetch_add(1, Ordering::Relaxed);
                            thread::sleep(Duration::from_millis(1));
                            map.remove(&"k");
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker panicked");
        }
        assert!(fills.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn factory_failure_releases_the_key() {
        init_test_logging();
        let map: LazyMap<&str, u32> = LazyMap::new();
        let err = map
            .get_or_fill(None, &"k", |_| Err::<u32, _>("boom"))
            .unwrap_err();
        assert!(matches!(err, LazyError::Factory("boom")));
        // Next caller gets to retry.
        let fetched = map
            .get_or_fill::<Infallible>(None, &"k", |_| Ok(1))
            .unwrap();
        assert_eq!(fetched, Fetched::Filled(1));
    }

    #[test]
    fn waiter_can_be_cancelled_without_disturbing_the_fill() {
        init_test_logging();
        let map: Arc<LazyMap<&str, u32>> = Arc::new(LazyMap::new());
        let filler = {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                map.get_or_fill::<Infallible>(None, &"k", |_| {
                    thread::sleep(Duration::from_millis(200));
                    Ok(9)
                })
                .unwrap()
            })
        };
        thread::sleep(Duration::from_millis(50));

        let token = CancelToken::with_timeout(Duration::from_millis(20));
        let err = map
            .get_or_fill::<Infallible>(Some(&token), &"k", |_| Ok(0))
            .unwrap_err();
        assert!(matches!(
            err,
            LazyError::Cancelled(CancelError::DeadlineExceeded)
        ));

        assert_eq!(filler.join().expect("filler panicked"), Fetched::Filled(9));
        let fetched = map
            .get_or_fill::<Infallible>(None, &"k", |_| Ok(0))
            .unwrap();
        assert_eq!(fetched, Fetched::Cached(9));
    }
}
