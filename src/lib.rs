//! Synckit: a toolkit of low-level blocking synchronization primitives.
//!
//! The core is a three-layer coordination stack:
//!
//! - [`Condition`]: a cancellable FIFO condition variable bound to one
//!   external lock.
//! - [`Semaphore`]: a counting gate with independently adjustable minimum
//!   and maximum bounds and a two-sided waiter-notification protocol.
//! - [`Deque`]: a bounded blocking deque that gates an arena-backed linked
//!   list through the semaphore, with two-phase (reserve/commit/discard)
//!   node removal.
//!
//! Every blocking operation accepts an optional [`CancelToken`] carrying a
//! manual cancel, a deadline, or both. Closing a semaphore or deque wakes
//! every blocked caller, which then fails with the closed error; a wakeup
//! that races a cancellation always wins.
//!
//! Alongside the core, the crate ships the small utilities the stack's
//! consumers tend to need: a growable byte-stream buffer ([`bytestream`]),
//! a consistent-hash ring ([`hashring`]), a single-flight memoizing map
//! ([`lazymap`]), a paced value pool ([`delaypool`]), a cancellable
//! background task runner ([`background`]), a cancellable-deadline TCP
//! connection wrapper ([`connection`]), and a random UUID type ([`uuid`]).
//!
//! # Example
//!
//! ```
//! use synckit::{CancelToken, Deque};
//! use std::time::Duration;
//!
//! let deque: Deque<u32> = Deque::new(2);
//! deque.append_node(None, 1).unwrap();
//! deque.append_node(None, 2).unwrap();
//!
//! // The deque is full: a third append waits until its token fires.
//! let token = CancelToken::with_timeout(Duration::from_millis(10));
//! assert!(deque.append_node(Some(&token), 3).is_err());
//!
//! assert_eq!(deque.remove_head(None, false).unwrap(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod background;
pub mod bytestream;
pub mod cancel;
pub mod condition;
pub mod connection;
pub mod delaypool;
pub mod deque;
pub mod hashring;
pub mod lazymap;
pub mod list;
pub mod semaphore;
pub mod uuid;

#[cfg(test)]
pub(crate) mod test_support;

pub use cancel::{CancelError, CancelHandle, CancelToken};
pub use condition::Condition;
pub use deque::{AppendError, Deque, DequeError};
pub use list::{List, NodeKey};
pub use semaphore::{Semaphore, SemaphoreError};
