//! Cancellable background tasks.
//!
//! [`BackgroundTask::run`] spawns a thread and hands it a [`CancelToken`]
//! that fires when the task is cancelled. [`BackgroundTask::cancel`] (or
//! dropping the task) fires the token and joins the thread, so by the time
//! either returns the task body has fully stopped.

use std::thread::{self, JoinHandle};

use crate::cancel::{CancelHandle, CancelToken};

/// A running background task.
#[derive(Debug)]
pub struct BackgroundTask {
    handle: Option<CancelHandle>,
    thread: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Spawns `task` on a new thread with its own cancellation token.
    ///
    /// The task is expected to watch the token and return promptly once it
    /// fires.
    pub fn run<F>(task: F) -> Self
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        let (token, handle) = CancelToken::new();
        let thread = thread::spawn(move || {
            tracing::debug!("background task started");
            task(token);
            tracing::debug!("background task stopped");
        });
        Self {
            handle: Some(handle),
            thread: Some(thread),
        }
    }

    /// Fires the task's token and joins the thread.
    pub fn cancel(mut self) {
        self.stop();
    }

    /// Returns true once the task body has returned.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread
            .as_ref()
            .map_or(true, JoinHandle::is_finished)
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.cancel();
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("background task panicked");
            }
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::init_test_logging;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn cancel_stops_and_joins() {
        init_test_logging();
        let stopped = Arc::new(AtomicBool::new(false));
        let task = {
            let stopped = Arc::clone(&stopped);
            BackgroundTask::run(move |token| {
                // Park on the token until cancelled.
                let _ = token.cancelled().recv();
                stopped.store(true, Ordering::Release);
            })
        };
        assert!(!task.is_finished());
        task.cancel();
        // cancel() joins, so the body has fully run.
        assert!(stopped.load(Ordering::Acquire));
    }

    #[test]
    fn drop_cancels_too() {
        init_test_logging();
        let stopped = Arc::new(AtomicBool::new(false));
        {
            let stopped = Arc::clone(&stopped);
            let _task = BackgroundTask::run(move |token| {
                let _ = token.cancelled().recv();
                stopped.store(true, Ordering::Release);
            });
        }
        assert!(stopped.load(Ordering::Acquire));
    }

    #[test]
    fn finished_task_joins_without_cancel() {
        init_test_logging();
        let task = BackgroundTask::run(|_token| {});
        std::thread::sleep(Duration::from_millis(50));
        assert!(task.is_finished());
        task.cancel();
    }
}
