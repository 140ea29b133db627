//! Cancellable, deadline-aware TCP connection wrapper.
//!
//! [`Connection`] wraps a [`TcpStream`] so blocking reads and writes honor
//! both a deadline and a [`CancelToken`]. Deadlines map onto socket
//! timeouts; manual cancellation is handled by a watcher thread that shuts
//! the socket down when the token registered for the in-flight operation
//! fires, which makes a cancelled connection terminal. After a failed
//! operation the error is re-attributed to the token if it had fired, so
//! callers see the cancellation rather than a raw socket error.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{never, unbounded, Receiver, Sender};

use crate::cancel::CancelToken;

/// Which half of the connection a watch registration covers.
#[derive(Debug)]
enum Watch {
    Read(u64, Receiver<()>),
    Write(u64, Receiver<()>),
}

/// A `TcpStream` whose blocking I/O can be cancelled and deadlined.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    watches: Option<Sender<Watch>>,
    watcher: Option<std::thread::JoinHandle<()>>,
    read_generation: Arc<AtomicU64>,
    write_generation: Arc<AtomicU64>,
    next_generation: AtomicU64,
}

impl Connection {
    /// Wraps `stream`, spawning its watcher thread.
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let watcher_stream = stream.try_clone()?;
        let (watches_tx, watches_rx) = unbounded();
        let read_generation = Arc::new(AtomicU64::new(0));
        let write_generation = Arc::new(AtomicU64::new(0));
        let watcher = {
            let read_generation = Arc::clone(&read_generation);
            let write_generation = Arc::clone(&write_generation);
            std::thread::spawn(move || {
                watch_loop(
                    &watcher_stream,
                    &watches_rx,
                    &read_generation,
                    &write_generation,
                );
            })
        };
        Ok(Self {
            stream,
            watches: Some(watches_tx),
            watcher: Some(watcher),
            read_generation,
            write_generation,
            next_generation: AtomicU64::new(0),
        })
    }

    /// Reads into `buf`, honoring `deadline` and `token`.
    ///
    /// The effective deadline is the earlier of `deadline` and the token's
    /// own deadline; `None` with a deadline-free token blocks until data
    /// arrives or the token is cancelled.
    pub fn read(
        &self,
        token: Option<&CancelToken>,
        deadline: Option<Instant>,
        buf: &mut [u8],
    ) -> io::Result<usize> {
        self.pre_read(token, deadline)?;
        let result = (&self.stream).read(buf);
        reattribute(result, token)
    }

    /// Writes `data`, honoring `deadline` and `token`.
    pub fn write(
        &self,
        token: Option<&CancelToken>,
        deadline: Option<Instant>,
        data: &[u8],
    ) -> io::Result<usize> {
        self.pre_write(token, deadline)?;
        let result = (&self.stream).write(data);
        reattribute(result, token)
    }

    /// Registers `token` and `deadline` for the next read.
    pub fn pre_read(
        &self,
        token: Option<&CancelToken>,
        deadline: Option<Instant>,
    ) -> io::Result<()> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.read_generation.store(generation, Ordering::Release);
        self.stream
            .set_read_timeout(timeout_from(effective_deadline(token, deadline)))?;
        self.register(Watch::Read(generation, cancel_receiver(token)));
        Ok(())
    }

    /// Registers `token` and `deadline` for the next write.
    pub fn pre_write(
        &self,
        token: Option<&CancelToken>,
        deadline: Option<Instant>,
    ) -> io::Result<()> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.write_generation.store(generation, Ordering::Release);
        self.stream
            .set_write_timeout(timeout_from(effective_deadline(token, deadline)))?;
        self.register(Watch::Write(generation, cancel_receiver(token)));
        Ok(())
    }

    /// Shuts the connection down. I/O in flight fails promptly.
    pub fn close(&self) -> io::Result<()> {
        self.stream.shutdown(Shutdown::Both)
    }

    /// The wrapped stream.
    #[must_use]
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    fn register(&self, watch: Watch) {
        if let Some(watches) = &self.watches {
            // A disconnected watcher means the connection is being torn
            // down; the registration is moot then.
            let _ = watches.send(watch);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Dropping the sender stops the watcher.
        drop(self.watches.take());
        if let Some(watcher) = self.watcher.take() {
            let _ = watcher.join();
        }
    }
}

fn watch_loop(
    stream: &TcpStream,
    watches: &Receiver<Watch>,
    read_generation: &AtomicU64,
    write_generation: &AtomicU64,
) {
    let mut read_watch: (u64, Receiver<()>) = (0, never());
    let mut write_watch: (u64, Receiver<()>) = (0, never());
    loop {
        crossbeam_channel::select! {
            recv(watches) -> watch => match watch {
                Ok(Watch::Read(generation, rx)) => read_watch = (generation, rx),
                Ok(Watch::Write(generation, rx)) => write_watch = (generation, rx),
                Err(_) => return,
            },
            recv(read_watch.1) -> _ => {
                // Trip only if this token still guards the latest read; a
                // stale token firing must not kill a later operation.
                if read_generation.load(Ordering::Acquire) == read_watch.0 {
                    tracing::debug!("read cancelled, shutting connection down");
                    let _ = stream.shutdown(Shutdown::Both);
                }
                read_watch = (0, never());
            },
            recv(write_watch.1) -> _ => {
                if write_generation.load(Ordering::Acquire) == write_watch.0 {
                    tracing::debug!("write cancelled, shutting connection down");
                    let _ = stream.shutdown(Shutdown::Both);
                }
                write_watch = (0, never());
            },
        }
    }
}

fn cancel_receiver(token: Option<&CancelToken>) -> Receiver<()> {
    token.map_or_else(never, |token| token.cancelled().clone())
}

fn effective_deadline(token: Option<&CancelToken>, deadline: Option<Instant>) -> Option<Instant> {
    match (deadline, token.and_then(CancelToken::deadline)) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (deadline, token_deadline) => deadline.or(token_deadline),
    }
}

/// Socket timeouts reject zero durations, so elapsed deadlines clamp to the
/// minimum the socket accepts.
fn timeout_from(deadline: Option<Instant>) -> Option<Duration> {
    deadline.map(|deadline| {
        deadline
            .saturating_duration_since(Instant::now())
            .max(Duration::from_millis(1))
    })
}

/// Reports the token's error instead of the socket's when the token fired.
///
/// A tripped read surfaces as end-of-stream (`Ok(0)`) rather than an error,
/// so that case is re-attributed as well.
fn reattribute(result: io::Result<usize>, token: Option<&CancelToken>) -> io::Result<usize> {
    match (result, token) {
        (Err(_) | Ok(0), Some(token)) if token.is_cancelled() => {
            Err(io::Error::other(token.error()))
        }
        (result, _) => result,
    }
}
