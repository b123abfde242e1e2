// Copyright (c) 2026 guidecane contributors
// Licensed under the MIT License. See LICENSE file in the project root.

//! Thread workers with bounded joins and a cooperative stop signal

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Owner side of a stop signal. Dropping the inner sender wakes every token.
pub struct StopSignal {
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(0);
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    /// Observer handle for a loop or blocking wait
    pub fn token(&self) -> StopToken {
        StopToken(self.rx.clone())
    }

    pub fn trigger(&self) {
        self.tx.lock().take();
    }

    pub fn is_triggered(&self) -> bool {
        self.tx.lock().is_none()
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheap clonable view of a [`StopSignal`]
#[derive(Clone)]
pub struct StopToken(Receiver<()>);

impl StopToken {
    pub fn is_stopped(&self) -> bool {
        matches!(self.0.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep for `timeout` unless stopped first. Returns true when stopped.
    pub fn wait(&self, timeout: Duration) -> bool {
        match self.0.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) | Ok(()) => true,
        }
    }

    /// Block on `rx` until a message arrives. `None` once stopped or when
    /// every sender is gone.
    pub fn recv<T>(&self, rx: &Receiver<T>) -> Option<T> {
        if self.is_stopped() {
            return None;
        }
        channel::select! {
            recv(rx) -> msg => msg.ok(),
            recv(self.0) -> _ => None,
        }
    }
}

/// A named thread whose completion can be awaited with a deadline.
pub struct Worker {
    name: String,
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

impl Worker {
    pub fn spawn<F>(name: &str, f: F) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        Self::spawn_counted(name, None, f)
    }

    /// Spawn and keep `live` incremented for as long as the thread runs
    pub fn spawn_counted<F>(name: &str, live: Option<Arc<AtomicUsize>>, f: F) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (done_tx, done) = channel::bounded::<()>(0);
        if let Some(ref live) = live {
            live.fetch_add(1, Ordering::SeqCst);
        }
        let spawned = thread::Builder::new().name(name.to_string()).spawn({
            let live = live.clone();
            move || {
                let _guard = LiveGuard { live, _done: done_tx };
                f();
            }
        });

        match spawned {
            Ok(handle) => Ok(Self {
                name: name.to_string(),
                handle,
                done,
            }),
            Err(e) => {
                if let Some(live) = live {
                    live.fetch_sub(1, Ordering::SeqCst);
                }
                Err(e)
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Join if the thread finishes within `timeout`, otherwise abandon it.
    pub fn join_timeout(self, timeout: Duration) -> bool {
        match self.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!("Thread '{}' did not exit within {:?}, abandoning it", self.name, timeout);
                false
            }
            _ => {
                if self.handle.join().is_err() {
                    warn!("Thread '{}' panicked", self.name);
                } else {
                    debug!("Thread '{}' joined", self.name);
                }
                true
            }
        }
    }

    /// Join against an absolute deadline shared by several workers
    pub fn join_until(self, deadline: Instant) -> bool {
        let remaining = deadline.saturating_duration_since(Instant::now());
        self.join_timeout(remaining)
    }
}

/// Decrements the live counter and closes the completion channel on exit,
/// including unwinding.
struct LiveGuard {
    live: Option<Arc<AtomicUsize>>,
    _done: Sender<()>,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        if let Some(ref live) = self.live {
            live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_token_wakes_waiters() {
        let signal = StopSignal::new();
        let token = signal.token();
        assert!(!token.is_stopped());
        assert!(!token.wait(Duration::from_millis(5)));

        let worker = Worker::spawn("waiter", move || {
            while !token.wait(Duration::from_secs(10)) {}
        })
        .unwrap();

        signal.trigger();
        assert!(signal.is_triggered());
        assert!(worker.join_timeout(Duration::from_secs(2)));
    }

    #[test]
    fn test_recv_returns_messages_until_stopped() {
        let signal = StopSignal::new();
        let token = signal.token();
        let (tx, rx) = channel::bounded::<u32>(4);
        tx.send(7).unwrap();
        assert_eq!(token.recv(&rx), Some(7));

        let worker = Worker::spawn("receiver", move || while token.recv(&rx).is_some() {}).unwrap();
        tx.send(8).unwrap();
        signal.trigger();
        assert!(worker.join_timeout(Duration::from_secs(2)));
    }

    #[test]
    fn test_join_timeout_abandons_stuck_thread() {
        let (release_tx, release_rx) = channel::bounded::<()>(0);
        let worker = Worker::spawn("stuck", move || {
            let _ = release_rx.recv();
        })
        .unwrap();

        let started = Instant::now();
        assert!(!worker.join_timeout(Duration::from_millis(50)));
        assert!(started.elapsed() < Duration::from_secs(2));
        drop(release_tx);
    }

    #[test]
    fn test_live_counter_tracks_threads() {
        let live = Arc::new(AtomicUsize::new(0));
        let (go_tx, go_rx) = channel::bounded::<()>(0);
        let worker = Worker::spawn_counted("counted", Some(live.clone()), move || {
            let _ = go_rx.recv();
        })
        .unwrap();

        assert_eq!(live.load(Ordering::SeqCst), 1);
        assert!(!worker.is_finished());
        drop(go_tx);
        assert!(worker.join_timeout(Duration::from_secs(2)));
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }
}
