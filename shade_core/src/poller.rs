//! Background telemetry polling.
//!
//! Spawns a thread that calls [`PollTarget::poll`] and then waits on a wake
//! channel with the current cadence interval as timeout. A wake either forces
//! an immediate poll (`refresh`) or only recomputes the wait because the
//! cadence changed (`reschedule`).
//!
//! Safety: each `Poller` spawns exactly one thread, shut down and joined when
//! the `Poller` is dropped.

use crossbeam_channel as xch;
use shade_traits::clock::Clock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Something that can be polled on a cadence.
pub trait PollTarget: Send + Sync {
    /// One poll; returns whether it succeeded. Errors are logged by the target.
    fn poll(&self) -> bool;
    /// Current poll interval.
    fn interval(&self, now: Instant) -> Duration;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Refresh,
    Reschedule,
    Shutdown,
}

/// Sending side of the poller's wake channel. Wakes coalesce.
#[derive(Debug, Clone)]
pub struct PollWaker {
    tx: xch::Sender<Wake>,
}

impl PollWaker {
    /// Poll as soon as possible.
    pub fn refresh(&self) {
        let _ = self.tx.try_send(Wake::Refresh);
    }

    /// The interval changed; recompute when the next poll is due.
    pub fn reschedule(&self) {
        let _ = self.tx.try_send(Wake::Reschedule);
    }
}

/// Receiving side, handed to [`Poller::spawn`].
#[derive(Debug)]
pub struct PollWakeReceiver {
    rx: xch::Receiver<Wake>,
}

pub fn wake_channel() -> (PollWaker, PollWakeReceiver) {
    let (tx, rx) = xch::bounded(4);
    (PollWaker { tx }, PollWakeReceiver { rx })
}

pub struct Poller {
    waker: PollWaker,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl Poller {
    pub fn spawn<T: PollTarget + ?Sized + 'static, C: Clock + Send + 'static>(
        target: Arc<T>,
        clock: C,
        waker: PollWaker,
        wake_rx: PollWakeReceiver,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);

        let join_handle = std::thread::spawn(move || {
            let rx = wake_rx.rx;
            let mut last_poll = clock.now();
            target.poll();
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("poller thread received shutdown signal");
                    break;
                }
                let now = clock.now();
                let due = last_poll + target.interval(now);
                let wait = due.saturating_duration_since(now);
                let wake = if wait.is_zero() {
                    Wake::Refresh
                } else {
                    match rx.recv_timeout(wait) {
                        Ok(w) => w,
                        Err(xch::RecvTimeoutError::Timeout) => Wake::Refresh,
                        Err(xch::RecvTimeoutError::Disconnected) => Wake::Shutdown,
                    }
                };
                match wake {
                    Wake::Shutdown => break,
                    Wake::Reschedule => continue,
                    Wake::Refresh => {}
                }
                if shutdown_clone.load(Ordering::Relaxed) {
                    break;
                }
                last_poll = clock.now();
                target.poll();
            }
            tracing::trace!("poller thread exiting cleanly");
        });

        Self {
            waker,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    pub fn waker(&self) -> PollWaker {
        self.waker.clone()
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // A full channel already holds a wake, which is enough to observe the flag.
        let _ = self.waker.tx.try_send(Wake::Shutdown);
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("poller thread joined successfully"),
                Err(e) => tracing::warn!(?e, "poller thread panicked during shutdown"),
            }
        }
    }
}
