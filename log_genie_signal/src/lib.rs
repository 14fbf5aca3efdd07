//! Cancellation signal for log-genie's background tasks.
//!
//! The telemetry provider owns a small fixed set of background loops: the
//! batch flush worker, the self-report timer and, optionally, the diagnostic
//! prober. All of them must stop when the provider shuts down and the provider
//! must be able to wait, for a bounded time, until they have.
//!
//! The mechanism has two halves, a [`Trigger`] and a [`Watcher`]. There is one
//! `Trigger` per signal and any number of `Watcher` instances, each counted by
//! the `Trigger` until it drops. The `Trigger` can fire and then wait, for a
//! bounded time, for every `Watcher` to drop off. Firing is a one-time event.

#[cfg(not(loom))]
use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

#[cfg(loom)]
use loom::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use std::time::Duration;

use tokio::sync::{
    Notify,
    broadcast::{self, error},
};
use tracing::debug;

/// Construct a `Watcher` and `Trigger` pair.
///
/// The returned `Watcher` is counted by the `Trigger`.
#[must_use]
pub fn signal() -> (Watcher, Trigger) {
    // The broadcast channel is never sent on. Dropping the sender closes it
    // and every receiver observes `Closed`, which is the signal.
    let (sender, receiver) = broadcast::channel(1);
    let peers = Arc::new(AtomicU32::new(1));
    let notify = Arc::new(Notify::new());

    let w = Watcher {
        peers: Arc::clone(&peers),
        receiver,
        fired: false,
        notify: Arc::clone(&notify),
    };

    let t = Trigger {
        peers,
        sender,
        notify,
    };

    (w, t)
}

/// Errors for [`Trigger::fire_and_wait_for`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// Registered watchers were still alive when the bound elapsed.
    #[error("{remaining} watcher(s) still running after {waited:?}")]
    Timeout {
        /// Number of registered watchers that had not dropped off.
        remaining: u32,
        /// How long the trigger waited.
        waited: Duration,
    },
}

/// Errors for [`Watcher::register`].
#[derive(thiserror::Error, Debug, Clone, Copy)]
pub enum RegisterError {
    /// The signal has already been observed by this watcher.
    #[error("signal has been received")]
    SignalReceived,
}

#[derive(Debug)]
/// The firing half of a cancellation signal.
pub struct Trigger {
    /// Registered watchers still alive.
    peers: Arc<AtomicU32>,
    /// Dropped to fire the signal.
    sender: broadcast::Sender<()>,
    /// Poked by watchers as they drop off.
    notify: Arc<Notify>,
}

impl Trigger {
    /// Fire the signal without waiting for any watcher.
    pub fn fire(self) {
        drop(self.sender);
    }

    /// Fire the signal and wait, at most `bound`, for every registered watcher
    /// to drop off.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Timeout`] if watchers remain after `bound`. The
    /// signal has still been fired.
    pub async fn fire_and_wait_for(self, bound: Duration) -> Result<(), WaitError> {
        let Trigger {
            peers,
            sender,
            notify,
        } = self;
        drop(sender);
        match tokio::time::timeout(bound, wait_for_peers(&peers, &notify)).await {
            Ok(()) => Ok(()),
            Err(_elapsed) => Err(WaitError::Timeout {
                remaining: peers.load(Ordering::SeqCst),
                waited: bound,
            }),
        }
    }
}

async fn wait_for_peers(peers: &AtomicU32, notify: &Notify) {
    // Register interest before reading the count. Reading first would let a
    // watcher drop off between the read and the registration and the wakeup
    // would be lost.
    loop {
        let notified = notify.notified();
        let remaining = peers.load(Ordering::SeqCst);
        if remaining == 0 {
            break;
        }
        debug!("waiting on {remaining} watcher(s)");
        notified.await;
    }
}

#[derive(Debug)]
/// The observing half of a cancellation signal.
pub struct Watcher {
    /// Set once this instance has observed the signal.
    fired: bool,
    /// Registered watchers still alive, shared with the `Trigger`.
    peers: Arc<AtomicU32>,
    /// Closed when the `Trigger` fires.
    receiver: broadcast::Receiver<()>,
    /// Poked as this instance drops off.
    notify: Arc<Notify>,
}

impl Watcher {
    fn depart(&mut self) {
        // Not `fetch_sub`: it wraps at zero.
        let mut old = self.peers.load(Ordering::Relaxed);
        while old > 0 {
            match self.peers.compare_exchange_weak(
                old,
                old - 1,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    self.notify.notify_waiters();
                    break;
                }
                Err(x) => old = x,
            }
        }
    }

    /// Wait for the signal.
    ///
    /// Borrows the watcher so it can sit in a `select!` loop arm. Once the
    /// signal has been observed every later call returns immediately. The
    /// watcher stays counted by the `Trigger` until it is dropped, so loops
    /// should drop their watcher when they finish their wind-down work.
    ///
    /// # Panics
    ///
    /// Panics if the broadcast receiver lagged, which cannot happen as nothing
    /// is ever sent.
    pub async fn cancelled(&mut self) {
        if self.fired {
            return;
        }

        match self.receiver.recv().await {
            Ok(()) | Err(error::RecvError::Closed) => {
                self.fired = true;
            }
            Err(error::RecvError::Lagged(_)) => {
                panic!("Catastrophic programming error: lagged behind");
            }
        }
    }

    /// Register a new `Watcher` with the `Trigger`.
    ///
    /// # Errors
    ///
    /// Returns [`RegisterError::SignalReceived`] if this watcher has already
    /// observed the signal.
    pub fn register(&self) -> Result<Self, RegisterError> {
        if self.fired {
            return Err(RegisterError::SignalReceived);
        }

        self.peers.fetch_add(1, Ordering::SeqCst);

        Ok(Self {
            peers: Arc::clone(&self.peers),
            receiver: self.receiver.resubscribe(),
            fired: false,
            notify: Arc::clone(&self.notify),
            })
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.depart();
    }
}
