//! In-memory exporter for testing
//!
//! Records every batch it is handed so tests can assert on what the batching
//! processor delivered, and when.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::telemetry::{
    export::{Error, Exporter},
    record::LogRecord,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Accept,
    Fail,
    Stall,
}

/// In-memory exporter for testing
///
/// Clones share state, hand one clone to the code under test and keep
/// another for assertions.
#[derive(Clone, Debug)]
pub struct InMemoryExporter {
    batches: Arc<Mutex<Vec<Vec<LogRecord>>>>,
    attempts: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    exported: Arc<Notify>,
    mode: Mode,
}

impl InMemoryExporter {
    fn with_mode(mode: Mode) -> Self {
        Self {
            batches: Arc::new(Mutex::new(Vec::new())),
            attempts: Arc::new(AtomicUsize::new(0)),
            shutdowns: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
            exported: Arc::new(Notify::new()),
            mode,
        }
    }

    /// Create an exporter that accepts every batch
    #[must_use]
    pub fn new() -> Self {
        Self::with_mode(Mode::Accept)
    }

    /// Create an exporter that rejects every batch with a 500
    #[must_use]
    pub fn failing() -> Self {
        Self::with_mode(Mode::Fail)
    }

    /// Create an exporter whose exports never complete
    #[must_use]
    pub fn stalled() -> Self {
        Self::with_mode(Mode::Stall)
    }

    /// Batches accepted so far, in delivery order
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned
    #[must_use]
    pub fn batches(&self) -> Vec<Vec<LogRecord>> {
        self.batches.lock().expect("mutex poisoned").clone()
    }

    /// Sizes of the batches accepted so far
    #[must_use]
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches().iter().map(Vec::len).collect()
    }

    /// All accepted records, flattened in delivery order
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.batches().into_iter().flatten().collect()
    }

    /// Number of export calls, accepted or not
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of times `shutdown` was called
    #[must_use]
    pub fn shutdown_calls(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` export calls have returned
    pub async fn wait_for_attempts(&self, n: usize) {
        loop {
            let notified = self.exported.notified();
            if self.attempts() >= n {
                return;
            }
            notified.await;
        }
    }
}

impl Default for InMemoryExporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Exporter for InMemoryExporter {
    async fn export(&self, batch: Vec<LogRecord>) -> Result<(), Error> {
        if self.mode == Mode::Stall {
            std::future::pending::<()>().await;
        }
        let res = if self.closed.load(Ordering::SeqCst) {
            Err(Error::Closed)
        } else if self.mode == Mode::Fail {
            Err(Error::Status {
                status: http::StatusCode::INTERNAL_SERVER_ERROR,
                body: "collector unavailable".to_string(),
            })
        } else {
            self.batches.lock().expect("mutex poisoned").push(batch);
            Ok(())
        };
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.exported.notify_waiters();
        res
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}
