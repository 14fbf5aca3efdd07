//! The batching processor.
//!
//! Producers hand records to [`BatchProcessor::enqueue`], which appends to a
//! bounded FIFO and never waits. A single worker task drains the queue into
//! the [`Exporter`] in batches of at most `max_export_batch_size` records,
//! either as soon as that many are queued or when `export_timeout` has passed
//! since the last flush. When the queue is full incoming records are dropped.
//!
//! ## Metrics
//!
//! `records_enqueued`: Records accepted into the queue
//! `records_dropped`: Records dropped because the queue was full
//! `batches_exported`: Batches the exporter accepted
//! `records_exported`: Records in batches the exporter accepted
//! `batch_export_failure`: Batches the exporter rejected, dropped
//!

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use log_genie_signal::Watcher;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::Notify,
    task::JoinHandle,
    time::{Instant, sleep_until},
};
use tracing::{debug, error, info, warn};

use super::{export::Exporter, record::LogRecord};

fn default_max_queue_size() -> usize {
    2048
}

fn default_max_export_batch_size() -> usize {
    10
}

fn default_export_timeout_millis() -> u64 {
    5_000
}

fn default_shutdown_timeout_millis() -> u64 {
    5_000
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
/// Errors produced by [`BatchProcessor`].
pub enum Error {
    /// The worker did not finish its final flush by the deadline.
    #[error("Batch worker did not finish its final flush by the deadline")]
    ShutdownTimeout,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
/// Configuration of [`BatchProcessor`].
pub struct Config {
    /// Maximum number of records held in the queue. Records arriving while
    /// the queue is full are dropped.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// Maximum number of records per export call. Clamped to
    /// `1..=max_queue_size`.
    #[serde(default = "default_max_export_batch_size")]
    pub max_export_batch_size: usize,
    /// Longest a queued record waits before a flush, in milliseconds.
    #[serde(default = "default_export_timeout_millis")]
    pub export_timeout_millis: u64,
    /// Bound on the whole provider shutdown, task drain and final flush
    /// together, in milliseconds.
    #[serde(default = "default_shutdown_timeout_millis")]
    pub shutdown_timeout_millis: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            max_export_batch_size: default_max_export_batch_size(),
            export_timeout_millis: default_export_timeout_millis(),
            shutdown_timeout_millis: default_shutdown_timeout_millis(),
        }
    }
}

impl Config {
    /// The flush interval.
    #[must_use]
    pub fn export_timeout(&self) -> Duration {
        Duration::from_millis(self.export_timeout_millis)
    }

    /// The bound on the whole shutdown.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_millis)
    }
}

#[derive(Debug)]
struct Queue {
    records: Mutex<VecDeque<LogRecord>>,
    capacity: usize,
    batch_size: usize,
    /// Poked when the queue holds at least a batch.
    batch_ready: Notify,
    dropped: AtomicU64,
}

impl Queue {
    fn new(capacity: usize, batch_size: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            batch_size,
            batch_ready: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, record: LogRecord) -> bool {
        let len = {
            let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
            if records.len() >= self.capacity {
                None
            } else {
                records.push_back(record);
                Some(records.len())
            }
        };

        match len {
            Some(len) => {
                counter!("records_enqueued").increment(1);
                if len >= self.batch_size {
                    self.batch_ready.notify_one();
                }
                true
            }
            None => {
                counter!("records_dropped").increment(1);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    fn take(&self, max: usize) -> Vec<LogRecord> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let n = records.len().min(max);
        records.drain(..n).collect()
    }

    fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Bounded queue plus flush worker in front of an [`Exporter`].
#[derive(Debug)]
pub struct BatchProcessor {
    queue: Arc<Queue>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BatchProcessor {
    /// Create a new [`BatchProcessor`] and spawn its worker.
    ///
    /// The worker runs until `shutdown` fires, then flushes what remains,
    /// shuts the exporter down and exits. Must be called from within a tokio
    /// runtime.
    #[must_use]
    pub fn new(exporter: Arc<dyn Exporter>, config: Config, shutdown: Watcher) -> Self {
        let capacity = config.max_queue_size.max(1);
        let batch_size = config.max_export_batch_size.clamp(1, capacity);
        let queue = Arc::new(Queue::new(capacity, batch_size));

        let worker = Worker {
            queue: Arc::clone(&queue),
            exporter,
            export_timeout: config.export_timeout(),
        };
        let handle = tokio::spawn(worker.run(shutdown));

        Self {
            queue,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Queue `record` for export. Returns false if the queue was full and
    /// the record was dropped.
    pub fn enqueue(&self, record: LogRecord) -> bool {
        self.queue.push(record)
    }

    /// Number of records waiting for export.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether no records are waiting for export.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records dropped because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    /// Wait, until `deadline`, for the worker to finish its final flush. The
    /// worker only begins winding down once its shutdown signal has fired.
    /// Later calls return immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutdownTimeout`] if the worker is still running at
    /// `deadline`. The worker is left detached.
    pub async fn shutdown(&self, deadline: Instant) -> Result<(), Error> {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return Ok(());
        };

        match tokio::time::timeout_at(deadline, handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => {
                error!("batch worker failed: {err}");
                Ok(())
            }
            Err(_elapsed) => Err(Error::ShutdownTimeout),
        }
    }
}

struct Worker {
    queue: Arc<Queue>,
    exporter: Arc<dyn Exporter>,
    export_timeout: Duration,
}

impl Worker {
    async fn run(self, mut shutdown: Watcher) {
        let mut deadline = Instant::now() + self.export_timeout;
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = self.queue.batch_ready.notified() => {
                    let mut flushed = false;
                    while self.queue.len() >= self.queue.batch_size {
                        self.export(self.queue.batch_size).await;
                        flushed = true;
                    }
                    if flushed {
                        deadline = Instant::now() + self.export_timeout;
                    }
                }
                () = sleep_until(deadline) => {
                    self.flush().await;
                    deadline = Instant::now() + self.export_timeout;
                }
            }
        }
        // The final flush is bounded by the deadline given to
        // `BatchProcessor::shutdown`.
        drop(shutdown);

        let remaining = self.queue.len();
        if remaining > 0 {
            info!("flushing {remaining} queued record(s) before shutdown");
        }
        self.flush().await;
        self.exporter.shutdown().await;
        debug!("batch worker stopped");
    }

    async fn flush(&self) {
        while self.queue.len() > 0 {
            self.export(self.queue.batch_size).await;
        }
    }

    async fn export(&self, max: usize) {
        let batch = self.queue.take(max);
        if batch.is_empty() {
            return;
        }
        let len = batch.len();
        match self.exporter.export(batch).await {
            Ok(()) => {
                counter!("batches_exported").increment(1);
                counter!("records_exported").increment(len as u64);
            }
            Err(err) => {
                counter!("batch_export_failure").increment(1);
                let err = super::Error::Delivery(err);
                warn!("dropping batch of {len} record(s): {err}");
            }
        }
    }
}
