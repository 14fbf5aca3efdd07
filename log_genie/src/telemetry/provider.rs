//! The telemetry provider.
//!
//! A [`Provider`] is either disabled, in which case every operation is a cheap
//! no-op, or running, in which case it owns the batching processor, the
//! self-report loop and the optional diagnostic prober. Records are handed in
//! with [`Provider::send_log`], which never waits on the network.
//!
//! ## Metrics
//!
//! `log_rate`: Records sent per second over the last report interval
//!

use std::{
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use log_genie_signal::{Trigger, Watcher, signal};
use metrics::gauge;
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Mutex, broadcast},
    time::Instant,
};
use tracing::{debug, info};

use super::{
    Error,
    batch::{self, BatchProcessor},
    endpoint::Endpoint,
    export::{self, Exporter, HttpExporter},
    probe::Prober,
    record::{Attributes, LogRecord, Severity},
};

fn default_endpoint() -> String {
    "collector:4318".to_string()
}

fn default_report_interval_secs() -> u64 {
    60
}

fn default_probe_interval_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
/// Configuration of [`Provider`].
pub struct Config {
    /// Whether records are shipped to a collector at all.
    #[serde(default)]
    pub enabled: bool,
    /// Collector endpoint, see [`Endpoint::resolve`].
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Run the diagnostic prober and log collector responses.
    #[serde(default)]
    pub show_responses: bool,
    /// Batching processor tuning.
    #[serde(default)]
    pub batch: batch::Config,
    /// Export client tuning.
    #[serde(default)]
    pub export: export::Config,
    /// Seconds between self-reports.
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
    /// Seconds between diagnostic requests.
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_endpoint(),
            show_responses: false,
            batch: batch::Config::default(),
            export: export::Config::default(),
            report_interval_secs: default_report_interval_secs(),
            probe_interval_secs: default_probe_interval_secs(),
        }
    }
}

impl Config {
    /// Interval of the self-report loop.
    #[must_use]
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs.max(1))
    }

    /// Interval of the diagnostic prober.
    #[must_use]
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }
}

/// Where a [`Provider`] is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Never started, the state of a disabled provider.
    Uninitialized,
    /// Accepting records.
    Running,
    /// Shutdown has begun. Records are refused.
    ShuttingDown,
    /// Shutdown has completed.
    Stopped,
}

/// One self-report, broadcast to [`Provider::subscribe_reports`] receivers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Report {
    /// Records sent since the previous report.
    pub count: u64,
    /// Time since the previous report.
    pub elapsed: Duration,
    /// `count` per second of `elapsed`.
    pub rate: f64,
}

#[derive(Debug)]
struct Running {
    endpoint: Endpoint,
    batch: BatchProcessor,
    /// Held for the whole of `shutdown`, so a concurrent caller waits for the
    /// first to finish.
    trigger: Mutex<Option<Trigger>>,
    shutdown_timeout: Duration,
    reports: broadcast::Sender<Report>,
}

/// Front door of OTLP log delivery.
#[derive(Debug)]
pub struct Provider {
    running: Option<Running>,
    counter: Arc<AtomicU64>,
    /// Read-held across the enqueue in `send_log`, write-held for the move to
    /// `ShuttingDown`. No record is queued after the final flush begins.
    lifecycle: RwLock<Lifecycle>,
}

impl Provider {
    fn disabled() -> Self {
        Self {
            running: None,
            counter: Arc::new(AtomicU64::new(0)),
            lifecycle: RwLock::new(Lifecycle::Uninitialized),
        }
    }

    /// Create a new [`Provider`] exporting over OTLP/HTTP.
    ///
    /// A disabled configuration yields a provider with no background work.
    /// Otherwise this must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Construction`] if the exporter cannot be built from
    /// the configured endpoint.
    pub fn new(config: Config) -> Result<Self, Error> {
        if !config.enabled {
            return Ok(Self::disabled());
        }
        let endpoint = Endpoint::resolve(&config.endpoint);
        let exporter = HttpExporter::new(&endpoint, &config.export).map_err(Error::Construction)?;
        Self::start(config, endpoint, Arc::new(exporter))
    }

    /// Create a new [`Provider`] delivering through `exporter`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Signal`] if a background task cannot be attached to
    /// the shutdown signal.
    pub fn with_exporter(config: Config, exporter: Arc<dyn Exporter>) -> Result<Self, Error> {
        if !config.enabled {
            return Ok(Self::disabled());
        }
        let endpoint = Endpoint::resolve(&config.endpoint);
        Self::start(config, endpoint, exporter)
    }

    fn start(config: Config, endpoint: Endpoint, exporter: Arc<dyn Exporter>) -> Result<Self, Error> {
        let (watcher, trigger) = signal();
        let report_watcher = watcher.register()?;
        let probe_watcher = if config.show_responses {
            Some(watcher.register()?)
        } else {
            None
        };

        let batch = BatchProcessor::new(exporter, config.batch, watcher);
        let counter = Arc::new(AtomicU64::new(0));
        let (reports, _) = broadcast::channel(16);

        tokio::spawn(report_loop(
            Arc::clone(&counter),
            reports.clone(),
            config.report_interval(),
            report_watcher,
        ));

        if let Some(probe_watcher) = probe_watcher {
            info!(
                "telemetry endpoint {host_port}, path {path}, logs URL {url}",
                host_port = endpoint.host_port(),
                path = endpoint.logs_path(),
                url = endpoint.logs_url(),
            );
            info!(
                "batching up to {max_batch} of {max_queue} queued records, flushing every {flush:?}",
                max_batch = config.batch.max_export_batch_size,
                max_queue = config.batch.max_queue_size,
                flush = config.batch.export_timeout(),
            );
            let prober = Prober::new(&endpoint, config.probe_interval());
            tokio::spawn(prober.run(probe_watcher));
        }

        Ok(Self {
            running: Some(Running {
                endpoint,
                batch,
                trigger: Mutex::new(Some(trigger)),
                shutdown_timeout: config.batch.shutdown_timeout(),
                reports,
            }),
            counter,
            lifecycle: RwLock::new(Lifecycle::Running),
        })
    }

    /// Hand a record to the batching processor.
    ///
    /// Returns as soon as the record is queued. A record dropped because the
    /// queue is full still counts as sent and is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotEnabled`] if the provider is disabled or not
    /// running.
    pub fn send_log(
        &self,
        level: Severity,
        message: impl Into<String>,
        attributes: Attributes,
    ) -> Result<(), Error> {
        let Some(running) = &self.running else {
            return Err(Error::NotEnabled);
        };
        let lifecycle = self.lifecycle.read().unwrap_or_else(PoisonError::into_inner);
        if *lifecycle != Lifecycle::Running {
            return Err(Error::NotEnabled);
        }

        running
            .batch
            .enqueue(LogRecord::now(level, message, attributes));
        self.counter.fetch_add(1, Ordering::Relaxed);
        drop(lifecycle);
        Ok(())
    }

    /// Subscribe to self-reports. A disabled provider never reports.
    #[must_use]
    pub fn subscribe_reports(&self) -> Option<broadcast::Receiver<Report>> {
        self.running.as_ref().map(|r| r.reports.subscribe())
    }

    /// Stop background work and flush queued records.
    ///
    /// Fires the shutdown signal, waits for the background tasks to stop and
    /// then for the batching processor's final flush. Both waits share one
    /// deadline, `shutdown_timeout` from the start of the call. A call made
    /// while another is in progress waits for it and then returns. Later
    /// calls, and calls on a disabled provider, return immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutdownTimeout`] if the deadline passed before the
    /// final flush completed. The provider is `Stopped` regardless.
    pub async fn shutdown(&self) -> Result<(), Error> {
        let Some(running) = &self.running else {
            return Ok(());
        };
        let mut guard = running.trigger.lock().await;
        let Some(trigger) = guard.take() else {
            return Ok(());
        };

        let bound = running.shutdown_timeout;
        let deadline = Instant::now() + bound;
        self.set_lifecycle(Lifecycle::ShuttingDown);
        info!("telemetry shutting down");

        let tasks = trigger
            .fire_and_wait_for(deadline.saturating_duration_since(Instant::now()))
            .await;
        if let Err(err) = &tasks {
            debug!("background tasks still running at the deadline: {err}");
        }
        let flush = running.batch.shutdown(deadline).await;

        self.set_lifecycle(Lifecycle::Stopped);
        debug!(
            "telemetry stopped, {dropped} record(s) dropped on a full queue",
            dropped = running.batch.dropped()
        );
        match (tasks, flush) {
            (Ok(()), Ok(())) => Ok(()),
            _ => Err(Error::ShutdownTimeout(bound)),
        }
    }

    fn set_lifecycle(&self, state: Lifecycle) {
        *self.lifecycle.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Whether the provider ships records at all.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.running.is_some()
    }

    /// Records sent since the last self-report.
    #[must_use]
    pub fn log_count(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// The resolved collector endpoint, if enabled.
    #[must_use]
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.running.as_ref().map(|r| &r.endpoint)
    }
}

async fn report_loop(
    counter: Arc<AtomicU64>,
    reports: broadcast::Sender<Report>,
    interval: Duration,
    mut shutdown: Watcher,
) {
    let mut last_report = Instant::now();
    let mut ticker = tokio::time::interval_at(last_report + interval, interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                let count = counter.swap(0, Ordering::Relaxed);
                let elapsed = now.duration_since(last_report);
                last_report = now;

                let secs = elapsed.as_secs_f64();
                let rate = if secs > 0.0 { count as f64 / secs } else { 0.0 };
                info!("Sent {count} logs in the last {secs:.1} seconds ({rate:.1} logs/sec)");
                gauge!("log_rate").set(rate);
                // No subscribers is the common case.
                let _ = reports.send(Report { count, elapsed, rate });
            }
            () = shutdown.cancelled() => {
                debug!("self-report loop stopped");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tokio::time::Instant;

    use crate::{
        telemetry::{
            Error,
            record::{Attributes, Severity, Value},
        },
        test::exporter::InMemoryExporter,
    };

    use super::{Config, Lifecycle, Provider};

    fn enabled() -> Config {
        Config {
            enabled: true,
            endpoint: "localhost:4318/v1/logs".to_string(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn disabled_provider_refuses_records() {
        let provider = Provider::new(Config::default()).unwrap();

        assert!(!provider.is_enabled());
        assert!(matches!(
            provider.send_log(Severity::Info, "ignored", Attributes::new()),
            Err(Error::NotEnabled)
        ));
        assert_eq!(provider.log_count(), 0);
        assert_eq!(provider.lifecycle(), Lifecycle::Uninitialized);
        assert!(provider.subscribe_reports().is_none());
        provider.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn counts_every_send() {
        let exporter = InMemoryExporter::new();
        let provider = Provider::with_exporter(enabled(), Arc::new(exporter)).unwrap();

        for _ in 0..7 {
            provider
                .send_log(Severity::Debug, "tick", Attributes::new())
                .unwrap();
        }
        assert_eq!(provider.log_count(), 7);
        provider.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn report_resets_once_per_interval() {
        let exporter = InMemoryExporter::new();
        let provider = Provider::with_exporter(enabled(), Arc::new(exporter)).unwrap();
        let mut reports = provider.subscribe_reports().unwrap();

        for _ in 0..3 {
            provider
                .send_log(Severity::Info, "hello", Attributes::new())
                .unwrap();
        }

        let first = reports.recv().await.unwrap();
        assert_eq!(first.count, 3);
        assert_eq!(first.elapsed, Duration::from_secs(60));
        assert!((first.rate - 0.05).abs() < 1e-9);
        assert_eq!(provider.log_count(), 0);

        let second = reports.recv().await.unwrap();
        assert_eq!(second.count, 0);
        assert_eq!(second.elapsed, Duration::from_secs(60));
        assert!(second.rate.abs() < f64::EPSILON);

        provider.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_twice_is_harmless() {
        let exporter = InMemoryExporter::new();
        let provider =
            Provider::with_exporter(enabled(), Arc::new(exporter.clone())).unwrap();

        provider.shutdown().await.unwrap();
        assert_eq!(provider.lifecycle(), Lifecycle::Stopped);
        provider.shutdown().await.unwrap();
        assert_eq!(provider.lifecycle(), Lifecycle::Stopped);

        assert_eq!(exporter.shutdown_calls(), 1);
        assert!(matches!(
            provider.send_log(Severity::Info, "late", Attributes::new()),
            Err(Error::NotEnabled)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn single_record_reaches_exporter() {
        let exporter = InMemoryExporter::new();
        let provider =
            Provider::with_exporter(enabled(), Arc::new(exporter.clone())).unwrap();

        let endpoint = provider.endpoint().unwrap();
        assert_eq!(endpoint.host_port(), "localhost:4318");
        assert_eq!(endpoint.path(), "/v1/logs");

        let mut attributes = Attributes::new();
        attributes.insert("k".to_string(), Value::from("v"));
        provider
            .send_log(Severity::Info, "test", attributes)
            .unwrap();
        provider.shutdown().await.unwrap();

        let batches = exporter.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        let record = &batches[0][0];
        assert_eq!(record.severity_text, "info");
        assert_eq!(record.body, "test");
        assert_eq!(record.attributes.get("k"), Some(&Value::from("v")));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_is_bounded_by_one_deadline() {
        let exporter = InMemoryExporter::stalled();
        let provider = Provider::with_exporter(enabled(), Arc::new(exporter)).unwrap();

        for _ in 0..10 {
            provider
                .send_log(Severity::Info, "stuck", Attributes::new())
                .unwrap();
        }
        // Let the worker pick up the full batch and stall inside the export.
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        let start = Instant::now();
        let res = provider.shutdown().await;

        assert!(start.elapsed() <= Duration::from_secs(5));
        assert!(matches!(res, Err(Error::ShutdownTimeout(bound)) if bound == Duration::from_secs(5)));
        assert_eq!(provider.lifecycle(), Lifecycle::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_shutdown_waits_for_the_first() {
        let exporter = InMemoryExporter::stalled();
        let provider = Provider::with_exporter(enabled(), Arc::new(exporter)).unwrap();
        provider
            .send_log(Severity::Info, "stuck", Attributes::new())
            .unwrap();

        let (first, (second, seen)) = tokio::join!(provider.shutdown(), async {
            let res = provider.shutdown().await;
            (res, provider.lifecycle())
        });

        assert!(matches!(first, Err(Error::ShutdownTimeout(_))));
        assert!(second.is_ok());
        assert_eq!(seen, Lifecycle::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn every_accepted_record_is_flushed() {
        let exporter = InMemoryExporter::new();
        let mut config = enabled();
        config.batch.max_queue_size = 32_768;
        config.batch.max_export_batch_size = 512;
        let provider =
            Arc::new(Provider::with_exporter(config, Arc::new(exporter.clone())).unwrap());

        let sender = {
            let provider = Arc::clone(&provider);
            std::thread::spawn(move || {
                let mut accepted: usize = 0;
                for i in 0..20_000 {
                    match provider.send_log(Severity::Info, i.to_string(), Attributes::new()) {
                        Ok(()) => accepted += 1,
                        Err(_) => break,
                    }
                }
                accepted
            })
        };
        provider.shutdown().await.unwrap();
        let accepted = sender.join().unwrap();

        assert_eq!(exporter.records().len(), accepted);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_exporter_times_out_but_stops() {
        let exporter = InMemoryExporter::stalled();
        let provider = Provider::with_exporter(enabled(), Arc::new(exporter)).unwrap();

        provider
            .send_log(Severity::Error, "stuck", Attributes::new())
            .unwrap();
        let res = provider.shutdown().await;

        assert!(matches!(res, Err(Error::ShutdownTimeout(_))));
        assert_eq!(provider.lifecycle(), Lifecycle::Stopped);
    }
}
