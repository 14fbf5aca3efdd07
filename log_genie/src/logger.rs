//! The logger: fan-out of synthesized events.
//!
//! A [`Logger`] writes each event as a local JSON line, hands it to the
//! telemetry [`Provider`], or both. Local lines are always on when telemetry
//! is off. Failures on the telemetry side are written locally as error lines
//! regardless of the local-logs setting, so they are never silent.

use std::{io::Write, sync::Arc};

use tracing::{error, warn};

use crate::{
    config::Config,
    event::{Event, EventKind},
    local::JsonLines,
    telemetry::{
        Provider,
        record::{Attributes, Severity, Value},
    },
};

/// Fan-out of events to local output and the collector.
#[derive(Debug)]
pub struct Logger<W> {
    sink: JsonLines<W>,
    local_enabled: bool,
    telemetry: Option<Arc<Provider>>,
}

impl<W: Write> Logger<W> {
    /// Create a new [`Logger`] writing local lines to `writer`.
    ///
    /// If telemetry is enabled but the provider cannot be built the error is
    /// written locally and the logger falls back to local output only. Must
    /// be called from within a tokio runtime when telemetry is enabled.
    #[must_use]
    pub fn new(config: &Config, writer: W) -> Self {
        let mut logger = Self::with_provider(config, writer, None);
        if !config.telemetry.enabled {
            return logger;
        }

        match Provider::new(config.telemetry.clone()) {
            Ok(provider) => {
                logger.telemetry = Some(Arc::new(provider));
                logger.line(
                    Severity::Info,
                    "Telemetry provider initialized successfully",
                    &Attributes::new(),
                );
            }
            Err(err) => {
                error!("telemetry unavailable: {err}");
                logger.local_enabled = true;
                logger.error_line(
                    "Failed to initialize telemetry provider, falling back to local logging",
                    &err,
                );
            }
        }
        logger
    }

    /// Create a new [`Logger`] around an existing provider.
    #[must_use]
    pub fn with_provider(config: &Config, writer: W, telemetry: Option<Arc<Provider>>) -> Self {
        Self {
            sink: JsonLines::new(writer, config.verbosity),
            local_enabled: config.local_logs_enabled(),
            telemetry,
        }
    }

    /// Whether events are shipped to the collector.
    #[must_use]
    pub fn telemetry_enabled(&self) -> bool {
        self.telemetry.is_some()
    }

    /// Whether events are written locally.
    #[must_use]
    pub fn local_enabled(&self) -> bool {
        self.local_enabled
    }

    /// The telemetry provider, if any.
    #[must_use]
    pub fn provider(&self) -> Option<&Arc<Provider>> {
        self.telemetry.as_ref()
    }

    /// Emit one event.
    pub fn emit(&mut self, event: Event) {
        let Event {
            kind,
            severity,
            message,
            attributes,
        } = event;

        if self.local_enabled {
            self.line(severity, &message, &attributes);
        }

        let Some(provider) = &self.telemetry else {
            return;
        };
        if let Err(err) = provider.send_log(severity, message, attributes) {
            let context = match kind {
                EventKind::Ordinary => "Failed to send log to telemetry endpoint",
                EventKind::Error => "Failed to send error log to telemetry endpoint",
            };
            self.error_line(context, &err);
        }
    }

    /// Write an informational line tagged `app=log-genie`, regardless of the
    /// local-logs setting.
    pub fn announce(&mut self, message: &str) {
        let mut attributes = Attributes::new();
        attributes.insert("app".to_string(), Value::from("log-genie"));
        self.line(Severity::Info, message, &attributes);
    }

    /// Shut the telemetry provider down, flushing queued records.
    pub async fn shutdown(&self) {
        if let Some(provider) = &self.telemetry {
            if let Err(err) = provider.shutdown().await {
                warn!("telemetry shutdown incomplete: {err}");
            }
        }
    }

    fn error_line(&mut self, message: &str, err: &dyn std::error::Error) {
        let mut attributes = Attributes::new();
        attributes.insert("error".to_string(), Value::display(err));
        self.line(Severity::Error, message, &attributes);
    }

    fn line(&mut self, severity: Severity, message: &str, attributes: &Attributes) {
        if let Err(err) = self.sink.write(severity, message, attributes) {
            warn!("local log line lost: {err}");
        }
    }
}
