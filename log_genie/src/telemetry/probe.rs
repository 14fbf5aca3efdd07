//! The diagnostic prober.
//!
//! With `show_responses` set, the provider runs a [`Prober`] beside the
//! batching processor. It POSTs a fixed one-record payload straight to the
//! collector and logs whatever comes back, so an operator can see the
//! collector's raw answer without digging through exporter internals. The
//! prober shares nothing with the export path and never touches the sent-log
//! counter.
//!
//! ## Metrics
//!
//! `probe_requests_sent`: Diagnostic requests sent
//!

use std::time::Duration;

use log_genie_signal::Watcher;
use metrics::counter;
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{
    endpoint::Endpoint,
    export::encode,
    record::{Attributes, LogRecord, Severity, Value},
};

/// Service name carried by the diagnostic payload.
pub const PROBE_SERVICE_NAME: &str = "log-genie-test";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// What a single diagnostic request produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The collector answered with a non-empty body.
    Response {
        /// HTTP status code
        status: u16,
        /// Raw response body
        body: String,
    },
    /// The collector answered with an empty body.
    Empty {
        /// HTTP status code
        status: u16,
    },
    /// The request failed before a response was read.
    Failed {
        /// Rendered transport error
        error: String,
    },
}

/// The fixed diagnostic payload: one INFO record, "Test log message", with
/// attribute `test=value`.
#[must_use]
pub fn payload() -> ExportLogsServiceRequest {
    let mut attributes = Attributes::new();
    attributes.insert("test".to_string(), Value::from("value"));
    let record = LogRecord::now(Severity::Info, "Test log message", attributes);
    encode(&[record], PROBE_SERVICE_NAME)
}

/// Periodic direct POSTs to the collector.
#[derive(Debug)]
pub struct Prober {
    client: reqwest::Client,
    url: String,
    interval: Duration,
}

impl Prober {
    /// Create a new [`Prober`] targeting the logs URL of `endpoint`.
    #[must_use]
    pub fn new(endpoint: &Endpoint, interval: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: endpoint.logs_url(),
            interval,
        }
    }

    /// Send one diagnostic request and classify the answer.
    pub async fn probe(&self) -> ProbeOutcome {
        counter!("probe_requests_sent").increment(1);
        let resp = match self
            .client
            .post(&self.url)
            .timeout(REQUEST_TIMEOUT)
            .json(&payload())
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                return ProbeOutcome::Failed {
                    error: err.to_string(),
                };
            }
        };

        let status = resp.status().as_u16();
        match resp.text().await {
            Ok(body) if body.is_empty() => ProbeOutcome::Empty { status },
            Ok(body) => ProbeOutcome::Response { status, body },
            Err(err) => ProbeOutcome::Failed {
                error: err.to_string(),
            },
        }
    }

    /// Probe once immediately and then every interval until `shutdown`
    /// fires.
    pub async fn run(self, mut shutdown: Watcher) {
        info!(
            "diagnostic prober posting to {url} every {interval:?}",
            url = self.url,
            interval = self.interval
        );
        let mut poll = tokio::time::interval(self.interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    let outcome = self.probe().await;
                    report(&self.url, &outcome);
                }
                () = shutdown.cancelled() => {
                    debug!("diagnostic prober stopped");
                    return;
                }
            }
        }
    }
}

fn report(url: &str, outcome: &ProbeOutcome) {
    match outcome {
        ProbeOutcome::Response { status, body } if (200..300).contains(status) => {
            info!("collector {url} responded {status}: {body}");
        }
        ProbeOutcome::Response { status, body } => {
            warn!("collector {url} responded {status}: {body}");
        }
        ProbeOutcome::Empty { status } => {
            info!("collector {url} responded {status} with an empty body");
        }
        ProbeOutcome::Failed { error } => {
            warn!("diagnostic request to {url} failed: {error}");
        }
    }
}
