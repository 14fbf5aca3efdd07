//! The export client.
//!
//! An [`Exporter`] takes ownership of a batch of [`LogRecord`]s and delivers
//! it to the collector. [`HttpExporter`] is the OTLP/HTTP implementation: it
//! encodes the batch as an `ExportLogsServiceRequest` and POSTs it over
//! plaintext HTTP/1.1. There is no retry, a failed batch is the caller's to
//! drop.
//!
//! ## Metrics
//!
//! `requests_sent`: Total number of export requests sent
//! `request_ok`: Export requests answered with a 2xx status
//! `request_failure`: Export requests that failed, labeled by `reason`
//! `bytes_written`: Total encoded bytes sent
//!

use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use bytes::Bytes;
use http::{
    Method, Request, StatusCode, Uri,
    header::{CONTENT_LENGTH, CONTENT_TYPE},
};
use http_body_util::{BodyExt, combinators::BoxBody};
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use metrics::counter;
use opentelemetry_proto::tonic::{
    collector::logs::v1::ExportLogsServiceRequest,
    common::v1::{AnyValue, InstrumentationScope, KeyValue, any_value},
    logs::v1::{self as otlp_logs, ResourceLogs, ScopeLogs},
    resource::v1::Resource,
};
use prost::Message;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    endpoint::Endpoint,
    record::{LogRecord, Value},
};

/// Name reported as the `service.name` resource attribute and the
/// instrumentation scope.
pub const SERVICE_NAME: &str = "log-genie";

fn default_request_timeout_millis() -> u64 {
    5_000
}

fn default_service_name() -> String {
    SERVICE_NAME.to_string()
}

/// Wire encoding of export requests.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    /// OTLP/JSON, `application/json`
    #[default]
    Json,
    /// Binary OTLP, `application/x-protobuf`
    Protobuf,
}

impl Encoding {
    fn content_type(self) -> &'static str {
        match self {
            Encoding::Json => "application/json",
            Encoding::Protobuf => "application/x-protobuf",
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
/// Configuration of [`HttpExporter`].
pub struct Config {
    /// Bound on every delivery attempt, connection through response body.
    #[serde(default = "default_request_timeout_millis")]
    pub request_timeout_millis: u64,
    /// Wire encoding of the request body.
    #[serde(default)]
    pub encoding: Encoding,
    /// The `service.name` resource attribute.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout_millis: default_request_timeout_millis(),
            encoding: Encoding::default(),
            service_name: default_service_name(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
/// Errors produced by an [`Exporter`].
pub enum Error {
    /// The collector URI could not be built from the endpoint.
    #[error("Invalid collector URI {uri}: {source}")]
    InvalidUri {
        /// The URI as assembled from the endpoint
        uri: String,
        /// Underlying parse error
        #[source]
        source: http::uri::InvalidUri,
    },
    /// Wrapper around [`http::Error`].
    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),
    /// Error making the HTTP request
    #[error("Failed to send export request to {uri}: {source}")]
    RequestFailed {
        /// Target URI
        uri: String,
        /// Underlying client error
        #[source]
        source: Box<hyper_util::client::legacy::Error>,
    },
    /// Error reading the response body
    #[error("Failed to read collector response: {0}")]
    Body(#[from] hyper::Error),
    /// The collector answered with a non-2xx status.
    #[error("Collector responded {status}: {body}")]
    Status {
        /// Response status
        status: StatusCode,
        /// Response body, lossily decoded
        body: String,
    },
    /// The attempt did not complete within its bound.
    #[error("Export request timed out after {0:?}")]
    Timeout(Duration),
    /// JSON encoding of the request failed.
    #[error("Failed to encode export request: {0}")]
    Encode(#[from] serde_json::Error),
    /// The exporter has been shut down.
    #[error("Exporter is shut down")]
    Closed,
}

/// Delivery of batches to a collector.
///
/// Implementations must be cheap to share between tasks. `shutdown` is called
/// once by the batching processor after its final flush; implementations
/// must tolerate further calls.
#[async_trait]
pub trait Exporter: Send + Sync + fmt::Debug {
    /// Deliver `batch`.
    ///
    /// # Errors
    ///
    /// Any failure to deliver. The batch is consumed either way.
    async fn export(&self, batch: Vec<LogRecord>) -> Result<(), Error>;

    /// Release transport resources. Later exports fail with
    /// [`Error::Closed`].
    async fn shutdown(&self);
}

pub(crate) fn full<T: Into<Bytes>>(chunk: T) -> BoxBody<Bytes, hyper::Error> {
    http_body_util::Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

fn unix_nanos(ts: SystemTime) -> u64 {
    ts.duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
}

fn any_value(value: &Value) -> AnyValue {
    let value = match value {
        Value::String(s) => any_value::Value::StringValue(s.clone()),
        Value::Int(i) => any_value::Value::IntValue(*i),
        Value::Double(d) => any_value::Value::DoubleValue(*d),
        Value::Bool(b) => any_value::Value::BoolValue(*b),
    };
    AnyValue { value: Some(value) }
}

fn string_value(s: &str) -> Option<AnyValue> {
    Some(AnyValue {
        value: Some(any_value::Value::StringValue(s.to_string())),
    })
}

/// Encode `batch` as a single-resource, single-scope OTLP logs request.
#[must_use]
pub fn encode(batch: &[LogRecord], service_name: &str) -> ExportLogsServiceRequest {
    let observed = unix_nanos(SystemTime::now());
    let log_records = batch
        .iter()
        .map(|record| otlp_logs::LogRecord {
            time_unix_nano: unix_nanos(record.timestamp),
            observed_time_unix_nano: observed,
            severity_number: record.severity.number(),
            severity_text: record.severity_text.clone(),
            body: string_value(&record.body),
            attributes: record
                .attributes
                .iter()
                .map(|(key, value)| KeyValue {
                    key: key.clone(),
                    value: Some(any_value(value)),
                })
                .collect(),
            ..Default::default()
        })
        .collect();

    ExportLogsServiceRequest {
        resource_logs: vec![ResourceLogs {
            resource: Some(Resource {
                attributes: vec![KeyValue {
                    key: "service.name".to_string(),
                    value: string_value(service_name),
                }],
                ..Default::default()
            }),
            scope_logs: vec![ScopeLogs {
                scope: Some(InstrumentationScope {
                    name: SERVICE_NAME.to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    ..Default::default()
                }),
                log_records,
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

/// The OTLP/HTTP exporter.
pub struct HttpExporter {
    client: Client<HttpConnector, BoxBody<Bytes, hyper::Error>>,
    uri: Uri,
    encoding: Encoding,
    service_name: String,
    request_timeout: Duration,
    closed: AtomicBool,
}

impl fmt::Debug for HttpExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpExporter")
            .field("uri", &self.uri)
            .field("encoding", &self.encoding)
            .field("request_timeout", &self.request_timeout)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl HttpExporter {
    /// Create a new [`HttpExporter`] posting to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUri`] if the endpoint does not form a valid
    /// URI.
    pub fn new(endpoint: &Endpoint, config: &Config) -> Result<Self, Error> {
        let raw = endpoint.logs_url();
        let uri = raw
            .parse::<Uri>()
            .map_err(|source| Error::InvalidUri { uri: raw, source })?;

        let client = Client::builder(TokioExecutor::new())
            .retry_canceled_requests(false)
            .build_http();

        Ok(Self {
            client,
            uri,
            encoding: config.encoding,
            service_name: config.service_name.clone(),
            request_timeout: Duration::from_millis(config.request_timeout_millis),
            closed: AtomicBool::new(false),
        })
    }

    /// The URI batches are posted to.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    fn body(&self, batch: &[LogRecord]) -> Result<Bytes, Error> {
        let request = encode(batch, &self.service_name);
        let bytes = match self.encoding {
            Encoding::Json => serde_json::to_vec(&request)?,
            Encoding::Protobuf => request.encode_to_vec(),
        };
        Ok(Bytes::from(bytes))
    }

    async fn post(&self, body: Bytes) -> Result<(), Error> {
        let body_length = body.len();
        let request = Request::builder()
            .method(Method::POST)
            .uri(&self.uri)
            .header(CONTENT_TYPE, self.encoding.content_type())
            .header(CONTENT_LENGTH, body_length)
            .body(full(body))?;

        counter!("requests_sent").increment(1);
        let response = self
            .client
            .request(request)
            .await
            .map_err(|source| Error::RequestFailed {
                uri: self.uri.to_string(),
                source: Box::new(source),
            })?;
        counter!("bytes_written").increment(body_length as u64);

        let status = response.status();
        let payload = response.into_body().collect().await?.to_bytes();
        if status.is_success() {
            debug!("collector accepted batch with {status}");
            Ok(())
        } else {
            Err(Error::Status {
                status,
                body: String::from_utf8_lossy(&payload).into_owned(),
            })
        }
    }
}

#[async_trait]
impl Exporter for HttpExporter {
    async fn export(&self, batch: Vec<LogRecord>) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let body = self.body(&batch)?;
        drop(batch);

        let res = match tokio::time::timeout(self.request_timeout, self.post(body)).await {
            Ok(res) => res,
            Err(_elapsed) => Err(Error::Timeout(self.request_timeout)),
        };
        match &res {
            Ok(()) => counter!("request_ok").increment(1),
            Err(err) => {
                let reason = match err {
                    Error::Timeout(_) => "timeout",
                    Error::Status { .. } => "status",
                    _ => "connection",
                };
                counter!("request_failure", "reason" => reason).increment(1);
            }
        }
        res
    }

    async fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("exporter for {uri} closed", uri = self.uri);
        }
    }
}
