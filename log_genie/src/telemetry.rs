//! OTLP log delivery.
//!
//! The [`Provider`] is the only piece callers touch directly. It resolves the
//! collector [`Endpoint`], builds the [`export::HttpExporter`], puts a
//! [`batch::BatchProcessor`] in front of it and runs the self-report loop and,
//! optionally, the diagnostic [`probe::Prober`]. All background tasks stop on
//! one shared cancellation signal.

use std::time::Duration;

pub mod batch;
pub mod endpoint;
pub mod export;
pub mod probe;
pub mod provider;
pub mod record;

pub use endpoint::Endpoint;
pub use provider::{Config, Lifecycle, Provider, Report};
pub use record::{Attributes, LogRecord, Severity, Value};

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Provider`].
pub enum Error {
    /// The exporter could not be built. Telemetry is unavailable, local
    /// output is unaffected.
    #[error("Failed to construct exporter: {0}")]
    Construction(#[source] export::Error),
    /// The provider is disabled or no longer running.
    #[error("Telemetry is not enabled")]
    NotEnabled,
    /// A batch or diagnostic request did not reach the collector.
    #[error("Delivery failed: {0}")]
    Delivery(#[source] export::Error),
    /// Shutdown did not finish within its bound, given here.
    #[error("Shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),
    /// A background task could not be attached to the shutdown signal.
    #[error("Failed to register shutdown watcher: {0}")]
    Signal(#[from] log_genie_signal::RegisterError),
}
