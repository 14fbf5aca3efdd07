//! The log-genie synthetic log generator.
//!
//! This library supports the log-genie binary found elsewhere in this
//! project. It synthesizes structured log events at a configured rate and
//! writes them as local JSON lines, ships them to an OpenTelemetry collector
//! over OTLP/HTTP, or both.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod event;
pub mod local;
pub mod logger;
pub mod telemetry;
pub mod test;
