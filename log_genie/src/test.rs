//! Test support: an in-memory exporter and an in-memory local log sink.

pub mod exporter;
