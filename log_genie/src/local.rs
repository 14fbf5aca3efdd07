//! Local JSON-lines output.
//!
//! Each record becomes one JSON object per line with `level`, `msg` and
//! `time` keys next to the record's own fields, keys sorted. A field whose
//! name clashes with one of those three is kept as `fields.<name>`. Records
//! below the configured minimum severity are suppressed.

use std::io::{self, Write};

use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::telemetry::record::{Attributes, Severity};

const RESERVED_KEYS: [&str; 3] = ["level", "msg", "time"];

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`JsonLines`].
pub enum Error {
    /// Writing the line failed.
    #[error("Failed to write log line: {0}")]
    Io(#[from] io::Error),
    /// Serializing the line failed.
    #[error("Failed to serialize log line: {0}")]
    Json(#[from] serde_json::Error),
    /// Formatting the timestamp failed.
    #[error("Failed to format timestamp: {0}")]
    Time(#[from] time::error::Format),
}

/// Level names as written in the `level` key.
fn level_name(severity: Severity) -> &'static str {
    match severity {
        Severity::Debug => "debug",
        Severity::Info => "info",
        Severity::Warn => "warning",
        Severity::Error => "error",
    }
}

/// A JSON-lines log sink.
#[derive(Debug)]
pub struct JsonLines<W> {
    writer: W,
    min_severity: Severity,
}

impl<W: Write> JsonLines<W> {
    /// Create a new [`JsonLines`] writing records at or above
    /// `min_severity` to `writer`.
    #[must_use]
    pub fn new(writer: W, min_severity: Severity) -> Self {
        Self {
            writer,
            min_severity,
        }
    }

    /// Whether records at `severity` are written.
    #[must_use]
    pub fn enabled(&self, severity: Severity) -> bool {
        severity >= self.min_severity
    }

    /// Write one record stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if the line cannot be serialized or written.
    pub fn write(
        &mut self,
        severity: Severity,
        message: &str,
        attributes: &Attributes,
    ) -> Result<(), Error> {
        if !self.enabled(severity) {
            return Ok(());
        }

        let mut line = serde_json::Map::new();
        for (key, value) in attributes {
            let key = if RESERVED_KEYS.contains(&key.as_str()) {
                format!("fields.{key}")
            } else {
                key.clone()
            };
            line.insert(key, serde_json::to_value(value)?);
        }
        line.insert("level".to_string(), level_name(severity).into());
        line.insert("msg".to_string(), message.into());
        line.insert(
            "time".to_string(),
            OffsetDateTime::now_utc().format(&Rfc3339)?.into(),
        );

        serde_json::to_writer(&mut self.writer, &line)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::JsonLines;
    use crate::{
        telemetry::record::{Attributes, Severity, Value},
        test::writer::InMemoryWriter,
    };

    #[test]
    fn writes_level_msg_time_and_fields() {
        let buffer = InMemoryWriter::new();
        let mut sink = JsonLines::new(buffer.clone(), Severity::Info);

        let mut attributes = Attributes::new();
        attributes.insert("latency_ms".to_string(), Value::from(12));
        attributes.insert("service".to_string(), Value::from("Ledger"));
        sink.write(Severity::Warn, "slow upstream.", &attributes)
            .unwrap();

        let lines = buffer.parse_lines().unwrap();
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert_eq!(line["level"], "warning");
        assert_eq!(line["msg"], "slow upstream.");
        assert_eq!(line["latency_ms"], 12);
        assert_eq!(line["service"], "Ledger");
        let time = line["time"].as_str().unwrap();
        assert!(time.contains('T'));
    }

    #[test]
    fn suppresses_below_minimum() {
        let buffer = InMemoryWriter::new();
        let mut sink = JsonLines::new(buffer.clone(), Severity::Warn);

        sink.write(Severity::Debug, "quiet", &Attributes::new())
            .unwrap();
        sink.write(Severity::Info, "quiet", &Attributes::new())
            .unwrap();
        sink.write(Severity::Error, "loud", &Attributes::new())
            .unwrap();

        let lines = buffer.parse_lines().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["msg"], "loud");
    }

    #[test]
    fn clashing_fields_are_prefixed() {
        let buffer = InMemoryWriter::new();
        let mut sink = JsonLines::new(buffer.clone(), Severity::Debug);

        let mut attributes = Attributes::new();
        attributes.insert("msg".to_string(), Value::from("shadow"));
        sink.write(Severity::Info, "real", &attributes).unwrap();

        let lines = buffer.parse_lines().unwrap();
        assert_eq!(lines[0]["msg"], "real");
        assert_eq!(lines[0]["fields.msg"], "shadow");
    }
}
