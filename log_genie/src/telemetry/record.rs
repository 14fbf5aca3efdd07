//! The log record handed from producers to the batching processor.

use std::{collections::BTreeMap, fmt, str::FromStr, time::SystemTime};

use serde::{Deserialize, Serialize};

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Debug
    Debug,
    /// Info
    Info,
    /// Warn
    Warn,
    /// Error
    Error,
}

impl Severity {
    /// Every severity, least severe first.
    pub const ALL: [Severity; 4] = [
        Severity::Debug,
        Severity::Info,
        Severity::Warn,
        Severity::Error,
    ];

    /// The lower-case name carried as a record's severity text.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
        }
    }

    /// The OTLP `SeverityNumber` for this severity.
    #[must_use]
    pub fn number(self) -> i32 {
        match self {
            Severity::Debug => 5,
            Severity::Info => 9,
            Severity::Warn => 13,
            Severity::Error => 17,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a [`Severity`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown severity: {0}")]
pub struct ParseSeverityError(String);

impl FromStr for Severity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Severity::Debug),
            "info" => Ok(Severity::Info),
            "warn" | "warning" => Ok(Severity::Warn),
            "error" => Ok(Severity::Error),
            _ => Err(ParseSeverityError(s.to_string())),
        }
    }
}

/// A scalar attribute value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// String
    String(String),
    /// Signed integer, covers both `int` and `int64` inputs
    Int(i64),
    /// 64-bit float
    Double(f64),
    /// Boolean
    Bool(bool),
}

impl Value {
    /// Coerce any displayable value to its string form. This is the fallback
    /// for types with no scalar counterpart.
    #[must_use]
    pub fn display<T: fmt::Display + ?Sized>(value: &T) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Double(f64::from(v))
    }
}

macro_rules! value_from_lossless_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Int(i64::from(v))
                }
            }
        )*
    };
}

value_from_lossless_int!(i8, i16, i32, i64, u8, u16, u32);

macro_rules! value_from_wide_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    i64::try_from(v).map_or_else(|_| Value::display(&v), Value::Int)
                }
            }
        )*
    };
}

// Values that do not fit an i64 fall back to their string form.
value_from_wide_int!(u64, usize, isize, i128, u128);

/// Record attributes, ordered by key.
pub type Attributes = BTreeMap<String, Value>;

/// A single log record.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// When the record was produced.
    pub timestamp: SystemTime,
    /// Severity
    pub severity: Severity,
    /// Severity as text, the lower-case severity name.
    pub severity_text: String,
    /// The log message
    pub body: String,
    /// Key/value attributes
    pub attributes: Attributes,
}

impl LogRecord {
    /// Build a record stamped with the current time.
    #[must_use]
    pub fn now(severity: Severity, body: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            timestamp: SystemTime::now(),
            severity,
            severity_text: severity.as_str().to_string(),
            body: body.into(),
            attributes,
        }
    }
}
