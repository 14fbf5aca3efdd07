//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program.
//!
//! Configuration is read as YAML from the `LOG_GENIE_CONFIG` environment
//! variable or a file on disk, and command-line [`Overrides`] are layered on
//! top. Every field has a default, so no configuration at all is valid.

use std::{
    env,
    io::Read,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::telemetry::{self, record::Severity};

/// Environment variable holding YAML configuration contents.
pub const CONFIG_ENV_VAR: &str = "LOG_GENIE_CONFIG";

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Config`]
pub enum Error {
    /// Could not read the configuration file
    #[error("Could not read config file {path}: {source}")]
    Io {
        /// The file that was read
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },
    /// Could not parse the configuration
    #[error("Failed to deserialize configuration: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// The rate was zero.
    #[error("rate must be at least one log per second")]
    ZeroRate,
}

fn default_rate() -> u32 {
    10
}

fn default_verbosity() -> Severity {
    Severity::Info
}

/// Parse a verbosity name. Unknown names fall back to info.
#[must_use]
pub fn parse_verbosity(raw: &str) -> Severity {
    raw.parse().unwrap_or_else(|_| {
        warn!("unknown verbosity {raw:?}, using info");
        Severity::Info
    })
}

fn deserialize_verbosity<'de, D>(deserializer: D) -> Result<Severity, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(parse_verbosity(&raw))
}

/// Main configuration struct for this program
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Log events generated per second
    #[serde(default = "default_rate")]
    pub rate: u32,
    /// Minimum severity written locally
    #[serde(
        default = "default_verbosity",
        deserialize_with = "deserialize_verbosity"
    )]
    pub verbosity: Severity,
    /// Write local logs even when telemetry is enabled
    #[serde(default)]
    pub local_logs: bool,
    /// Seed for the event synthesizer. Unset means a random stream.
    #[serde(default)]
    pub seed: Option<u64>,
    /// How generated events are spaced in time
    #[serde(default)]
    pub throttle: log_genie_throttle::Config,
    /// Collector export
    #[serde(default)]
    pub telemetry: telemetry::Config,
    /// Address of an optional Prometheus scrape endpoint for internal metrics
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            verbosity: default_verbosity(),
            local_logs: false,
            seed: None,
            throttle: log_genie_throttle::Config::default(),
            telemetry: telemetry::Config::default(),
            prometheus_addr: None,
        }
    }
}

/// Command-line values layered over a loaded [`Config`]. Unset fields leave
/// the configuration untouched.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Overrides {
    /// Log events per second
    pub rate: Option<u32>,
    /// Verbosity name, parsed leniently
    pub verbosity: Option<String>,
    /// Enable collector export
    pub telemetry: Option<bool>,
    /// Collector endpoint
    pub telemetry_endpoint: Option<String>,
    /// Enable local logs alongside telemetry
    pub local_logs: Option<bool>,
    /// Enable the diagnostic prober
    pub show_responses: Option<bool>,
    /// Prometheus scrape address
    pub prometheus_addr: Option<SocketAddr>,
    /// Synthesizer seed
    pub seed: Option<u64>,
}

impl Config {
    /// Parse a YAML configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `contents` is not a valid configuration.
    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Layer `overrides` on top of this configuration.
    pub fn apply(&mut self, overrides: Overrides) {
        let Overrides {
            rate,
            verbosity,
            telemetry,
            telemetry_endpoint,
            local_logs,
            show_responses,
            prometheus_addr,
            seed,
        } = overrides;

        if let Some(rate) = rate {
            self.rate = rate;
        }
        if let Some(verbosity) = verbosity {
            self.verbosity = parse_verbosity(&verbosity);
        }
        if let Some(enabled) = telemetry {
            self.telemetry.enabled = enabled;
        }
        if let Some(endpoint) = telemetry_endpoint {
            self.telemetry.endpoint = endpoint;
        }
        if let Some(local_logs) = local_logs {
            self.local_logs = local_logs;
        }
        if let Some(show_responses) = show_responses {
            self.telemetry.show_responses = show_responses;
        }
        if prometheus_addr.is_some() {
            self.prometheus_addr = prometheus_addr;
        }
        if seed.is_some() {
            self.seed = seed;
        }
    }

    /// Check invariants serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroRate`] if the rate is zero.
    pub fn validate(&self) -> Result<(), Error> {
        if self.rate == 0 {
            return Err(Error::ZeroRate);
        }
        Ok(())
    }

    /// Whether local JSON lines are written. They always are when telemetry
    /// is disabled.
    #[must_use]
    pub fn local_logs_enabled(&self) -> bool {
        self.local_logs || !self.telemetry.enabled
    }
}

fn read_file(path: &Path) -> Result<String, Error> {
    debug!("Attempting to open configuration file at: {}", path.display());
    let io_err = |source| Error::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .open(path)
        .map_err(io_err)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).map_err(io_err)?;
    Ok(contents)
}

/// Load the configuration.
///
/// The `LOG_GENIE_CONFIG` environment variable wins over `path`. With
/// neither the default configuration is returned.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the contents do not parse.
pub fn load(path: Option<&Path>) -> Result<Config, Error> {
    if let Ok(contents) = env::var(CONFIG_ENV_VAR) {
        debug!("Using config from env var '{CONFIG_ENV_VAR}'");
        return Config::from_yaml(&contents);
    }
    match path {
        Some(path) => Config::from_yaml(&read_file(path)?),
        None => Ok(Config::default()),
    }
}
