//! Collector endpoint resolution.
//!
//! Users configure the collector as `host:port`, `host:port/path` or a full
//! `http(s)://host:port/path` URL. The exporter needs the transport target and
//! the URL path separately.

/// Path logs are posted to when the endpoint carries none.
pub const DEFAULT_LOGS_PATH: &str = "/v1/logs";

/// A resolved collector endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host_port: String,
    path: String,
}

impl Endpoint {
    /// Resolve a raw endpoint string.
    ///
    /// A leading `http://` or `https://` is stripped and the remainder is split
    /// at its first `/`. There is no failure mode: input without a `/` is taken
    /// whole as the host and port.
    #[must_use]
    pub fn resolve(raw: &str) -> Self {
        let rest = raw
            .strip_prefix("http://")
            .or_else(|| raw.strip_prefix("https://"))
            .unwrap_or(raw);

        match rest.split_once('/') {
            Some((host_port, path)) => Self {
                host_port: host_port.to_string(),
                path: format!("/{path}"),
            },
            None => Self {
                host_port: rest.to_string(),
                path: String::new(),
            },
        }
    }

    /// The transport target, `host:port`.
    #[must_use]
    pub fn host_port(&self) -> &str {
        &self.host_port
    }

    /// The configured path, empty or starting with `/`.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The path logs are posted to.
    #[must_use]
    pub fn logs_path(&self) -> &str {
        if self.path.is_empty() {
            DEFAULT_LOGS_PATH
        } else {
            &self.path
        }
    }

    /// The plaintext URL logs are posted to.
    #[must_use]
    pub fn logs_url(&self) -> String {
        format!("http://{}{}", self.host_port, self.logs_path())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::Endpoint;

    #[test]
    fn strips_scheme_and_splits_path() {
        let ep = Endpoint::resolve("http://collector:4318/v1/logs");
        assert_eq!(ep.host_port(), "collector:4318");
        assert_eq!(ep.path(), "/v1/logs");

        let ep = Endpoint::resolve("https://collector:4318/custom/logs");
        assert_eq!(ep.host_port(), "collector:4318");
        assert_eq!(ep.path(), "/custom/logs");
    }

    #[test]
    fn no_path_is_empty() {
        let ep = Endpoint::resolve("collector:4318");
        assert_eq!(ep.host_port(), "collector:4318");
        assert_eq!(ep.path(), "");
        assert_eq!(ep.logs_url(), "http://collector:4318/v1/logs");
    }

    #[test]
    fn bare_host_with_path() {
        let ep = Endpoint::resolve("localhost:4318/v1/logs");
        assert_eq!(ep.host_port(), "localhost:4318");
        assert_eq!(ep.path(), "/v1/logs");
        assert_eq!(ep.logs_url(), "http://localhost:4318/v1/logs");
    }

    #[test]
    fn trailing_slash_keeps_root_path() {
        let ep = Endpoint::resolve("http://collector:4318/");
        assert_eq!(ep.host_port(), "collector:4318");
        assert_eq!(ep.path(), "/");
        assert_eq!(ep.logs_path(), "/");
    }

    #[test]
    fn malformed_input_degrades_to_host() {
        let ep = Endpoint::resolve("not a url");
        assert_eq!(ep.host_port(), "not a url");
        assert_eq!(ep.path(), "");
    }

    proptest! {
        #[test]
        fn host_port_never_has_scheme_or_slash(
            scheme in prop::sample::select(vec!["", "http://", "https://"]),
            host in "[a-z0-9.-]{1,20}(:[0-9]{1,5})?",
            path in "(/[a-z0-9/]{0,20})?",
        ) {
            let ep = Endpoint::resolve(&format!("{scheme}{host}{path}"));
            prop_assert_eq!(ep.host_port(), host.as_str());
            prop_assert_eq!(ep.path(), path.as_str());
            prop_assert!(!ep.host_port().contains('/'));
            prop_assert!(ep.path().is_empty() || ep.path().starts_with('/'));
        }
    }
}
