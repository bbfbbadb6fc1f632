//! Endpoint parsing.
//!
//! An endpoint string is resolved once, at transport construction, into an
//! [`EndpointDescriptor`]. Parsing never fails: anything missing or malformed
//! falls back to a default so that a bad configuration only surfaces as an
//! error on the first send.

use std::fmt;
use url::{Host, Url};

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PATH: &str = "/";

/// URL scheme understood by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    /// Plaintext HTTP/1.1.
    #[default]
    Http,
    /// HTTP/1.1 over TLS.
    Https,
}

impl Scheme {
    /// Port used when the endpoint does not name one.
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    /// Returns the scheme as it appears in a URL.
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// The parts of an endpoint URL the transport needs to dial and address requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// Scheme, `http` unless the endpoint says `https`.
    pub scheme: Scheme,
    /// Host name or IP literal (IPv6 without brackets).
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Request target: path plus `?query` when one was given.
    pub path_with_query: String,
}

impl Default for EndpointDescriptor {
    fn default() -> Self {
        Self {
            scheme: Scheme::Http,
            host: DEFAULT_HOST.to_string(),
            port: Scheme::Http.default_port(),
            path_with_query: DEFAULT_PATH.to_string(),
        }
    }
}

impl EndpointDescriptor {
    /// Parses an endpoint string, applying defaults for anything absent or unparsable.
    ///
    /// - scheme: `http` unless `https`
    /// - host: `localhost`
    /// - port: 443 for https, 80 otherwise
    /// - path: `/`, with `?query` appended when present
    pub fn parse(endpoint: &str) -> Self {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Self::default();
        }

        let parsed = if endpoint.starts_with('/') {
            Url::parse("http://localhost").and_then(|base| base.join(endpoint))
        } else if endpoint.contains("://") {
            Url::parse(endpoint)
        } else {
            Url::parse(&format!("http://{endpoint}"))
        };

        match parsed {
            Ok(url) => Self::from_url(&url),
            Err(e) => {
                tracing::debug!(endpoint, error = %e, "Unparsable endpoint, using defaults");
                Self::default()
            }
        }
    }

    fn from_url(url: &Url) -> Self {
        let scheme = if url.scheme().eq_ignore_ascii_case("https") {
            Scheme::Https
        } else {
            Scheme::Http
        };

        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => DEFAULT_HOST.to_string(),
        };

        let port = url.port().unwrap_or_else(|| scheme.default_port());

        let mut path_with_query = match url.path() {
            "" => DEFAULT_PATH.to_string(),
            path if path.starts_with('/') => path.to_string(),
            path => format!("/{path}"),
        };
        if let Some(query) = url.query() {
            path_with_query.push('?');
            path_with_query.push_str(query);
        }

        Self {
            scheme,
            host,
            port,
            path_with_query,
        }
    }

    /// Value for the `Host` request header. The port is omitted when it is
    /// the scheme's default.
    pub fn authority(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };

        if self.port == self.scheme.default_port() {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }

    /// Whether connections to this endpoint are wrapped in TLS.
    pub fn is_tls(&self) -> bool {
        self.scheme == Scheme::Https
    }
}

impl fmt::Display for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}{}",
            self.scheme.as_str(),
            self.authority(),
            self.path_with_query
        )
    }
}

/// Telemetry signal, used to derive the per-signal OTLP path.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Metrics (`/v1/metrics`).
    Metrics,
    /// Logs (`/v1/logs`).
    Logs,
    /// Traces (`/v1/traces`).
    Traces,
}

impl Signal {
    /// The OTLP/HTTP path for this signal.
    pub fn path(self) -> &'static str {
        match self {
            Signal::Metrics => "/v1/metrics",
            Signal::Logs => "/v1/logs",
            Signal::Traces => "/v1/traces",
        }
    }
}

/// Resolves a collector endpoint for one signal.
///
/// A base URL with no path (or just `/`) gets the signal path appended; an
/// endpoint that already names a path is used as-is.
pub fn signal_endpoint(endpoint: &str, signal: Signal) -> String {
    let trimmed = endpoint.trim();
    let has_path = match Url::parse(trimmed) {
        Ok(url) => !matches!(url.path(), "" | "/"),
        Err(_) => false,
    };

    if has_path {
        trimmed.to_string()
    } else {
        format!("{}{}", trimmed.trim_end_matches('/'), signal.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_full_url() {
        let d = EndpointDescriptor::parse("https://collector.example.com:4318/v1/metrics");
        assert_eq!(d.scheme, Scheme::Https);
        assert_eq!(d.host, "collector.example.com");
        assert_eq!(d.port, 4318);
        assert_eq!(d.path_with_query, "/v1/metrics");
    }

    #[test]
    fn test_parse_default_ports() {
        let http = EndpointDescriptor::parse("http://collector/v1/metrics");
        assert_eq!(http.port, 80);

        let https = EndpointDescriptor::parse("https://collector/v1/metrics");
        assert_eq!(https.port, 443);
        assert!(https.is_tls());
    }

    #[test]
    fn test_parse_appends_query() {
        let d = EndpointDescriptor::parse("http://127.0.0.1:4318/v1/metrics?tenant=a&x=1");
        assert_eq!(d.path_with_query, "/v1/metrics?tenant=a&x=1");
    }

    #[test]
    fn test_parse_missing_path_defaults_to_root() {
        let d = EndpointDescriptor::parse("http://127.0.0.1:4318");
        assert_eq!(d.path_with_query, "/");
    }

    #[test]
    fn test_parse_without_scheme() {
        let d = EndpointDescriptor::parse("collector:4318/v1/logs");
        assert_eq!(d.scheme, Scheme::Http);
        assert_eq!(d.host, "collector");
        assert_eq!(d.port, 4318);
        assert_eq!(d.path_with_query, "/v1/logs");
    }

    #[test]
    fn test_parse_path_only() {
        let d = EndpointDescriptor::parse("/v1/metrics");
        assert_eq!(d.host, "localhost");
        assert_eq!(d.port, 80);
        assert_eq!(d.path_with_query, "/v1/metrics");
    }

    #[test]
    fn test_parse_garbage_uses_defaults() {
        assert_eq!(EndpointDescriptor::parse(""), EndpointDescriptor::default());
        assert_eq!(
            EndpointDescriptor::parse("http://:99999/"),
            EndpointDescriptor::default()
        );
    }

    #[test]
    fn test_parse_ipv6() {
        let d = EndpointDescriptor::parse("http://[::1]:4318/v1/metrics");
        assert_eq!(d.host, "::1");
        assert_eq!(d.authority(), "[::1]:4318");
    }

    #[test]
    fn test_authority_omits_default_port() {
        let d = EndpointDescriptor::parse("https://collector/v1/metrics");
        assert_eq!(d.authority(), "collector");

        let d = EndpointDescriptor::parse("http://collector:4318/");
        assert_eq!(d.authority(), "collector:4318");
    }

    #[test]
    fn test_display() {
        let d = EndpointDescriptor::parse("http://collector:4318/v1/metrics?a=b");
        assert_eq!(d.to_string(), "http://collector:4318/v1/metrics?a=b");
    }

    #[test]
    fn test_signal_endpoint() {
        assert_eq!(
            signal_endpoint("http://collector:4318", Signal::Metrics),
            "http://collector:4318/v1/metrics"
        );
        assert_eq!(
            signal_endpoint("http://collector:4318/", Signal::Logs),
            "http://collector:4318/v1/logs"
        );
        assert_eq!(
            signal_endpoint("http://collector:4318/custom/path", Signal::Metrics),
            "http://collector:4318/custom/path"
        );
    }

    proptest! {
        #[test]
        fn test_parse_never_panics_and_path_is_absolute(input in ".*") {
            let d = EndpointDescriptor::parse(&input);
            prop_assert!(!d.host.is_empty());
            prop_assert!(d.path_with_query.starts_with('/'));
        }
    }
}
