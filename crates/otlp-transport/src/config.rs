//! Transport configuration.
//!
//! Configuration is layered with figment, later sources overriding earlier:
//! 1. Default values (compiled in)
//! 2. An optional TOML file
//! 3. Standard OpenTelemetry environment variables (`OTEL_*`)
//! 4. Transport-specific environment variables (`OTLP_TRANSPORT_*`)
//!
//! # Supported Standard Environment Variables
//!
//! | Variable | Field | Notes |
//! |----------|-------|-------|
//! | `OTEL_EXPORTER_OTLP_METRICS_ENDPOINT` | `endpoint` | used verbatim |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | `endpoint` | `/v1/metrics` appended |
//! | `OTEL_EXPORTER_OTLP_PROTOCOL` | `content_type` | `http/protobuf` or `http/json` |
//! | `OTEL_EXPORTER_OTLP_HEADERS` | `headers` | comma-separated `key=value` |
//! | `OTEL_EXPORTER_OTLP_TIMEOUT` | `timeout` | milliseconds |

use crate::endpoint::{Signal, signal_endpoint};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "OTLP_TRANSPORT_";

/// `Content-Type` for OTLP protobuf payloads.
pub const CONTENT_TYPE_PROTOBUF: &str = "application/x-protobuf";
/// `Content-Type` for OTLP JSON payloads.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Immutable settings for one [`Transport`](crate::Transport).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Collector URL the transport POSTs to.
    pub endpoint: String,
    /// `Content-Type` sent with every payload.
    pub content_type: String,
    /// Extra headers added to every request, applied after the computed ones.
    pub headers: HashMap<String, String>,
    /// Overall request timeout in milliseconds. Connect, write and read
    /// phases are each capped at `min(timeout, 1s)`.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    /// Maximum number of idle keep-alive connections kept for reuse.
    pub pool_capacity: usize,
    /// Kernel send/receive buffer size for each socket.
    pub socket_buffer_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4318/v1/metrics".to_string(),
            content_type: CONTENT_TYPE_PROTOBUF.to_string(),
            headers: HashMap::new(),
            timeout: Duration::from_secs(10),
            pool_capacity: 8,
            socket_buffer_bytes: 64 * 1024,
        }
    }
}

impl TransportConfig {
    /// Default configuration pointed at `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Creates a builder starting from the defaults.
    pub fn builder(endpoint: impl Into<String>) -> TransportConfigBuilder {
        TransportConfigBuilder::new(endpoint)
    }

    /// Loads configuration from defaults and the environment only.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed.
    #[allow(clippy::result_large_err)]
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment(None::<&Path>).extract()
    }

    /// Loads configuration with a TOML file layered between defaults and the
    /// environment. A missing file is skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed.
    #[allow(clippy::result_large_err)]
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Self, figment::Error> {
        Self::figment(Some(config_path)).extract()
    }

    fn figment<P: AsRef<Path>>(config_path: Option<P>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(TransportConfig::default()));

        if let Some(path) = config_path
            && path.as_ref().exists()
        {
            figment = figment.merge(Toml::file(path));
        }

        figment
            .merge(standard_otel_env())
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Connect, write and read phase timeout.
    pub fn phase_timeout(&self) -> Duration {
        self.timeout.min(Duration::from_secs(1))
    }
}

/// Builder for constructing configuration programmatically.
#[must_use = "builders do nothing unless .build() is called"]
pub struct TransportConfigBuilder {
    config: TransportConfig,
}

impl TransportConfigBuilder {
    /// Creates a builder with default values.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            config: TransportConfig::new(endpoint),
        }
    }

    /// Sets the payload content type.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.config.content_type = content_type.into();
        self
    }

    /// Adds one extra request header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.headers.insert(key.into(), value.into());
        self
    }

    /// Adds several extra request headers.
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.config
            .headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets the overall request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Sets the overall request timeout in (fractional) seconds. Negative or
    /// non-finite values are treated as zero.
    pub fn timeout_secs(mut self, seconds: f64) -> Self {
        self.config.timeout = Duration::try_from_secs_f64(seconds).unwrap_or(Duration::ZERO);
        self
    }

    /// Sets how many idle connections are kept for reuse.
    pub fn pool_capacity(mut self, capacity: usize) -> Self {
        self.config.pool_capacity = capacity;
        self
    }

    /// Sets the socket send/receive buffer size.
    pub fn socket_buffer_bytes(mut self, bytes: usize) -> Self {
        self.config.socket_buffer_bytes = bytes;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> TransportConfig {
        self.config
    }
}

/// Partial config for standard OTEL env var overrides.
#[derive(Debug, Default, Serialize)]
struct PartialConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<u64>,
}

fn standard_otel_env() -> Serialized<PartialConfig> {
    let mut config = PartialConfig::default();

    if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_METRICS_ENDPOINT") {
        config.endpoint = Some(endpoint);
    } else if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.endpoint = Some(signal_endpoint(&endpoint, Signal::Metrics));
    }

    if let Ok(protocol) = std::env::var("OTEL_EXPORTER_OTLP_PROTOCOL") {
        config.content_type = match protocol.to_lowercase().as_str() {
            "http/protobuf" => Some(CONTENT_TYPE_PROTOBUF.to_string()),
            "http/json" => Some(CONTENT_TYPE_JSON.to_string()),
            _ => None,
        };
    }

    if let Ok(headers_str) = std::env::var("OTEL_EXPORTER_OTLP_HEADERS") {
        for pair in headers_str.split(',') {
            if let Some((key, value)) = pair.split_once('=') {
                config
                    .headers
                    .insert(key.trim().to_string(), value.trim().to_string());
            }
        }
    }

    if let Ok(timeout) = std::env::var("OTEL_EXPORTER_OTLP_TIMEOUT") {
        config.timeout = timeout.trim().parse().ok();
    }

    Serialized::defaults(config)
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const OTEL_VARS: [(&str, Option<&str>); 5] = [
        ("OTEL_EXPORTER_OTLP_METRICS_ENDPOINT", None),
        ("OTEL_EXPORTER_OTLP_ENDPOINT", None),
        ("OTEL_EXPORTER_OTLP_PROTOCOL", None),
        ("OTEL_EXPORTER_OTLP_HEADERS", None),
        ("OTEL_EXPORTER_OTLP_TIMEOUT", None),
    ];

    #[test]
    fn test_default_config() {
        let config = TransportConfig::default();

        assert_eq!(config.content_type, "application/x-protobuf");
        assert!(config.headers.is_empty());
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.pool_capacity, 8);
        assert_eq!(config.socket_buffer_bytes, 65536);
    }

    #[test]
    fn test_phase_timeout_is_capped() {
        let config = TransportConfig::default();
        assert_eq!(config.phase_timeout(), Duration::from_secs(1));

        let config = TransportConfig::builder("http://x")
            .timeout_secs(0.5)
            .build();
        assert_eq!(config.phase_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_builder() {
        let config = TransportConfig::builder("https://collector:4318/v1/metrics")
            .content_type(CONTENT_TYPE_JSON)
            .header("Authorization", "Bearer t")
            .headers([("X-Tenant", "a")])
            .timeout(Duration::from_secs(3))
            .pool_capacity(2)
            .socket_buffer_bytes(1024)
            .build();

        assert_eq!(config.endpoint, "https://collector:4318/v1/metrics");
        assert_eq!(config.content_type, "application/json");
        assert_eq!(config.headers.get("Authorization").unwrap(), "Bearer t");
        assert_eq!(config.headers.get("X-Tenant").unwrap(), "a");
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert_eq!(config.pool_capacity, 2);
        assert_eq!(config.socket_buffer_bytes, 1024);
    }

    #[test]
    fn test_timeout_secs_rejects_negative() {
        let config = TransportConfig::builder("http://x").timeout_secs(-1.0).build();
        assert_eq!(config.timeout, Duration::ZERO);
    }

    #[test]
    #[serial]
    fn test_load_from_toml() {
        let toml_content = r#"
endpoint = "http://toml-collector:4318/v1/metrics"
content_type = "application/json"
timeout = 2500
pool_capacity = 3

[headers]
Authorization = "Bearer toml"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        temp_env::with_vars(OTEL_VARS, || {
            let config = TransportConfig::load_from_path(temp_file.path()).unwrap();

            assert_eq!(config.endpoint, "http://toml-collector:4318/v1/metrics");
            assert_eq!(config.content_type, "application/json");
            assert_eq!(config.timeout, Duration::from_millis(2500));
            assert_eq!(config.pool_capacity, 3);
            assert_eq!(config.socket_buffer_bytes, 65536);
            assert_eq!(config.headers.get("Authorization").unwrap(), "Bearer toml");
        });
    }

    #[test]
    #[serial]
    fn test_load_nonexistent_file_uses_defaults() {
        temp_env::with_vars(OTEL_VARS, || {
            let config = TransportConfig::load_from_path("/nonexistent/transport.toml").unwrap();
            assert_eq!(config, TransportConfig::default());
        });
    }

    #[test]
    #[serial]
    fn test_standard_env_overrides() {
        temp_env::with_vars(
            [
                ("OTEL_EXPORTER_OTLP_METRICS_ENDPOINT", None),
                ("OTEL_EXPORTER_OTLP_ENDPOINT", Some("http://env-collector:4318")),
                ("OTEL_EXPORTER_OTLP_PROTOCOL", Some("http/json")),
                ("OTEL_EXPORTER_OTLP_HEADERS", Some("authorization=Bearer env, x-a = b")),
                ("OTEL_EXPORTER_OTLP_TIMEOUT", Some("750")),
            ],
            || {
                let config = TransportConfig::load().unwrap();

                assert_eq!(config.endpoint, "http://env-collector:4318/v1/metrics");
                assert_eq!(config.content_type, "application/json");
                assert_eq!(config.headers.get("authorization").unwrap(), "Bearer env");
                assert_eq!(config.headers.get("x-a").unwrap(), "b");
                assert_eq!(config.timeout, Duration::from_millis(750));
            },
        );
    }

    #[test]
    #[serial]
    fn test_metrics_endpoint_takes_precedence() {
        temp_env::with_vars(
            [
                ("OTEL_EXPORTER_OTLP_METRICS_ENDPOINT", Some("http://m:1/custom")),
                ("OTEL_EXPORTER_OTLP_ENDPOINT", Some("http://base:4318")),
            ],
            || {
                let config = TransportConfig::load().unwrap();
                assert_eq!(config.endpoint, "http://m:1/custom");
            },
        );
    }

    #[test]
    #[serial]
    fn test_prefixed_env_wins() {
        temp_env::with_vars(
            [
                ("OTEL_EXPORTER_OTLP_METRICS_ENDPOINT", None),
                ("OTEL_EXPORTER_OTLP_ENDPOINT", Some("http://base:4318")),
                ("OTLP_TRANSPORT_ENDPOINT", Some("http://prefixed:9000/v1/metrics")),
                ("OTLP_TRANSPORT_POOL_CAPACITY", Some("16")),
            ],
            || {
                let config = TransportConfig::load().unwrap();
                assert_eq!(config.endpoint, "http://prefixed:9000/v1/metrics");
                assert_eq!(config.pool_capacity, 16);
            },
        );
    }

    #[test]
    fn test_timeout_serializes_as_millis() {
        let config = TransportConfig::builder("http://x:1/")
            .timeout(Duration::from_millis(1234))
            .build();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["timeout"], 1234);
    }
}
