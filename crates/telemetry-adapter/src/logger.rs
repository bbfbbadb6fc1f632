//! Structured log export over OTLP.
//!
//! A [`Log`] is turned into one OpenTelemetry log record: its severity comes
//! from the log type, its body is a structured payload (message, environment,
//! server, stack trace, tags, extra data, breadcrumbs, user) and it carries
//! `logger`, `release` and `transaction` attributes.

use crate::error::LoggerError;
use crate::otel::{SCOPE_NAME, ServiceIdentity, signal_transport};
use opentelemetry::Key;
use opentelemetry::logs::{AnyValue, LogRecord as _, Logger as _, LoggerProvider as _, Severity};
use opentelemetry_otlp::{LogExporter, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::logs::SdkLoggerProvider;
use otlp_transport::{Signal, Transport, TransportConfig};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogType {
    /// `error`
    Error,
    /// `warning`
    Warning,
    /// `info`
    Info,
    /// `debug`
    Debug,
    /// `verbose`
    Verbose,
}

impl LogType {
    /// The level name as sent on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            LogType::Error => "error",
            LogType::Warning => "warning",
            LogType::Info => "info",
            LogType::Debug => "debug",
            LogType::Verbose => "verbose",
        }
    }

    /// OpenTelemetry severity for this level.
    pub fn severity(self) -> Severity {
        match self {
            LogType::Verbose => Severity::Trace,
            LogType::Debug => Severity::Debug,
            LogType::Info => Severity::Info,
            LogType::Warning => Severity::Warn,
            LogType::Error => Severity::Error,
        }
    }
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Environment {
    /// `staging`
    Staging,
    /// `production`
    #[default]
    Production,
}

impl Environment {
    /// The environment name as sent on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

/// An event that led up to the log.
#[derive(Debug, Clone, PartialEq)]
pub struct Breadcrumb {
    /// Level of the event.
    pub kind: LogType,
    /// Free-form category, e.g. `http`.
    pub category: String,
    /// What happened.
    pub message: String,
    /// When it happened.
    pub timestamp: SystemTime,
}

impl Breadcrumb {
    /// A breadcrumb stamped with the current time.
    pub fn new(kind: LogType, category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            category: category.into(),
            message: message.into(),
            timestamp: SystemTime::now(),
        }
    }
}

/// The user affected by the logged event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    /// User id.
    pub id: Option<String>,
    /// Email address.
    pub email: Option<String>,
    /// Display name.
    pub username: Option<String>,
}

/// One log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Log {
    /// Level.
    pub kind: LogType,
    /// Main message.
    pub message: String,
    /// Emitting component; exported as the `logger` attribute.
    pub namespace: String,
    /// Operation in progress; exported as the `transaction` attribute.
    pub action: String,
    /// Release version; exported as the `release` attribute.
    pub version: String,
    /// Deployment environment.
    pub environment: Environment,
    /// Host name.
    pub server: String,
    /// When the event happened.
    pub timestamp: SystemTime,
    /// Indexed key/value tags.
    pub tags: BTreeMap<String, String>,
    /// Arbitrary extra data. `detailedTrace`, when present, must be an array
    /// of frames. Object frames may carry `file`, `line` and `function`; list
    /// frames export with every field defaulted.
    pub extra: Map<String, Value>,
    /// Events leading up to this one, oldest first.
    pub breadcrumbs: Vec<Breadcrumb>,
    /// Affected user.
    pub user: Option<User>,
}

impl Log {
    /// A log stamped with the current time, in production, with everything
    /// else empty.
    pub fn new(kind: LogType, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            namespace: String::new(),
            action: String::new(),
            version: String::new(),
            environment: Environment::default(),
            server: String::new(),
            timestamp: SystemTime::now(),
            tags: BTreeMap::new(),
            extra: Map::new(),
            breadcrumbs: Vec::new(),
            user: None,
        }
    }

    /// Sets the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the action.
    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    /// Sets the version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the environment.
    #[must_use]
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Sets the server name.
    #[must_use]
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = server.into();
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Adds an extra value.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Appends a breadcrumb.
    #[must_use]
    pub fn with_breadcrumb(mut self, breadcrumb: Breadcrumb) -> Self {
        self.breadcrumbs.push(breadcrumb);
        self
    }

    /// Sets the user.
    #[must_use]
    pub fn with_user(mut self, user: User) -> Self {
        self.user = Some(user);
        self
    }
}

fn unix_seconds(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

fn stack_frames(detailed_trace: Option<&Value>) -> Result<Vec<Value>, LoggerError> {
    let Some(trace) = detailed_trace else {
        return Ok(Vec::new());
    };
    let Value::Array(frames) = trace else {
        return Err(LoggerError::InvalidTrace("detailedTrace must be an array"));
    };

    frames
        .iter()
        .map(|frame| {
            // A list frame has no named keys, so every field takes its default.
            let empty = Map::new();
            let frame = match frame {
                Value::Object(frame) => frame,
                Value::Array(_) => &empty,
                _ => {
                    return Err(LoggerError::InvalidTrace(
                        "detailedTrace must be an array of objects",
                    ));
                }
            };
            Ok(json!({
                "filename": frame.get("file").cloned().unwrap_or_else(|| json!("")),
                "lineno": frame.get("line").cloned().unwrap_or_else(|| json!(0)),
                "function": frame.get("function").cloned().unwrap_or_else(|| json!("")),
            }))
        })
        .collect()
}

/// Builds the structured body exported for `log`.
///
/// # Errors
///
/// Returns [`LoggerError::InvalidTrace`] when `extra.detailedTrace` is not
/// an array of objects.
pub fn build_payload(log: &Log) -> Result<Value, LoggerError> {
    let stacktrace = stack_frames(log.extra.get("detailedTrace"))?;

    let breadcrumbs: Vec<Value> = log
        .breadcrumbs
        .iter()
        .map(|b| {
            json!({
                "type": "default",
                "level": b.kind.as_str(),
                "category": b.category,
                "message": b.message,
                "timestamp": unix_seconds(b.timestamp),
            })
        })
        .collect();

    let user = log.user.as_ref().map_or(Value::Null, |u| {
        json!({
            "id": u.id,
            "email": u.email,
            "username": u.username,
        })
    });

    Ok(json!({
        "message": log.message,
        "environment": log.environment.as_str(),
        "server_name": log.server,
        "stacktrace": stacktrace,
        "tags": log.tags,
        "extra": log.extra,
        "breadcrumbs": breadcrumbs,
        "user": user,
    }))
}

/// Converts JSON into an OpenTelemetry value. `null`s are dropped.
fn to_any_value(value: &Value) -> Option<AnyValue> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(AnyValue::Boolean(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(AnyValue::Int)
            .or_else(|| n.as_f64().map(AnyValue::Double)),
        Value::String(s) => Some(AnyValue::from(s.clone())),
        Value::Array(items) => Some(AnyValue::ListAny(Box::new(
            items.iter().filter_map(to_any_value).collect(),
        ))),
        Value::Object(map) => Some(AnyValue::Map(Box::new(
            map.iter()
                .filter_map(|(k, v)| to_any_value(v).map(|v| (Key::from(k.clone()), v)))
                .collect::<HashMap<_, _>>(),
        ))),
    }
}

/// Exports [`Log`]s through an OpenTelemetry logger provider.
///
/// Each push is exported immediately by a simple (unbatched) processor.
pub struct OpenTelemetryLogger {
    provider: SdkLoggerProvider,
    transport: Arc<Transport>,
    shutdown: AtomicBool,
}

impl OpenTelemetryLogger {
    /// Adapter name.
    pub const NAME: &'static str = "opentelemetry";

    /// Creates a logger exporting protobuf to `endpoint`. A base URL with no
    /// path gets `/v1/logs` appended.
    ///
    /// # Errors
    ///
    /// Fails outside a tokio runtime or when the exporter cannot be built.
    pub fn new(endpoint: &str, service: ServiceIdentity) -> Result<Self, LoggerError> {
        Self::with_config(TransportConfig::new(endpoint), service)
    }

    /// Creates a logger from a full transport configuration.
    ///
    /// # Errors
    ///
    /// Fails outside a tokio runtime or when the exporter cannot be built.
    pub fn with_config(
        config: TransportConfig,
        service: ServiceIdentity,
    ) -> Result<Self, LoggerError> {
        let timeout = config.timeout;
        let (client, endpoint, protocol) = signal_transport(config, Signal::Logs)?;
        let transport = Arc::clone(client.transport());

        let exporter = LogExporter::builder()
            .with_http()
            .with_http_client(client)
            .with_endpoint(&endpoint)
            .with_protocol(protocol)
            .with_timeout(timeout)
            .build()?;

        let provider = SdkLoggerProvider::builder()
            .with_simple_exporter(exporter)
            .with_resource(service.resource())
            .build();

        tracing::debug!(%endpoint, service = %service.name, "OpenTelemetry logger created");

        Ok(Self {
            provider,
            transport,
            shutdown: AtomicBool::new(false),
        })
    }

    /// Exports `log`. Returns `200` once the record has been handed to the
    /// exporter.
    ///
    /// # Errors
    ///
    /// Fails when `extra.detailedTrace` is malformed or the logger was shut
    /// down.
    pub async fn push(&self, log: &Log) -> Result<u16, LoggerError> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(LoggerError::Shutdown);
        }

        let body = to_any_value(&build_payload(log)?);
        let kind = log.kind;
        let timestamp = log.timestamp;
        let attributes = [
            ("logger", log.namespace.clone()),
            ("release", log.version.clone()),
            ("transaction", log.action.clone()),
        ];
        let provider = self.provider.clone();

        tokio::task::spawn_blocking(move || {
            let logger = provider.logger(SCOPE_NAME);
            let mut record = logger.create_log_record();
            record.set_timestamp(timestamp);
            record.set_observed_timestamp(SystemTime::now());
            record.set_severity_number(kind.severity());
            record.set_severity_text(kind.as_str());
            if let Some(body) = body {
                record.set_body(body);
            }
            for (key, value) in attributes {
                record.add_attribute(key, value);
            }
            logger.emit(record);
        })
        .await
        .map_err(LoggerError::Task)?;

        Ok(200)
    }

    /// Adapter name.
    pub fn name(&self) -> &'static str {
        Self::NAME
    }

    /// Log types this logger accepts.
    pub fn supported_types() -> &'static [LogType] {
        &[
            LogType::Info,
            LogType::Debug,
            LogType::Warning,
            LogType::Error,
            LogType::Verbose,
        ]
    }

    /// Environments this logger accepts.
    pub fn supported_environments() -> &'static [Environment] {
        &[Environment::Staging, Environment::Production]
    }

    /// Breadcrumb levels this logger accepts.
    pub fn supported_breadcrumb_types() -> &'static [LogType] {
        &[
            LogType::Info,
            LogType::Debug,
            LogType::Warning,
            LogType::Error,
        ]
    }

    /// Shuts the provider and the transport down. Later pushes fail with
    /// [`LoggerError::Shutdown`]. Idempotent.
    pub async fn shutdown(&self) -> bool {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return true;
        }

        let provider = self.provider.clone();
        let result = tokio::task::spawn_blocking(move || provider.shutdown()).await;
        self.transport.shutdown(None);

        match result {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Logger provider shutdown failed");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Logger provider shutdown task failed");
                false
            }
        }
    }

    /// The transport logs are exported through.
    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }
}

impl fmt::Debug for OpenTelemetryLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenTelemetryLogger")
            .field("transport", &self.transport)
            .field("shutdown", &self.shutdown.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
