//! Error types for adapters and loggers.

use opentelemetry_otlp::ExporterBuildError;
use thiserror::Error;
use tokio::runtime::TryCurrentError;

/// Errors from building a metrics adapter.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The OTLP metric exporter could not be built.
    #[error("failed to build OTLP metric exporter")]
    Exporter(#[from] ExporterBuildError),

    /// The adapter was built outside a tokio runtime.
    #[error("no tokio runtime available for the export transport")]
    Runtime(#[from] TryCurrentError),
}

/// Errors from building a logger or pushing a log.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum LoggerError {
    /// The OTLP log exporter could not be built.
    #[error("failed to build OTLP log exporter")]
    Exporter(#[from] ExporterBuildError),

    /// The logger was built outside a tokio runtime.
    #[error("no tokio runtime available for the export transport")]
    Runtime(#[from] TryCurrentError),

    /// `extra.detailedTrace` has the wrong shape.
    #[error("invalid detailedTrace: {0}")]
    InvalidTrace(&'static str),

    /// The logger was shut down.
    #[error("logger has been shut down")]
    Shutdown,

    /// The blocking emit task panicked or was cancelled.
    #[error("log emit task failed")]
    Task(#[source] tokio::task::JoinError),
}

/// Errors from building attribute sets.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttributeError {
    /// Attribute keys must be non-empty.
    #[error("attribute key must not be empty")]
    EmptyKey,
}
