//! Error types for the export transport.

use thiserror::Error;

/// A specialised Result type for transport sends.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Why a single [`Transport::send`](crate::Transport::send) failed.
///
/// Every variant is terminal for the call: the transport never retries.
/// Retry and backoff belong to the exporter calling it.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum TransportError {
    /// Dial, TLS handshake, reset, or a phase timeout.
    #[error("OTLP connection failed: {message}{}", .code.map(|c| format!(" (code: {c})")).unwrap_or_default())]
    Connection {
        /// OS error number, when the failure came from the OS.
        code: Option<i32>,
        /// Human-readable cause.
        message: String,
    },

    /// The collector answered with a 5xx status.
    #[error("OTLP export failed with status {status}: {body}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body, lossily decoded.
        body: String,
    },

    /// The collector answered with a non-2xx, non-5xx status.
    #[error("OTLP export failed with status {status}: {body}")]
    Client {
        /// HTTP status code.
        status: u16,
        /// Response body, lossily decoded.
        body: String,
    },

    /// The transport was shut down before the call.
    #[error("transport has been shut down")]
    Shutdown,

    /// The caller's cancellation token fired.
    #[error("send cancelled")]
    Cancelled,

    /// Unexpected failure inside the send path.
    #[error("transport failure")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl TransportError {
    pub(crate) fn connection(code: Option<i32>, message: impl Into<String>) -> Self {
        Self::Connection {
            code,
            message: message.into(),
        }
    }

    pub(crate) fn from_io(error: &std::io::Error) -> Self {
        Self::connection(error.raw_os_error(), error.to_string())
    }

    pub(crate) fn internal<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        Self::Internal(Box::new(error))
    }

    /// Builds the error for a non-2xx status, picking `Server` for 5xx.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        if (500..600).contains(&status) {
            Self::Server { status, body }
        } else {
            Self::Client { status, body }
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Server { status, .. } | Self::Client { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the connection used for the failed exchange must be closed
    /// rather than returned to the pool.
    pub fn forces_close(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Server { .. } | Self::Cancelled | Self::Internal(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_status_picks_kind() {
        assert!(matches!(
            TransportError::status(500, "boom"),
            TransportError::Server { status: 500, .. }
        ));
        assert!(matches!(
            TransportError::status(503, ""),
            TransportError::Server { status: 503, .. }
        ));
        assert!(matches!(
            TransportError::status(404, "nope"),
            TransportError::Client { status: 404, .. }
        ));
        assert!(matches!(
            TransportError::status(302, ""),
            TransportError::Client { status: 302, .. }
        ));
    }

    #[test]
    fn test_display_includes_status_and_body() {
        let err = TransportError::status(500, "boom");
        let msg = err.to_string();
        assert!(msg.contains("500"));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn test_connection_display() {
        let err = TransportError::connection(Some(111), "Connection refused");
        assert_eq!(
            err.to_string(),
            "OTLP connection failed: Connection refused (code: 111)"
        );

        let err = TransportError::connection(None, "read timed out");
        assert_eq!(err.to_string(), "OTLP connection failed: read timed out");
    }

    #[test]
    fn test_forces_close() {
        assert!(TransportError::connection(None, "x").forces_close());
        assert!(TransportError::status(500, "").forces_close());
        assert!(TransportError::Cancelled.forces_close());
        assert!(!TransportError::status(400, "").forces_close());
        assert!(!TransportError::Shutdown.forces_close());
    }

    #[test]
    fn test_internal_chains_source() {
        let err = TransportError::internal(std::io::Error::other("bad request"));
        assert!(err.source().is_some());
        assert!(err.forces_close());
    }

    #[test]
    fn test_status_code() {
        assert_eq!(TransportError::status(429, "").status_code(), Some(429));
        assert_eq!(TransportError::Shutdown.status_code(), None);
    }
}
