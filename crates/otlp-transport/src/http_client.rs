//! [`opentelemetry_http::HttpClient`] backed by a pooled [`Transport`].
//!
//! SDK exporters drive their HTTP client from their own background threads,
//! outside any tokio runtime. The bridge captures a runtime handle at
//! construction and runs each send on it.

use crate::error::TransportError;
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use opentelemetry_http::{HttpClient, HttpError};
use std::fmt;
use std::sync::Arc;
use tokio::runtime::{Handle, TryCurrentError};

/// Hands SDK-encoded request bodies to a shared [`Transport`].
///
/// The request's URI and headers are ignored: the transport always posts to
/// its own endpoint with its own headers. A successful send becomes a `200`
/// response carrying the collector's body.
#[derive(Clone)]
pub struct TransportHttpClient {
    transport: Arc<Transport>,
    runtime: Handle,
}

impl TransportHttpClient {
    /// Creates a bridge that runs sends on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error when called outside a tokio runtime.
    pub fn new(transport: Arc<Transport>) -> Result<Self, TryCurrentError> {
        Ok(Self::with_runtime(transport, Handle::try_current()?))
    }

    /// Creates a bridge that runs sends on `runtime`.
    pub fn with_runtime(transport: Arc<Transport>, runtime: Handle) -> Self {
        Self { transport, runtime }
    }

    /// The transport requests are sent through.
    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }
}

impl fmt::Debug for TransportHttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHttpClient")
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl HttpClient for TransportHttpClient {
    async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
        let transport = Arc::clone(&self.transport);
        let payload = request.into_body();

        let body = self
            .runtime
            .spawn(async move { transport.send(payload, None).await })
            .await
            .map_err(TransportError::internal)??;

        let response = Response::builder()
            .status(StatusCode::OK)
            .body(body)
            .map_err(TransportError::internal)?;
        Ok(response)
    }
}
