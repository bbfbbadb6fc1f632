//! The pooled export transport.

use crate::config::TransportConfig;
use crate::connection::{Connection, ConnectionSettings, ExchangeError};
use crate::endpoint::EndpointDescriptor;
use crate::error::{Result, TransportError};
use crate::pool::{ConnectionPool, POOL_WAIT};
use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use http::{HeaderMap, HeaderName, HeaderValue};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Sends already-encoded OTLP payloads to one collector endpoint over pooled
/// keep-alive HTTP/1.1 connections.
///
/// A `Transport` is shared between concurrent callers through an [`Arc`].
/// Each [`send`](Self::send) is a single POST: failures are reported, never
/// retried.
///
/// # Example
///
/// ```no_run
/// use otlp_transport::{Transport, TransportConfig};
///
/// # async fn example() -> otlp_transport::Result<()> {
/// let transport = Transport::new(TransportConfig::new("http://localhost:4318/v1/metrics"));
/// let body = transport.send(vec![0u8; 16], None).await?;
/// println!("collector replied with {} bytes", body.len());
/// transport.shutdown(None);
/// # Ok(())
/// # }
/// ```
pub struct Transport {
    descriptor: EndpointDescriptor,
    config: TransportConfig,
    settings: Arc<ConnectionSettings>,
    pool: ConnectionPool<Connection>,
    base_headers: HeaderMap,
    shutdown: AtomicBool,
}

impl Transport {
    /// Creates a transport. Never fails: a malformed endpoint resolves to
    /// defaults and only surfaces as a connection error on send.
    pub fn new(config: TransportConfig) -> Self {
        let descriptor = EndpointDescriptor::parse(&config.endpoint);
        let settings = Arc::new(ConnectionSettings::new(
            descriptor.clone(),
            config.phase_timeout(),
            config.socket_buffer_bytes,
        ));
        let base_headers = base_headers(&descriptor, &config);
        let pool = ConnectionPool::new(config.pool_capacity, POOL_WAIT);

        tracing::debug!(
            endpoint = %descriptor,
            pool_capacity = pool.capacity(),
            timeout_ms = config.timeout.as_millis() as u64,
            "Transport created"
        );

        Self {
            descriptor,
            config,
            settings,
            pool,
            base_headers,
            shutdown: AtomicBool::new(false),
        }
    }

    /// POSTs `payload` and returns the response body of a 2xx reply.
    ///
    /// # Errors
    ///
    /// - [`TransportError::Shutdown`] after [`shutdown`](Self::shutdown),
    ///   without touching the network.
    /// - [`TransportError::Cancelled`] when `cancellation` fires first.
    /// - [`TransportError::Connection`] on dial, reset or timeout.
    /// - [`TransportError::Server`] / [`TransportError::Client`] on a
    ///   non-2xx reply.
    pub async fn send(
        &self,
        payload: impl Into<Bytes>,
        cancellation: Option<&CancellationToken>,
    ) -> Result<Bytes> {
        if self.is_shutdown() {
            return Err(TransportError::Shutdown);
        }
        if cancellation.is_some_and(CancellationToken::is_cancelled) {
            return Err(TransportError::Cancelled);
        }

        let payload = payload.into();
        let payload_len = payload.len();
        let mut connection = self
            .pool
            .acquire(|| Connection::new(Arc::clone(&self.settings)))
            .await;

        let exchange = self.exchange(&mut connection, payload);
        let result = match cancellation {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => Err(TransportError::Cancelled),
                result = exchange => result,
            },
            None => exchange.await,
        };

        let force_close = result.as_ref().err().is_some_and(TransportError::forces_close);
        self.pool
            .release(connection, force_close || self.is_shutdown())
            .await;

        match &result {
            Ok(body) => tracing::trace!(
                sent = payload_len,
                received = body.len(),
                "Payload exported"
            ),
            Err(e) => tracing::warn!(
                status = e.status_code(),
                force_close,
                error = %e,
                "OTLP send failed"
            ),
        }

        result
    }

    async fn exchange(&self, connection: &mut Connection, payload: Bytes) -> Result<Bytes> {
        let mut headers = self.base_headers.clone();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(payload.len()));

        let overall = self.config.timeout;
        let (status, body) = timeout(
            overall,
            connection.post(&self.descriptor.path_with_query, headers, payload),
        )
        .await
        .map_err(|_| {
            TransportError::connection(None, format!("request timed out after {overall:?}"))
        })?
        .map_err(classify)?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(TransportError::status(
                status.as_u16(),
                String::from_utf8_lossy(&body),
            ))
        }
    }

    /// Stops the transport. Idle connections are closed, later sends fail
    /// with [`TransportError::Shutdown`], and connections still in flight are
    /// closed when they come back. Idempotent; always returns `true`.
    pub fn shutdown(&self, _cancellation: Option<&CancellationToken>) -> bool {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            let closed = self.pool.drain_and_close();
            tracing::debug!(closed, endpoint = %self.descriptor, "Transport shut down");
        }
        true
    }

    /// Nothing is buffered, so there is nothing to flush. Always `true`.
    pub fn force_flush(&self, _cancellation: Option<&CancellationToken>) -> bool {
        true
    }

    /// The configured payload content type.
    pub fn content_type(&self) -> &str {
        &self.config.content_type
    }

    /// The resolved endpoint.
    pub fn endpoint(&self) -> &EndpointDescriptor {
        &self.descriptor
    }

    /// The configuration the transport was built from.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Number of keep-alive connections currently parked in the pool.
    pub fn idle_connections(&self) -> usize {
        self.pool.idle_count()
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("endpoint", &self.descriptor.to_string())
            .field("content_type", &self.config.content_type)
            .field("idle_connections", &self.pool.idle_count())
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

fn base_headers(descriptor: &EndpointDescriptor, config: &TransportConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();

    match HeaderValue::from_str(&config.content_type) {
        Ok(value) => {
            headers.insert(CONTENT_TYPE, value);
        }
        Err(_) => tracing::warn!(
            content_type = %config.content_type,
            "Invalid content type, sending without one"
        ),
    }
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    if let Ok(host) = HeaderValue::from_str(&descriptor.authority()) {
        headers.insert(HOST, host);
    }

    for (key, value) in &config.headers {
        let name = HeaderName::from_bytes(key.trim().as_bytes());
        let value = HeaderValue::from_str(value.trim());
        match (name, value) {
            (Ok(name), Ok(value)) if name != CONTENT_LENGTH => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(header = %key, "Skipping invalid extra header"),
        }
    }

    headers
}

fn classify(error: ExchangeError) -> TransportError {
    match error {
        ExchangeError::Dial(e) => TransportError::from_io(&e),
        ExchangeError::Timeout(phase, limit) => {
            TransportError::connection(None, format!("{phase} timed out after {limit:?}"))
        }
        ExchangeError::Http(e) => {
            let code = io_source(&e).and_then(io::Error::raw_os_error);
            TransportError::connection(code, e.to_string())
        }
        ExchangeError::Request(e) => TransportError::internal(e),
    }
}

fn io_source<'a>(error: &'a (dyn std::error::Error + 'static)) -> Option<&'a io::Error> {
    let mut source = error.source();
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<io::Error>() {
            return Some(io);
        }
        source = err.source();
    }
    None
}
