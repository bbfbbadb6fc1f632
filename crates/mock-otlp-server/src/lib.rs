//! In-process mock OTLP/HTTP collector for tests.
//!
//! [`MockOtlpServer`] binds an ephemeral port on `127.0.0.1`, accepts POSTs on
//! any path, and records each request exactly as it arrived: payload bytes,
//! lower-cased headers, the client's socket address and the arrival time. The
//! reply status, body and delay can be changed while the server runs.
//!
//! ```no_run
//! use mock_otlp_server::MockOtlpServer;
//!
//! # async fn example() -> std::io::Result<()> {
//! let server = MockOtlpServer::start().await?;
//! server.respond_with(500, "boom");
//!
//! // ... point an exporter at server.endpoint() ...
//!
//! assert_eq!(server.request_count(), 0);
//! server.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use axum::{
    Router,
    body::Bytes,
    extract::{ConnectInfo, DefaultBodyLimit, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const BODY_LIMIT: usize = 64 * 1024 * 1024;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// One request as received by the mock collector.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    /// HTTP method.
    pub method: String,
    /// Request path, with `?query` when present.
    pub path: String,
    /// Headers, keyed by lower-cased name.
    pub headers: HashMap<String, String>,
    /// Raw request body.
    pub payload: Bytes,
    /// Client socket address; stable across requests on one keep-alive
    /// connection.
    pub peer: SocketAddr,
    /// When the request finished arriving.
    pub received_at: Instant,
}

impl CapturedRequest {
    /// Looks up a header by name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone)]
struct Reply {
    status: StatusCode,
    body: Bytes,
    delay: Duration,
}

impl Default for Reply {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            body: Bytes::new(),
            delay: Duration::ZERO,
        }
    }
}

#[derive(Default)]
struct ServerState {
    requests: Mutex<Vec<CapturedRequest>>,
    reply: Mutex<Reply>,
}

/// A running mock collector. Stops when [`shutdown`](Self::shutdown) is
/// awaited or the value is dropped.
pub struct MockOtlpServer {
    state: Arc<ServerState>,
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MockOtlpServer {
    /// Binds `127.0.0.1:0` and starts serving. Replies `200` with an empty
    /// body until told otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let local_addr = listener.local_addr()?;

        let state = Arc::new(ServerState::default());
        let app = Router::new()
            .fallback(handle_request)
            .layer(DefaultBodyLimit::max(BODY_LIMIT))
            .with_state(Arc::clone(&state));

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let task = tokio::spawn(async move {
            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Mock OTLP server failed");
            }
        });

        tracing::debug!(%local_addr, "Mock OTLP server started");

        Ok(Self {
            state,
            local_addr,
            cancel,
            task: Some(task),
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Base URL without a path, e.g. `http://127.0.0.1:41234`.
    pub fn url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// The metrics endpoint, `<url>/v1/metrics`.
    pub fn endpoint(&self) -> String {
        self.endpoint_for("/v1/metrics")
    }

    /// `<url>` joined with `path`.
    pub fn endpoint_for(&self, path: &str) -> String {
        format!("{}{}", self.url(), path)
    }

    /// Sets the status and body of every following reply.
    pub fn respond_with(&self, status: u16, body: impl Into<Bytes>) {
        let mut reply = self.state.reply.lock();
        reply.status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        reply.body = body.into();
    }

    /// Delays every following reply by `delay`.
    pub fn with_delay(&self, delay: Duration) {
        self.state.reply.lock().delay = delay;
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.state.requests.lock().clone()
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.state.requests.lock().len()
    }

    /// The most recent request.
    pub fn last_request(&self) -> Option<CapturedRequest> {
        self.state.requests.lock().last().cloned()
    }

    /// Forgets captured requests and restores the default reply.
    pub fn reset(&self) {
        self.state.requests.lock().clear();
        *self.state.reply.lock() = Reply::default();
    }

    /// Stops accepting connections and waits (briefly) for the server task
    /// to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(mut task) = self.task.take()
            && tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err()
        {
            task.abort();
        }
        tracing::debug!(local_addr = %self.local_addr, "Mock OTLP server stopped");
    }
}

impl Drop for MockOtlpServer {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn handle_request(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    payload: Bytes,
) -> Response {
    let headers = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect();
    let path = uri
        .path_and_query()
        .map_or_else(|| uri.path().to_string(), |pq| pq.as_str().to_string());

    tracing::trace!(%peer, %path, bytes = payload.len(), "Mock OTLP server received request");

    state.requests.lock().push(CapturedRequest {
        method: method.to_string(),
        path,
        headers,
        payload,
        peer,
        received_at: Instant::now(),
    });

    let reply = state.reply.lock().clone();
    if !reply.delay.is_zero() {
        tokio::time::sleep(reply.delay).await;
    }

    (reply.status, reply.body).into_response()
}
