//! Keep-alive HTTP/1.1 connections to the collector.
//!
//! A [`Connection`] is created undialed; the TCP (and TLS) handshake happens on
//! its first exchange. Once established it keeps the hyper send handle and the
//! task driving the connection, so it can be parked in the pool and reused for
//! later requests.

use crate::endpoint::EndpointDescriptor;
use crate::pool::Poolable;
use bytes::Bytes;
use http::header::CONNECTION;
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use socket2::{SockRef, TcpKeepalive};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpSocket, TcpStream, lookup_host};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore, crypto};

const KEEPALIVE_IDLE: Duration = Duration::from_secs(60);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);
#[cfg(any(target_os = "linux", target_os = "macos"))]
const KEEPALIVE_RETRIES: u32 = 3;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// How connections of one transport secure their stream.
enum Tls {
    Plain,
    Ready(TlsConnector),
    /// The client config could not be built; every dial fails with this.
    Unavailable(String),
}

/// Dial and socket settings shared by every connection of one transport.
pub(crate) struct ConnectionSettings {
    pub(crate) endpoint: EndpointDescriptor,
    pub(crate) connect_timeout: Duration,
    pub(crate) write_timeout: Duration,
    pub(crate) read_timeout: Duration,
    pub(crate) socket_buffer_bytes: usize,
    tls: Tls,
}

impl ConnectionSettings {
    pub(crate) fn new(
        endpoint: EndpointDescriptor,
        phase_timeout: Duration,
        socket_buffer_bytes: usize,
    ) -> Self {
        let tls = if endpoint.is_tls() {
            match tls_connector() {
                Ok(connector) => Tls::Ready(connector),
                Err(e) => {
                    tracing::warn!(error = %e, "TLS client setup failed");
                    Tls::Unavailable(e.to_string())
                }
            }
        } else {
            Tls::Plain
        };

        Self {
            endpoint,
            connect_timeout: phase_timeout,
            write_timeout: phase_timeout,
            read_timeout: phase_timeout,
            socket_buffer_bytes,
            tls,
        }
    }
}

fn tls_connector() -> Result<TlsConnector, tokio_rustls::rustls::Error> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config =
        ClientConfig::builder_with_provider(Arc::new(crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots)
            .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Whether a `Connection` header asks for the connection to be closed.
fn wants_close(headers: &HeaderMap) -> bool {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("close"))
}

/// Failure of one request/response exchange, before classification.
#[derive(Debug)]
pub(crate) enum ExchangeError {
    /// DNS, TCP or TLS failure while dialing.
    Dial(io::Error),
    /// A phase ran past its timeout.
    Timeout(&'static str, Duration),
    /// The HTTP exchange failed on an established connection.
    Http(hyper::Error),
    /// The request could not be built.
    Request(http::Error),
}

/// Outcome of one attempt on an established connection.
enum Attempt {
    Done(Result<(StatusCode, Bytes, HeaderMap), ExchangeError>),
    /// The connection died before any byte of the request was written.
    Unsent(Request<Full<Bytes>>, hyper::Error),
}

struct Established {
    sender: SendRequest<Full<Bytes>>,
    driver: JoinHandle<()>,
    peer: SocketAddr,
}

/// One reusable client bound to the transport's endpoint.
pub(crate) struct Connection {
    id: u64,
    settings: Arc<ConnectionSettings>,
    established: Option<Established>,
}

impl Connection {
    /// Creates an undialed connection.
    pub(crate) fn new(settings: Arc<ConnectionSettings>) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            settings,
            established: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Whether the connection is dialed and its socket still usable.
    pub(crate) fn is_open(&self) -> bool {
        self.established
            .as_ref()
            .is_some_and(|e| !e.sender.is_closed() && !e.driver.is_finished())
    }

    /// POSTs `payload` to `path` and returns the status and full response body.
    ///
    /// A reused connection that turns out to be closed before the request
    /// was written is redialed once. When either side sends
    /// `Connection: close` the connection is discarded after the exchange.
    pub(crate) async fn post(
        &mut self,
        path: &str,
        headers: HeaderMap,
        payload: Bytes,
    ) -> Result<(StatusCode, Bytes), ExchangeError> {
        let close_requested = wants_close(&headers);
        let mut request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .body(Full::new(payload))
            .map_err(ExchangeError::Request)?;
        *request.headers_mut() = headers;

        let reused = self.is_open();
        if !reused {
            self.connect().await?;
        }

        let outcome = match self.attempt(request).await {
            Attempt::Unsent(request, e) if reused => {
                tracing::debug!(
                    connection = self.id,
                    error = %e,
                    "Pooled connection closed by peer, redialing"
                );
                self.discard();
                self.connect().await?;
                match self.attempt(request).await {
                    Attempt::Done(result) => result,
                    Attempt::Unsent(_, e) => Err(ExchangeError::Http(e)),
                }
            }
            Attempt::Unsent(_, e) => Err(ExchangeError::Http(e)),
            Attempt::Done(result) => result,
        };

        match outcome {
            Ok((status, body, response_headers)) => {
                if close_requested || wants_close(&response_headers) {
                    tracing::debug!(connection = self.id, "Connection: close, discarding");
                    self.discard();
                }
                Ok((status, body))
            }
            Err(e) => {
                self.discard();
                Err(e)
            }
        }
    }

    async fn connect(&mut self) -> Result<(), ExchangeError> {
        let connect_timeout = self.settings.connect_timeout;
        self.discard();
        let established = timeout(connect_timeout, self.dial())
            .await
            .map_err(|_| ExchangeError::Timeout("connect", connect_timeout))?
            .map_err(ExchangeError::Dial)?;
        tracing::debug!(
            connection = self.id,
            peer = %established.peer,
            "Connection established"
        );
        self.established = Some(established);
        Ok(())
    }

    async fn attempt(&mut self, request: Request<Full<Bytes>>) -> Attempt {
        let settings = Arc::clone(&self.settings);
        let Some(established) = self.established.as_mut() else {
            return Attempt::Done(Err(ExchangeError::Dial(io::Error::from(
                io::ErrorKind::NotConnected,
            ))));
        };

        match timeout(settings.write_timeout, established.sender.ready()).await {
            Err(_) => {
                return Attempt::Done(Err(ExchangeError::Timeout(
                    "write",
                    settings.write_timeout,
                )));
            }
            Ok(Err(e)) => return Attempt::Unsent(request, e),
            Ok(Ok(())) => {}
        }

        let exchange_timeout = settings.write_timeout + settings.read_timeout;
        let response = match timeout(
            exchange_timeout,
            established.sender.try_send_request(request),
        )
        .await
        {
            Err(_) => {
                return Attempt::Done(Err(ExchangeError::Timeout("read", settings.read_timeout)));
            }
            Ok(Err(mut e)) => {
                return match e.take_message() {
                    Some(request) => Attempt::Unsent(request, e.into_error()),
                    None => Attempt::Done(Err(ExchangeError::Http(e.into_error()))),
                };
            }
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        let response_headers = response.headers().clone();
        let body = match timeout(settings.read_timeout, response.into_body().collect()).await {
            Err(_) => Err(ExchangeError::Timeout("read", settings.read_timeout)),
            Ok(Err(e)) => Err(ExchangeError::Http(e)),
            Ok(Ok(collected)) => Ok(collected.to_bytes()),
        };

        Attempt::Done(body.map(|body| (status, body, response_headers)))
    }

    /// Drops the established stream, if any, and stops its driver.
    fn discard(&mut self) {
        if let Some(established) = self.established.take() {
            established.driver.abort();
        }
    }

    async fn dial(&self) -> io::Result<Established> {
        let endpoint = &self.settings.endpoint;
        let mut last_error = None;

        for addr in lookup_host((endpoint.host.as_str(), endpoint.port)).await? {
            match self.connect_addr(addr).await {
                Ok(stream) => return self.handshake(stream, addr).await,
                Err(e) => {
                    tracing::debug!(connection = self.id, %addr, error = %e, "Dial attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses found for {}", endpoint.host),
            )
        }))
    }

    async fn connect_addr(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };

        let buffer = u32::try_from(self.settings.socket_buffer_bytes).unwrap_or(u32::MAX);
        socket.set_send_buffer_size(buffer)?;
        socket.set_recv_buffer_size(buffer)?;
        socket.set_keepalive(true)?;

        let stream = socket.connect(addr).await?;
        stream.set_nodelay(true)?;
        SockRef::from(&stream).set_tcp_keepalive(&keepalive())?;
        Ok(stream)
    }

    async fn handshake(&self, stream: TcpStream, peer: SocketAddr) -> io::Result<Established> {
        let tls = match &self.settings.tls {
            Tls::Plain => return self.start_http1(stream, peer).await,
            Tls::Ready(tls) => tls,
            Tls::Unavailable(reason) => {
                return Err(io::Error::other(format!("TLS unavailable: {reason}")));
            }
        };

        let server_name = ServerName::try_from(self.settings.endpoint.host.clone())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let stream = tls.connect(server_name, stream).await?;
        self.start_http1(stream, peer).await
    }

    async fn start_http1<T>(&self, io: T, peer: SocketAddr) -> io::Result<Established>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sender, conn) = http1::Builder::new()
            .handshake(TokioIo::new(io))
            .await
            .map_err(io::Error::other)?;

        let id = self.id;
        let driver = tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(connection = id, error = %e, "Connection driver ended");
            }
        });

        Ok(Established {
            sender,
            driver,
            peer,
        })
    }
}

impl Poolable for Connection {
    fn is_open(&self) -> bool {
        Connection::is_open(self)
    }

    fn close(self) {
        tracing::debug!(connection = self.id, "Closing connection");
        drop(self);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.discard();
    }
}

fn keepalive() -> TcpKeepalive {
    let keepalive = TcpKeepalive::new()
        .with_time(KEEPALIVE_IDLE)
        .with_interval(KEEPALIVE_INTERVAL);
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    let keepalive = keepalive.with_retries(KEEPALIVE_RETRIES);
    keepalive
}
