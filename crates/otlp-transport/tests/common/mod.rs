//! Shared helpers for transport integration tests.

#![allow(dead_code)]

use mock_otlp_server::MockOtlpServer;
use otlp_transport::{Transport, TransportConfig, TransportConfigBuilder};
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Installs a test-writer subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("otlp_transport=debug")
        .with_test_writer()
        .try_init();
}

/// A config builder pointed at the server's metrics endpoint.
pub fn config_for(server: &MockOtlpServer) -> TransportConfigBuilder {
    TransportConfig::builder(server.endpoint())
}

/// A shared transport with default settings, pointed at `server`.
pub fn transport_for(server: &MockOtlpServer) -> Arc<Transport> {
    Arc::new(Transport::new(config_for(server).build()))
}

/// An address nothing is listening on.
pub fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    addr
}

/// A listener that completes TCP handshakes in the kernel backlog but never
/// reads or answers. Keep the returned value alive for the duration of the
/// test.
pub fn silent_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    (listener, addr)
}

/// A bare HTTP/1.1 collector that answers each request with `200 ok` and
/// then closes its side of the socket without announcing it. Returns the
/// address and the number of requests answered so far.
pub async fn closing_collector() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let answered = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&answered);
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let counter = Arc::clone(&counter);
            tokio::spawn(async move {
                if read_request(&mut stream).await.is_ok() {
                    let _ = stream
                        .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nok")
                        .await;
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                let _ = stream.shutdown().await;
            });
        }
    });

    (addr, answered)
}

async fn read_request(stream: &mut tokio::net::TcpStream) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);

        let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
        let length: usize = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
        if buf.len() >= end + 4 + length {
            return Ok(());
        }
    }
}
