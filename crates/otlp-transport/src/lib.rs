//! Pooled keep-alive HTTP transport for exporting OTLP payloads.
//!
//! A [`Transport`] takes payloads that are already encoded (protobuf or
//! JSON) and POSTs each one to a single collector endpoint, reusing a bounded
//! pool of keep-alive HTTP/1.1 connections. It never inspects the payload and
//! never retries: every failure is classified into a [`TransportError`] and
//! handed back to the caller.
//!
//! # Quick start
//!
//! ```no_run
//! use otlp_transport::{Transport, TransportConfig};
//!
//! # async fn example() -> otlp_transport::Result<()> {
//! let config = TransportConfig::builder("http://localhost:4318/v1/metrics")
//!     .header("Authorization", "Bearer token")
//!     .pool_capacity(4)
//!     .build();
//! let transport = Transport::new(config);
//!
//! transport.send(b"encoded-request".to_vec(), None).await?;
//! transport.shutdown(None);
//! # Ok(())
//! # }
//! ```
//!
//! # OpenTelemetry SDK exporters
//!
//! [`TransportHttpClient`] implements `opentelemetry_http::HttpClient`, so the
//! OTLP exporters from `opentelemetry-otlp` can send through a shared
//! transport.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
mod connection;
pub mod endpoint;
pub mod error;
pub mod http_client;
mod pool;
pub mod transport;

pub use config::{
    CONTENT_TYPE_JSON, CONTENT_TYPE_PROTOBUF, TransportConfig, TransportConfigBuilder,
};
pub use endpoint::{EndpointDescriptor, Scheme, Signal, signal_endpoint};
pub use error::{Result, TransportError};
pub use http_client::TransportHttpClient;
pub use transport::Transport;

pub use tokio_util::sync::CancellationToken;
