//! Metric instruments and log export for services that report to an OTLP
//! collector.
//!
//! An [`Adapter`] hands out [`Counter`], [`UpDownCounter`], [`Histogram`] and
//! [`Gauge`] instruments. The backend is picked once, when the adapter is
//! built:
//!
//! - [`OpenTelemetryAdapter`] feeds an OpenTelemetry SDK meter provider whose
//!   exporter sends through a pooled [`otlp_transport::Transport`].
//! - [`TestAdapter`] keeps every recorded amount in memory for assertions.
//! - [`Adapter::None`] discards everything.
//!
//! [`OpenTelemetryLogger`] exports structured [`Log`] records the same way.
//!
//! # Example
//!
//! ```no_run
//! use telemetry_adapter::{Adapter, Attributes, InstrumentOptions, OpenTelemetryAdapter, ServiceIdentity};
//! use telemetry_adapter::instrument::Add;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let adapter = Adapter::from(OpenTelemetryAdapter::new(
//!     "http://localhost:4318",
//!     ServiceIdentity::new("platform", "api", "api-1"),
//! )?);
//!
//! let requests = adapter.create_counter(
//!     "http.server.requests",
//!     &InstrumentOptions::new().with_unit("{request}"),
//! );
//! requests.add(1.into(), &Attributes::new().with("http.method", "GET")?);
//!
//! adapter.collect().await;
//! adapter.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
pub mod attribute;
pub mod error;
pub mod instrument;
pub mod logger;
pub mod otel;

pub use adapter::{Adapter, TestAdapter};
pub use attribute::{AttributeArray, AttributeValue, Attributes};
pub use error::{AdapterError, AttributeError, LoggerError};
pub use instrument::{
    Add, Advisory, Counter, Gauge, Histogram, InstrumentOptions, Number, Record, UpDownCounter,
};
pub use logger::{Breadcrumb, Environment, Log, LogType, OpenTelemetryLogger, User};
pub use otel::{OpenTelemetryAdapter, ServiceIdentity};
