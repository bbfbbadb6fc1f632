//! OTLP export workspace.
//!
//! This package only hosts the workspace-level integration tests. The
//! functionality lives in the member crates:
//!
//! - `otlp-transport`: pooled keep-alive HTTP transport and the `otlp-send` CLI
//! - `telemetry-adapter`: metric instruments and log export over the transport
//! - `mock-otlp-server`: in-process collector used by the tests
