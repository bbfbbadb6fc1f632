//! End-to-end: instruments and logs flow through the adapter, the OpenTelemetry
//! SDK and the pooled transport into one mock collector.

use mock_otlp_server::MockOtlpServer;
use otlp_transport::{CONTENT_TYPE_JSON, Transport, TransportConfig};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use telemetry_adapter::{
    Add, Adapter, Attributes, InstrumentOptions, Log, LogType, OpenTelemetryAdapter,
    OpenTelemetryLogger, Record, ServiceIdentity,
};
use tokio::time::timeout;

const STEP_TIMEOUT: Duration = Duration::from_secs(10);

fn service() -> ServiceIdentity {
    ServiceIdentity::new("shop", "inventory", "inventory-7")
}

fn config(server: &MockOtlpServer) -> TransportConfig {
    TransportConfig::builder(server.url())
        .content_type(CONTENT_TYPE_JSON)
        .header("Authorization", "Bearer harness")
        .build()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_metrics_and_logs_share_one_collector() {
    let server = MockOtlpServer::start().await.unwrap();

    let adapter = Adapter::from(
        OpenTelemetryAdapter::with_config(config(&server), service(), Duration::from_secs(3600))
            .unwrap(),
    );
    let logger = OpenTelemetryLogger::with_config(config(&server), service()).unwrap();

    let stock = adapter.create_gauge("inventory.stock", &InstrumentOptions::new());
    stock.record(120.into(), &Attributes::new().with("sku", "A-1").unwrap());
    let restocks = adapter.create_counter("inventory.restocks", &InstrumentOptions::new());
    restocks.add(1.into(), &Attributes::new());

    assert!(timeout(STEP_TIMEOUT, adapter.collect()).await.unwrap());
    let pushed = timeout(
        STEP_TIMEOUT,
        logger.push(&Log::new(LogType::Info, "Restock scheduled").with_namespace("inventory")),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(pushed, 200);

    let requests = server.requests();
    let metrics = requests
        .iter()
        .find(|r| r.path == "/v1/metrics")
        .expect("metrics request");
    let logs = requests
        .iter()
        .find(|r| r.path == "/v1/logs")
        .expect("logs request");

    for request in [metrics, logs] {
        assert_eq!(request.header("authorization"), Some("Bearer harness"));
        assert_eq!(request.header("content-type"), Some(CONTENT_TYPE_JSON));
        assert_eq!(
            request.header("content-length"),
            Some(request.payload.len().to_string().as_str())
        );
    }

    let metrics: Value = serde_json::from_slice(&metrics.payload).unwrap();
    let text = metrics.to_string();
    assert!(text.contains("inventory.stock"), "{text}");
    assert!(text.contains("inventory.restocks"), "{text}");
    assert!(text.contains("inventory-7"), "{text}");

    let logs = String::from_utf8_lossy(&logs.payload);
    assert!(logs.contains("Restock scheduled"), "{logs}");

    assert!(adapter.shutdown().await);
    assert!(logger.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_repeated_collections_reuse_the_connection() {
    let server = MockOtlpServer::start().await.unwrap();
    let adapter =
        OpenTelemetryAdapter::with_config(config(&server), service(), Duration::from_secs(3600))
            .unwrap();
    let counter = adapter.create_counter("inventory.lookups", &InstrumentOptions::new());

    for _ in 0..3 {
        counter.add(1.into(), &Attributes::new());
        assert!(timeout(STEP_TIMEOUT, adapter.collect()).await.unwrap());
    }

    let requests = server.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests.iter().all(|r| r.peer == requests[0].peer));
    assert_eq!(adapter.transport().idle_connections(), 1);

    assert!(adapter.shutdown().await);
    assert_eq!(adapter.transport().idle_connections(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_collector_outage_then_recovery() {
    let server = MockOtlpServer::start().await.unwrap();
    let adapter =
        OpenTelemetryAdapter::with_config(config(&server), service(), Duration::from_secs(3600))
            .unwrap();
    let counter = adapter.create_counter("inventory.errors", &InstrumentOptions::new());

    server.respond_with(503, "unavailable");
    counter.add(1.into(), &Attributes::new());
    assert!(!timeout(STEP_TIMEOUT, adapter.collect()).await.unwrap());
    assert_eq!(adapter.transport().idle_connections(), 0);

    server.respond_with(200, "");
    counter.add(1.into(), &Attributes::new());
    assert!(timeout(STEP_TIMEOUT, adapter.collect()).await.unwrap());

    let requests = server.requests();
    let first = requests.first().unwrap();
    let last = requests.last().unwrap();
    assert_ne!(first.peer, last.peer);

    adapter.shutdown().await;
}

#[tokio::test]
async fn test_raw_transport_alongside_adapter_payloads() {
    let server = MockOtlpServer::start().await.unwrap();
    let transport = Arc::new(Transport::new(config(&server)));

    let body = transport
        .send(br#"{"resourceMetrics":[]}"#.to_vec(), None)
        .await
        .unwrap();
    assert_eq!(body.as_ref(), b"");

    let request = server.last_request().unwrap();
    assert_eq!(request.path, "/");
    assert_eq!(request.payload.as_ref(), br#"{"resourceMetrics":[]}"#);

    assert!(transport.shutdown(None));
}
