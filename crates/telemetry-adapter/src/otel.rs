//! OpenTelemetry SDK backend.

use crate::error::AdapterError;
use crate::instrument::{Backend, Counter, Gauge, Histogram, InstrumentOptions, UpDownCounter};
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Meter, MeterProvider as _};
use opentelemetry_otlp::{MetricExporter, Protocol, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use otlp_transport::{
    CONTENT_TYPE_JSON, Signal, Transport, TransportConfig, TransportHttpClient, signal_endpoint,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Instrumentation scope name for meters and loggers.
pub(crate) const SCOPE_NAME: &str = "telemetry-adapter";

const DEFAULT_EXPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Identifies the reporting service. Becomes the `service.namespace`,
/// `service.name` and `service.instance.id` resource attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    /// `service.namespace`.
    pub namespace: String,
    /// `service.name`.
    pub name: String,
    /// `service.instance.id`.
    pub instance_id: String,
}

impl ServiceIdentity {
    /// Creates an identity.
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            instance_id: instance_id.into(),
        }
    }

    pub(crate) fn resource(&self) -> Resource {
        Resource::builder()
            .with_attributes([
                KeyValue::new("service.namespace", self.namespace.clone()),
                KeyValue::new("service.name", self.name.clone()),
                KeyValue::new("service.instance.id", self.instance_id.clone()),
            ])
            .build()
    }
}

/// Builds the shared transport and its SDK HTTP client for one signal.
pub(crate) fn signal_transport(
    mut config: TransportConfig,
    signal: Signal,
) -> Result<(TransportHttpClient, String, Protocol), tokio::runtime::TryCurrentError> {
    config.endpoint = signal_endpoint(&config.endpoint, signal);
    let protocol = if config.content_type.eq_ignore_ascii_case(CONTENT_TYPE_JSON) {
        Protocol::HttpJson
    } else {
        Protocol::HttpBinary
    };
    let endpoint = config.endpoint.clone();
    let client = TransportHttpClient::new(Arc::new(Transport::new(config)))?;
    Ok((client, endpoint, protocol))
}

#[derive(Default)]
struct InstrumentCache {
    counters: Mutex<HashMap<String, opentelemetry::metrics::Counter<f64>>>,
    up_down_counters: Mutex<HashMap<String, opentelemetry::metrics::UpDownCounter<f64>>>,
    histograms: Mutex<HashMap<String, opentelemetry::metrics::Histogram<f64>>>,
    gauges: Mutex<HashMap<String, opentelemetry::metrics::Gauge<f64>>>,
}

fn cached<K, I>(map: &Mutex<HashMap<K, I>>, key: K, create: impl FnOnce() -> I) -> I
where
    K: Eq + Hash,
    I: Clone,
{
    map.lock().entry(key).or_insert_with(create).clone()
}

/// Metrics adapter that exports through the OpenTelemetry SDK.
///
/// The meter provider is owned by the adapter and never registered globally.
/// Its periodic reader exports every 60 seconds; [`collect`](Self::collect)
/// forces an export cycle on demand. Instruments are cached by kind and
/// name, so creating the same instrument twice yields handles to one SDK
/// instrument.
pub struct OpenTelemetryAdapter {
    provider: SdkMeterProvider,
    meter: Meter,
    transport: Arc<Transport>,
    instruments: InstrumentCache,
    shutdown: AtomicBool,
}

impl OpenTelemetryAdapter {
    /// Creates an adapter exporting protobuf to `endpoint`. A base URL with
    /// no path gets `/v1/metrics` appended.
    ///
    /// # Errors
    ///
    /// Fails outside a tokio runtime or when the exporter cannot be built.
    pub fn new(endpoint: &str, service: ServiceIdentity) -> Result<Self, AdapterError> {
        Self::with_config(TransportConfig::new(endpoint), service, DEFAULT_EXPORT_INTERVAL)
    }

    /// Creates an adapter from a full transport configuration. The content
    /// type selects OTLP protobuf or JSON encoding.
    ///
    /// # Errors
    ///
    /// Fails outside a tokio runtime or when the exporter cannot be built.
    pub fn with_config(
        config: TransportConfig,
        service: ServiceIdentity,
        export_interval: Duration,
    ) -> Result<Self, AdapterError> {
        let timeout = config.timeout;
        let (client, endpoint, protocol) = signal_transport(config, Signal::Metrics)?;
        let transport = Arc::clone(client.transport());

        let exporter = MetricExporter::builder()
            .with_http()
            .with_http_client(client)
            .with_endpoint(&endpoint)
            .with_protocol(protocol)
            .with_timeout(timeout)
            .build()?;

        let reader = PeriodicReader::builder(exporter)
            .with_interval(export_interval)
            .build();

        let provider = SdkMeterProvider::builder()
            .with_reader(reader)
            .with_resource(service.resource())
            .build();
        let meter = provider.meter(SCOPE_NAME);

        tracing::debug!(
            %endpoint,
            service = %service.name,
            ?protocol,
            "OpenTelemetry metrics adapter created"
        );

        Ok(Self {
            provider,
            meter,
            transport,
            instruments: InstrumentCache::default(),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Creates, or fetches from the cache, a counter.
    pub fn create_counter(&self, name: &str, options: &InstrumentOptions) -> Counter {
        let instrument = cached(&self.instruments.counters, name.to_string(), || {
            let mut builder = self.meter.f64_counter(name.to_string());
            if let Some(unit) = &options.unit {
                builder = builder.with_unit(unit.clone());
            }
            if let Some(description) = &options.description {
                builder = builder.with_description(description.clone());
            }
            builder.build()
        });
        Counter::new(Backend::OpenTelemetry(instrument))
    }

    /// Creates, or fetches from the cache, an up-down counter.
    pub fn create_up_down_counter(&self, name: &str, options: &InstrumentOptions) -> UpDownCounter {
        let instrument = cached(&self.instruments.up_down_counters, name.to_string(), || {
            let mut builder = self.meter.f64_up_down_counter(name.to_string());
            if let Some(unit) = &options.unit {
                builder = builder.with_unit(unit.clone());
            }
            if let Some(description) = &options.description {
                builder = builder.with_description(description.clone());
            }
            builder.build()
        });
        UpDownCounter::new(Backend::OpenTelemetry(instrument))
    }

    /// Creates, or fetches from the cache, a histogram. Explicit bucket
    /// boundaries from the advisory replace the SDK defaults.
    pub fn create_histogram(&self, name: &str, options: &InstrumentOptions) -> Histogram {
        let instrument = cached(&self.instruments.histograms, name.to_string(), || {
            let mut builder = self.meter.f64_histogram(name.to_string());
            if let Some(unit) = &options.unit {
                builder = builder.with_unit(unit.clone());
            }
            if let Some(description) = &options.description {
                builder = builder.with_description(description.clone());
            }
            if let Some(boundaries) = &options.advisory.explicit_bucket_boundaries {
                builder = builder.with_boundaries(boundaries.clone());
            }
            builder.build()
        });
        Histogram::new(Backend::OpenTelemetry(instrument))
    }

    /// Creates, or fetches from the cache, a gauge.
    pub fn create_gauge(&self, name: &str, options: &InstrumentOptions) -> Gauge {
        let instrument = cached(&self.instruments.gauges, name.to_string(), || {
            let mut builder = self.meter.f64_gauge(name.to_string());
            if let Some(unit) = &options.unit {
                builder = builder.with_unit(unit.clone());
            }
            if let Some(description) = &options.description {
                builder = builder.with_description(description.clone());
            }
            builder.build()
        });
        Gauge::new(Backend::OpenTelemetry(instrument))
    }

    /// Collects every instrument and exports the result now. Returns whether
    /// the export succeeded.
    pub async fn collect(&self) -> bool {
        let provider = self.provider.clone();
        match tokio::task::spawn_blocking(move || provider.force_flush()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Metric collection failed");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Metric collection task failed");
                false
            }
        }
    }

    /// Exports anything pending, then shuts the provider and the transport
    /// down. Returns whether the provider shut down cleanly. Later calls are
    /// no-ops returning `true`.
    pub async fn shutdown(&self) -> bool {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return true;
        }

        let provider = self.provider.clone();
        let result = tokio::task::spawn_blocking(move || provider.shutdown()).await;
        self.transport.shutdown(None);

        match result {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Meter provider shutdown failed");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Meter provider shutdown task failed");
                false
            }
        }
    }

    /// The transport metrics are exported through.
    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }
}

impl fmt::Debug for OpenTelemetryAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenTelemetryAdapter")
            .field("transport", &self.transport)
            .field("shutdown", &self.shutdown.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Adapter;
    use otlp_transport::CONTENT_TYPE_PROTOBUF;

    #[test]
    fn test_resource_attributes() {
        let resource = ServiceIdentity::new("platform", "api", "api-1").resource();

        assert_eq!(
            resource.get(&opentelemetry::Key::from_static_str("service.namespace")),
            Some(opentelemetry::Value::from("platform"))
        );
        assert_eq!(
            resource.get(&opentelemetry::Key::from_static_str("service.name")),
            Some(opentelemetry::Value::from("api"))
        );
        assert_eq!(
            resource.get(&opentelemetry::Key::from_static_str("service.instance.id")),
            Some(opentelemetry::Value::from("api-1"))
        );
    }

    #[tokio::test]
    async fn test_signal_transport_resolves_path_and_protocol() {
        let (client, endpoint, protocol) =
            signal_transport(TransportConfig::new("http://collector:4318"), Signal::Metrics)
                .unwrap();
        assert_eq!(endpoint, "http://collector:4318/v1/metrics");
        assert_eq!(protocol, Protocol::HttpBinary);
        assert_eq!(client.transport().content_type(), CONTENT_TYPE_PROTOBUF);

        let config = TransportConfig::builder("http://collector:4318/custom")
            .content_type(CONTENT_TYPE_JSON)
            .build();
        let (_, endpoint, protocol) = signal_transport(config, Signal::Logs).unwrap();
        assert_eq!(endpoint, "http://collector:4318/custom");
        assert_eq!(protocol, Protocol::HttpJson);
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let result = OpenTelemetryAdapter::new(
            "http://127.0.0.1:1",
            ServiceIdentity::new("ns", "svc", "id"),
        );
        assert!(matches!(result, Err(AdapterError::Runtime(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_instruments_are_cached_by_name() {
        let adapter = OpenTelemetryAdapter::new(
            "http://127.0.0.1:1",
            ServiceIdentity::new("ns", "svc", "id"),
        )
        .unwrap();

        adapter.create_counter("requests", &InstrumentOptions::new());
        adapter.create_counter("requests", &InstrumentOptions::new());
        adapter.create_histogram("requests", &InstrumentOptions::new());

        assert_eq!(adapter.instruments.counters.lock().len(), 1);
        assert_eq!(adapter.instruments.histograms.lock().len(), 1);

        assert!(adapter.shutdown().await);
        assert!(adapter.transport().is_shutdown());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_twice_returns_true() {
        let adapter = OpenTelemetryAdapter::new(
            "http://127.0.0.1:1",
            ServiceIdentity::new("ns", "svc", "id"),
        )
        .unwrap();

        assert!(adapter.shutdown().await);
        assert!(adapter.shutdown().await);
        assert!(Adapter::from(adapter).shutdown().await);
    }
}
