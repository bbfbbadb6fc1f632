//! The adapter: one entry point over every metrics backend.

use crate::instrument::{
    Backend, Counter, Gauge, Histogram, InstrumentOptions, Number, Recording, UpDownCounter,
};
use crate::otel::OpenTelemetryAdapter;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Creates instruments on the backend chosen at construction.
#[derive(Debug, Default)]
pub enum Adapter {
    /// Export through the OpenTelemetry SDK.
    OpenTelemetry(OpenTelemetryAdapter),
    /// Record in memory.
    Test(TestAdapter),
    /// Discard everything.
    #[default]
    None,
}

impl Adapter {
    /// Creates a counter.
    pub fn create_counter(&self, name: &str, options: &InstrumentOptions) -> Counter {
        match self {
            Adapter::OpenTelemetry(otel) => otel.create_counter(name, options),
            Adapter::Test(test) => Counter::new(TestAdapter::recording(&test.counters, name)),
            Adapter::None => Counter::noop(),
        }
    }

    /// Creates an up-down counter.
    pub fn create_up_down_counter(&self, name: &str, options: &InstrumentOptions) -> UpDownCounter {
        match self {
            Adapter::OpenTelemetry(otel) => otel.create_up_down_counter(name, options),
            Adapter::Test(test) => {
                UpDownCounter::new(TestAdapter::recording(&test.up_down_counters, name))
            }
            Adapter::None => UpDownCounter::noop(),
        }
    }

    /// Creates a histogram.
    pub fn create_histogram(&self, name: &str, options: &InstrumentOptions) -> Histogram {
        match self {
            Adapter::OpenTelemetry(otel) => otel.create_histogram(name, options),
            Adapter::Test(test) => Histogram::new(TestAdapter::recording(&test.histograms, name)),
            Adapter::None => Histogram::noop(),
        }
    }

    /// Creates a gauge.
    pub fn create_gauge(&self, name: &str, options: &InstrumentOptions) -> Gauge {
        match self {
            Adapter::OpenTelemetry(otel) => otel.create_gauge(name, options),
            Adapter::Test(test) => Gauge::new(TestAdapter::recording(&test.gauges, name)),
            Adapter::None => Gauge::noop(),
        }
    }

    /// Exports pending measurements now. Always `true` for the test and
    /// no-op backends.
    pub async fn collect(&self) -> bool {
        match self {
            Adapter::OpenTelemetry(otel) => otel.collect().await,
            Adapter::Test(_) | Adapter::None => true,
        }
    }

    /// Flushes and releases the backend. Always `true` for the test and
    /// no-op backends.
    pub async fn shutdown(&self) -> bool {
        match self {
            Adapter::OpenTelemetry(otel) => otel.shutdown().await,
            Adapter::Test(_) | Adapter::None => true,
        }
    }
}

impl From<OpenTelemetryAdapter> for Adapter {
    fn from(adapter: OpenTelemetryAdapter) -> Self {
        Adapter::OpenTelemetry(adapter)
    }
}

impl From<TestAdapter> for Adapter {
    fn from(adapter: TestAdapter) -> Self {
        Adapter::Test(adapter)
    }
}

type Recordings = Mutex<HashMap<String, Recording>>;

/// Keeps every measurement in memory, per instrument name.
///
/// Creating an instrument with a name that already exists starts a fresh
/// recording for that name.
#[derive(Debug, Default)]
pub struct TestAdapter {
    counters: Recordings,
    up_down_counters: Recordings,
    histograms: Recordings,
    gauges: Recordings,
}

impl TestAdapter {
    /// An adapter with no instruments.
    pub fn new() -> Self {
        Self::default()
    }

    fn recording<I>(recordings: &Recordings, name: &str) -> Backend<I> {
        let recording = Recording::default();
        recordings
            .lock()
            .insert(name.to_string(), Arc::clone(&recording));
        tracing::trace!(name, "Recording instrument created");
        Backend::Recording(recording)
    }

    fn values(recordings: &Recordings, name: &str) -> Option<Vec<Number>> {
        recordings.lock().get(name).map(|r| r.lock().clone())
    }

    /// Amounts added to the counter `name`, oldest first.
    pub fn counter_values(&self, name: &str) -> Option<Vec<Number>> {
        Self::values(&self.counters, name)
    }

    /// Amounts added to the up-down counter `name`, oldest first.
    pub fn up_down_counter_values(&self, name: &str) -> Option<Vec<Number>> {
        Self::values(&self.up_down_counters, name)
    }

    /// Values recorded by the histogram `name`, oldest first.
    pub fn histogram_values(&self, name: &str) -> Option<Vec<Number>> {
        Self::values(&self.histograms, name)
    }

    /// Values recorded by the gauge `name`, oldest first.
    pub fn gauge_values(&self, name: &str) -> Option<Vec<Number>> {
        Self::values(&self.gauges, name)
    }
}
