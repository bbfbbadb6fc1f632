//! Metric instruments.
//!
//! Each instrument is a thin handle over one of three backends: an
//! OpenTelemetry SDK instrument, an in-memory recording, or nothing. Handles
//! are cheap to clone and safe to share between threads.

use crate::attribute::Attributes;
use opentelemetry::KeyValue;
use opentelemetry::metrics;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// A measurement: integer or float.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    /// Integer amount.
    Int(i64),
    /// Float amount.
    Float(f64),
}

impl Number {
    /// The amount as `f64`.
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(v) => v as f64,
            Number::Float(v) => v,
        }
    }
}

impl From<i64> for Number {
    fn from(v: i64) -> Self {
        Number::Int(v)
    }
}

impl From<i32> for Number {
    fn from(v: i32) -> Self {
        Number::Int(i64::from(v))
    }
}

impl From<u32> for Number {
    fn from(v: u32) -> Self {
        Number::Int(i64::from(v))
    }
}

impl From<f64> for Number {
    fn from(v: f64) -> Self {
        Number::Float(v)
    }
}

/// Instruments that accumulate amounts: counters and up-down counters.
pub trait Add {
    /// Adds `amount` under `attributes`.
    fn add(&self, amount: Number, attributes: &Attributes);
}

/// Instruments that record individual values: histograms and gauges.
pub trait Record {
    /// Records `amount` under `attributes`.
    fn record(&self, amount: Number, attributes: &Attributes);
}

/// Advisory parameters passed to the SDK.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Advisory {
    /// Histogram bucket boundaries, replacing the SDK defaults.
    pub explicit_bucket_boundaries: Option<Vec<f64>>,
}

/// Optional instrument metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstrumentOptions {
    /// Unit, e.g. `ms` or `{request}`.
    pub unit: Option<String>,
    /// Human-readable description.
    pub description: Option<String>,
    /// Advisory parameters.
    pub advisory: Advisory,
}

impl InstrumentOptions {
    /// No unit, no description, no advisory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the unit.
    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets explicit histogram bucket boundaries.
    #[must_use]
    pub fn with_bucket_boundaries(mut self, boundaries: Vec<f64>) -> Self {
        self.advisory.explicit_bucket_boundaries = Some(boundaries);
        self
    }
}

/// Shared storage for a recording instrument.
pub(crate) type Recording = Arc<Mutex<Vec<Number>>>;

#[derive(Clone)]
pub(crate) enum Backend<I> {
    OpenTelemetry(I),
    Recording(Recording),
    Discard,
}

impl<I> Backend<I> {
    fn apply(
        &self,
        amount: Number,
        attributes: &Attributes,
        sdk: impl FnOnce(&I, f64, &[KeyValue]),
    ) {
        match self {
            Backend::OpenTelemetry(instrument) => {
                sdk(instrument, amount.as_f64(), &attributes.to_key_values());
            }
            Backend::Recording(values) => values.lock().push(amount),
            Backend::Discard => {}
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Backend::OpenTelemetry(_) => "OpenTelemetry",
            Backend::Recording(_) => "Recording",
            Backend::Discard => "Discard",
        }
    }
}

macro_rules! instrument {
    ($(#[$doc:meta])* $name:ident, $sdk:ty, $trait:ident :: $method:ident) => {
        $(#[$doc])*
        #[derive(Clone)]
        pub struct $name {
            backend: Backend<$sdk>,
        }

        impl $name {
            pub(crate) fn new(backend: Backend<$sdk>) -> Self {
                Self { backend }
            }

            /// An instrument that discards every measurement.
            pub fn noop() -> Self {
                Self::new(Backend::Discard)
            }
        }

        impl $trait for $name {
            fn $method(&self, amount: Number, attributes: &Attributes) {
                self.backend.apply(amount, attributes, |i, v, kv| i.$method(v, kv));
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("backend", &self.backend.name())
                    .finish()
            }
        }
    };
}

instrument!(
    /// Monotonic sum.
    Counter, metrics::Counter<f64>, Add::add
);
instrument!(
    /// Sum that may go up or down.
    UpDownCounter, metrics::UpDownCounter<f64>, Add::add
);
instrument!(
    /// Distribution of recorded values.
    Histogram, metrics::Histogram<f64>, Record::record
);
instrument!(
    /// Last recorded value.
    Gauge, metrics::Gauge<f64>, Record::record
);
