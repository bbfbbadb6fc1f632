//! Attribute sets attached to measurements.

use crate::error::AttributeError;
use opentelemetry::{Array, KeyValue, StringValue, Value};
use std::collections::BTreeMap;

/// A homogeneous array attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeArray {
    /// Array of booleans.
    Bool(Vec<bool>),
    /// Array of integers.
    Int(Vec<i64>),
    /// Array of floats.
    Float(Vec<f64>),
    /// Array of strings.
    String(Vec<String>),
}

/// A single attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Float.
    Float(f64),
    /// String.
    String(String),
    /// Homogeneous array.
    Array(AttributeArray),
}

macro_rules! impl_from {
    ($($ty:ty => |$v:ident| $expr:expr),* $(,)?) => {
        $(
            impl From<$ty> for AttributeValue {
                fn from($v: $ty) -> Self {
                    $expr
                }
            }
        )*
    };
}

impl_from! {
    bool => |v| AttributeValue::Bool(v),
    i64 => |v| AttributeValue::Int(v),
    i32 => |v| AttributeValue::Int(i64::from(v)),
    u32 => |v| AttributeValue::Int(i64::from(v)),
    f64 => |v| AttributeValue::Float(v),
    f32 => |v| AttributeValue::Float(f64::from(v)),
    String => |v| AttributeValue::String(v),
    &str => |v| AttributeValue::String(v.to_string()),
    Vec<bool> => |v| AttributeValue::Array(AttributeArray::Bool(v)),
    Vec<i64> => |v| AttributeValue::Array(AttributeArray::Int(v)),
    Vec<f64> => |v| AttributeValue::Array(AttributeArray::Float(v)),
    Vec<String> => |v| AttributeValue::Array(AttributeArray::String(v)),
    Vec<&str> => |v| AttributeValue::Array(AttributeArray::String(
        v.into_iter().map(str::to_string).collect()
    )),
}

impl From<AttributeValue> for Value {
    fn from(value: AttributeValue) -> Self {
        match value {
            AttributeValue::Bool(v) => Value::Bool(v),
            AttributeValue::Int(v) => Value::I64(v),
            AttributeValue::Float(v) => Value::F64(v),
            AttributeValue::String(v) => Value::String(v.into()),
            AttributeValue::Array(AttributeArray::Bool(v)) => Value::Array(Array::Bool(v)),
            AttributeValue::Array(AttributeArray::Int(v)) => Value::Array(Array::I64(v)),
            AttributeValue::Array(AttributeArray::Float(v)) => Value::Array(Array::F64(v)),
            AttributeValue::Array(AttributeArray::String(v)) => Value::Array(Array::String(
                v.into_iter().map(StringValue::from).collect(),
            )),
        }
    }
}

/// A set of attributes keyed by non-empty names.
///
/// Inserting an existing key replaces its value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    entries: BTreeMap<String, AttributeValue>,
}

impl Attributes {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`AttributeError::EmptyKey`] when `key` is empty.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Result<&mut Self, AttributeError> {
        let key = key.into();
        if key.is_empty() {
            return Err(AttributeError::EmptyKey);
        }
        self.entries.insert(key, value.into());
        Ok(self)
    }

    /// Builder-style [`insert`](Self::insert).
    ///
    /// # Errors
    ///
    /// Returns [`AttributeError::EmptyKey`] when `key` is empty.
    pub fn with(
        mut self,
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Result<Self, AttributeError> {
        self.insert(key, value)?;
        Ok(self)
    }

    /// Builds a set from key/value pairs, failing on the first empty key.
    ///
    /// # Errors
    ///
    /// Returns [`AttributeError::EmptyKey`] when any key is empty.
    pub fn try_from_iter<I, K, V>(pairs: I) -> Result<Self, AttributeError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<AttributeValue>,
    {
        let mut attributes = Self::new();
        for (key, value) in pairs {
            attributes.insert(key, value)?;
        }
        Ok(attributes)
    }

    /// Looks up a value.
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.entries.get(key)
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Converts into OpenTelemetry key/values.
    pub fn to_key_values(&self) -> Vec<KeyValue> {
        self.entries
            .iter()
            .map(|(k, v)| KeyValue::new(k.clone(), Value::from(v.clone())))
            .collect()
    }
}
