//! Raw counter values and the read-only store they come from.
//!
//! A [`MetricStore`] holds the values captured for one kernel execution.
//! The engine only ever reads from it; values are shared with the rules as
//! reference-counted [`MetricValue`]s so multi-instance counters are not
//! copied per rule.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::MetricError;

/// Kind tag of a scalar metric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    UInt64,
    Double,
    String,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::UInt64 => write!(f, "uint64"),
            ValueKind::Double => write!(f, "double"),
            ValueKind::String => write!(f, "string"),
        }
    }
}

/// A scalar counter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    UInt64(u64),
    Double(f64),
    String(String),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::UInt64(_) => ValueKind::UInt64,
            Value::Double(_) => ValueKind::Double,
            Value::String(_) => ValueKind::String,
        }
    }

    /// Numeric view of the value. Integers are widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::UInt64(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            Value::String(_) => None,
        }
    }

    /// Integer view. Doubles are accepted only when they are whole and
    /// non-negative.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt64(v) => Some(*v),
            Value::Double(v) if *v >= 0.0 && v.fract() == 0.0 && *v <= u64::MAX as f64 => {
                Some(*v as u64)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::UInt64(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

/// Per-instance values of a counter with several hardware instances.
///
/// Correlation ids map an instance back to a code address, a source line or
/// another key such as an opcode mnemonic. When present there is exactly one
/// id per value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instances {
    values: Vec<Value>,
    correlation_ids: Option<Vec<Value>>,
}

impl Instances {
    pub fn new(values: Vec<Value>) -> Self {
        Instances {
            values,
            correlation_ids: None,
        }
    }

    pub fn with_correlation_ids(
        values: Vec<Value>,
        correlation_ids: Vec<Value>,
    ) -> Result<Self, MetricError> {
        if values.len() != correlation_ids.len() {
            return Err(MetricError::InstanceLengthMismatch {
                values: values.len(),
                correlation_ids: correlation_ids.len(),
            });
        }
        Ok(Instances {
            values,
            correlation_ids: Some(correlation_ids),
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn correlation_ids(&self) -> Option<&[Value]> {
        self.correlation_ids.as_deref()
    }
}

/// One counter as captured by the profiler: an aggregate value plus, for
/// multi-instance counters, the per-instance breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    value: Value,
    instances: Option<Instances>,
}

impl MetricValue {
    pub fn new(value: impl Into<Value>) -> Self {
        MetricValue {
            value: value.into(),
            instances: None,
        }
    }

    pub fn with_instances(mut self, instances: Instances) -> Self {
        self.instances = Some(instances);
        self
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn kind(&self) -> ValueKind {
        self.value.kind()
    }

    pub fn instances(&self) -> Option<&Instances> {
        self.instances.as_ref()
    }

    pub fn num_instances(&self) -> usize {
        self.instances.as_ref().map(Instances::len).unwrap_or(0)
    }

    pub fn instance(&self, index: usize) -> Result<&Value, MetricError> {
        let len = self.num_instances();
        self.instances
            .as_ref()
            .and_then(|i| i.values.get(index))
            .ok_or(MetricError::InstanceOutOfRange { index, len })
    }

    pub fn has_correlation_ids(&self) -> bool {
        self.instances
            .as_ref()
            .is_some_and(|i| i.correlation_ids.is_some())
    }

    /// Correlation id of one instance. Instances recorded without ids fail
    /// with [`MetricError::NoCorrelationIds`] for every index.
    pub fn correlation_id(&self, index: usize) -> Result<&Value, MetricError> {
        let len = self.num_instances();
        let instances = self
            .instances
            .as_ref()
            .ok_or(MetricError::InstanceOutOfRange { index, len })?;
        let ids = instances
            .correlation_ids
            .as_ref()
            .ok_or(MetricError::NoCorrelationIds { len })?;
        ids.get(index)
            .ok_or(MetricError::InstanceOutOfRange { index, len })
    }
}

impl From<Value> for MetricValue {
    fn from(value: Value) -> Self {
        MetricValue::new(value)
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::new(value)
    }
}

impl From<u64> for MetricValue {
    fn from(value: u64) -> Self {
        MetricValue::new(value)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        MetricValue::new(value)
    }
}

/// Read-only source of raw counter values for one kernel execution.
pub trait MetricStore: Send + Sync {
    /// Look up a counter by its full name.
    fn lookup(&self, name: &str) -> Option<Arc<MetricValue>>;
}

/// [`MetricStore`] backed by an ordered in-memory map.
#[derive(Debug, Clone, Default)]
pub struct MemoryMetricStore {
    metrics: BTreeMap<String, Arc<MetricValue>>,
}

impl MemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, metric: impl Into<MetricValue>) {
        self.metrics.insert(name.into(), Arc::new(metric.into()));
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, metric: impl Into<MetricValue>) -> Self {
        self.insert(name, metric);
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<MetricValue>> {
        self.metrics.remove(name)
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.metrics.keys().map(String::as_str)
    }
}

impl MetricStore for MemoryMetricStore {
    fn lookup(&self, name: &str) -> Option<Arc<MetricValue>> {
        self.metrics.get(name).cloned()
    }
}

impl<S: MetricStore + ?Sized> MetricStore for &S {
    fn lookup(&self, name: &str) -> Option<Arc<MetricValue>> {
        (**self).lookup(name)
    }
}

impl<S: MetricStore + ?Sized> MetricStore for Arc<S> {
    fn lookup(&self, name: &str) -> Option<Arc<MetricValue>> {
        (**self).lookup(name)
    }
}
