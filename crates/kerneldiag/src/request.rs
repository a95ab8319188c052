//! Declarative metric requirements of a rule.

use serde::{Deserialize, Serialize};

use crate::metric::Value;

/// Whether a missing metric aborts the rule or is substituted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Importance {
    Optional,
    Required,
}

/// A metric a rule wants to read, with its fallback policy.
///
/// Defaults: no alias, required, fallback `Double(0.0)` (only used once the
/// request is made optional) and a warning when an optional metric is
/// missing.
///
/// ```
/// use kerneldiag::{MetricRequest, Value};
///
/// let request = MetricRequest::new("dram__bytes.sum.per_second")
///     .alias("dram_bandwidth")
///     .optional(0u64);
/// assert!(!request.is_required());
/// assert_eq!(request.default_value(), Some(&Value::UInt64(0)));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRequest {
    name: String,
    alias: Option<String>,
    importance: Importance,
    default_value: Option<Value>,
    warn_if_missing: bool,
}

impl MetricRequest {
    pub fn new(name: impl Into<String>) -> Self {
        MetricRequest {
            name: name.into(),
            alias: None,
            importance: Importance::Required,
            default_value: Some(Value::Double(0.0)),
            warn_if_missing: true,
        }
    }

    /// Second key under which the resolved metric can be looked up.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.importance = Importance::Required;
        self
    }

    /// Make the request optional, substituting `default` when missing.
    pub fn optional(mut self, default: impl Into<Value>) -> Self {
        self.importance = Importance::Optional;
        self.default_value = Some(default.into());
        self
    }

    /// Make the request optional with no substitute; the metric resolves to
    /// an explicit absent value the rule has to check.
    pub fn optional_without_fallback(mut self) -> Self {
        self.importance = Importance::Optional;
        self.default_value = None;
        self
    }

    /// Do not warn when this optional metric is missing.
    pub fn quiet(mut self) -> Self {
        self.warn_if_missing = false;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn alias_name(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn importance(&self) -> Importance {
        self.importance
    }

    pub fn is_required(&self) -> bool {
        self.importance == Importance::Required
    }

    /// Fallback for a missing metric. Always `None` for required requests.
    pub fn default_value(&self) -> Option<&Value> {
        match self.importance {
            Importance::Required => None,
            Importance::Optional => self.default_value.as_ref(),
        }
    }

    pub fn warn_if_missing(&self) -> bool {
        self.warn_if_missing
    }
}
