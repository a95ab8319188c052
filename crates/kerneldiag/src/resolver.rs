//! Resolution of declared metric requests against a [`MetricStore`].
//!
//! For each [`MetricRequest`] the resolver looks up the metric by name and
//! produces a [`ResolvedMetric`]:
//!
//! - found: [`ResolvedMetric::Live`]
//! - missing and optional with a fallback: [`ResolvedMetric::Fallback`]
//! - missing and optional without a fallback: [`ResolvedMetric::Absent`]
//! - missing and required: collected, and once every request has been looked
//!   at the resolution fails with [`RuleError::RequiredMetricMissing`] naming
//!   all of them.
//!
//! Missing optional metrics produce at most one warning finding per
//! resolution, never one per metric.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{ConfigurationError, MetricError, RuleError, RuleResult};
use crate::finding::Finding;
use crate::metric::{MetricStore, MetricValue, Value, ValueKind};
use crate::request::{Importance, MetricRequest};

/// Bidirectional, injective mapping between metric names and aliases.
///
/// An alias names exactly one metric, and a string is never used both as the
/// name of one metric and as the alias of another. A metric may be reached
/// through more than one alias when different rules pick different ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AliasTable {
    alias_to_name: BTreeMap<String, String>,
    names: BTreeMap<String, Option<String>>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical name for `key`, which may be a name or an alias.
    pub fn canonical<'a>(&'a self, key: &'a str) -> Option<&'a str> {
        if self.names.contains_key(key) {
            return Some(key);
        }
        self.alias_to_name.get(key).map(String::as_str)
    }

    pub fn alias_of(&self, name: &str) -> Option<&str> {
        self.names.get(name).and_then(|a| a.as_deref())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.canonical(key).is_some()
    }

    fn check(&self, name: &str, alias: Option<&str>) -> Result<(), ConfigurationError> {
        if let Some(aliased) = self.alias_to_name.get(name) {
            if aliased != name {
                return Err(ConfigurationError::AliasShadowsMetric {
                    name: name.to_string(),
                    aliased: aliased.clone(),
                });
            }
        }
        if let Some(alias) = alias {
            if let Some(existing) = self.alias_to_name.get(alias) {
                if existing != name {
                    return Err(ConfigurationError::AliasCollision {
                        alias: alias.to_string(),
                        existing: existing.clone(),
                        requested: name.to_string(),
                    });
                }
            }
            if alias != name && self.names.contains_key(alias) {
                return Err(ConfigurationError::AliasShadowsMetric {
                    name: alias.to_string(),
                    aliased: name.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Bind `name` (and its alias, if any).
    ///
    /// On error the table is left unchanged.
    pub fn bind(&mut self, name: &str, alias: Option<&str>) -> Result<(), ConfigurationError> {
        self.check(name, alias)?;
        let entry = self.names.entry(name.to_string()).or_insert(None);
        if let Some(alias) = alias {
            if entry.is_none() {
                *entry = Some(alias.to_string());
            }
            self.alias_to_name
                .insert(alias.to_string(), name.to_string());
        }
        Ok(())
    }

    /// Bind every request, all or nothing.
    pub fn bind_all<'r>(
        &mut self,
        requests: impl IntoIterator<Item = &'r MetricRequest>,
    ) -> Result<(), ConfigurationError> {
        let mut staged = self.clone();
        for request in requests {
            staged.bind(request.name(), request.alias_name())?;
        }
        *self = staged;
        Ok(())
    }
}

/// Outcome of resolving one request.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedMetric {
    /// Value read from the metric store
    Live(Arc<MetricValue>),
    /// Declared default substituted for a missing optional metric
    Fallback(Value),
    /// Missing optional metric without a fallback
    Absent,
}

impl ResolvedMetric {
    pub fn is_live(&self) -> bool {
        matches!(self, ResolvedMetric::Live(_))
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ResolvedMetric::Fallback(_))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, ResolvedMetric::Absent)
    }

    /// Scalar value, live or substituted.
    pub fn value(&self) -> Option<&Value> {
        match self {
            ResolvedMetric::Live(metric) => Some(metric.value()),
            ResolvedMetric::Fallback(value) => Some(value),
            ResolvedMetric::Absent => None,
        }
    }

    /// Full live metric including instances. Fallbacks carry no instances.
    pub fn metric(&self) -> Option<&MetricValue> {
        match self {
            ResolvedMetric::Live(metric) => Some(metric),
            _ => None,
        }
    }
}

/// A resolved metric together with the request metadata it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEntry {
    pub name: String,
    pub alias: Option<String>,
    pub importance: Importance,
    pub metric: ResolvedMetric,
}

/// Resolved metrics of one rule evaluation, addressable by name or alias.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedMetricSet {
    entries: BTreeMap<String, ResolvedEntry>,
    aliases: AliasTable,
}

impl ResolvedMetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry under its name and alias.
    ///
    /// Fails without modifying the set if the alias is already bound to a
    /// different metric.
    pub fn insert(&mut self, entry: ResolvedEntry) -> Result<(), ConfigurationError> {
        self.aliases.bind(&entry.name, entry.alias.as_deref())?;
        self.entries.insert(entry.name.clone(), entry);
        Ok(())
    }

    /// Look up by name or alias; both paths return the same entry.
    pub fn entry(&self, key: &str) -> Option<&ResolvedEntry> {
        self.aliases
            .canonical(key)
            .and_then(|name| self.entries.get(name))
    }

    pub fn get(&self, key: &str) -> Option<&ResolvedMetric> {
        self.entry(key).map(|e| &e.metric)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entry(key).is_some()
    }

    /// Full metric name behind `key`.
    pub fn name_of(&self, key: &str) -> Option<&str> {
        self.entry(key).map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedEntry> {
        self.entries.values()
    }

    fn value(&self, key: &str) -> Result<&Value, MetricError> {
        self.get(key)
            .and_then(ResolvedMetric::value)
            .ok_or_else(|| MetricError::Unavailable(key.to_string()))
    }

    /// Numeric value; integers are widened.
    pub fn f64(&self, key: &str) -> Result<f64, MetricError> {
        let value = self.value(key)?;
        value.as_f64().ok_or(MetricError::KindMismatch {
            name: key.to_string(),
            expected: ValueKind::Double,
            actual: value.kind(),
        })
    }

    /// Like [`f64`](Self::f64) but `Ok(None)` for an absent optional metric.
    pub fn opt_f64(&self, key: &str) -> Result<Option<f64>, MetricError> {
        match self.get(key) {
            Some(ResolvedMetric::Absent) => Ok(None),
            _ => self.f64(key).map(Some),
        }
    }

    pub fn u64(&self, key: &str) -> Result<u64, MetricError> {
        let value = self.value(key)?;
        value.as_u64().ok_or(MetricError::KindMismatch {
            name: key.to_string(),
            expected: ValueKind::UInt64,
            actual: value.kind(),
        })
    }

    pub fn str(&self, key: &str) -> Result<&str, MetricError> {
        let value = self.value(key)?;
        value.as_str().ok_or(MetricError::KindMismatch {
            name: key.to_string(),
            expected: ValueKind::String,
            actual: value.kind(),
        })
    }

    /// Live metric with its instances, `None` for fallback or absent values.
    pub fn metric(&self, key: &str) -> Option<&MetricValue> {
        self.get(key).and_then(ResolvedMetric::metric)
    }
}

/// Result of a successful resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub metrics: ResolvedMetricSet,
    /// Optional metrics that were missing, in request order
    pub missing_optional: Vec<String>,
    /// The single warning raised for missing optional metrics, if any
    pub warning: Option<Finding>,
}

/// Resolves metric requests against a store.
#[derive(Clone, Copy)]
pub struct MetricResolver<'s> {
    store: &'s dyn MetricStore,
    warn_on_missing_optional: bool,
}

impl<'s> MetricResolver<'s> {
    pub fn new(store: &'s dyn MetricStore) -> Self {
        MetricResolver {
            store,
            warn_on_missing_optional: true,
        }
    }

    /// Globally enable or silence the missing-optional warning.
    pub fn with_optional_warnings(mut self, enabled: bool) -> Self {
        self.warn_on_missing_optional = enabled;
        self
    }

    pub fn store(&self) -> &'s dyn MetricStore {
        self.store
    }

    pub fn resolve(&self, requests: &[MetricRequest]) -> RuleResult<Resolution> {
        let mut metrics = ResolvedMetricSet::new();
        let mut missing_required = Vec::new();
        let mut missing_optional = Vec::new();
        let mut warning = None;

        for request in requests {
            let metric = match self.store.lookup(request.name()) {
                Some(value) => ResolvedMetric::Live(value),
                None if request.is_required() => {
                    missing_required.push(request.name().to_string());
                    continue;
                }
                None => {
                    debug!(metric = request.name(), "optional metric missing");
                    missing_optional.push(request.name().to_string());
                    if warning.is_none() && self.warn_on_missing_optional && request.warn_if_missing()
                    {
                        warn!(metric = request.name(), "optional metric missing, using fallback");
                        warning = Some(missing_optional_warning(request.name()));
                    }
                    match request.default_value() {
                        Some(value) => ResolvedMetric::Fallback(value.clone()),
                        None => ResolvedMetric::Absent,
                    }
                }
            };

            metrics
                .insert(ResolvedEntry {
                    name: request.name().to_string(),
                    alias: request.alias_name().map(str::to_string),
                    importance: request.importance(),
                    metric,
                })?;
        }

        if !missing_required.is_empty() {
            warn!(metrics = ?missing_required, "required metrics missing");
            return Err(RuleError::RequiredMetricMissing {
                names: missing_required,
            });
        }

        Ok(Resolution {
            metrics,
            missing_optional,
            warning,
        })
    }
}

fn missing_optional_warning(name: &str) -> Finding {
    Finding::warning(format!(
        "The optional metric {} could not be found. Collecting it as an additional \
         metric could enable the rule to provide more guidance.",
        name
    ))
    .with_title("Missing Optional Metric")
}
