//! Error types for the rule engine.

use thiserror::Error;

use crate::metric::ValueKind;
use crate::rule::RuleId;

/// Fatal errors in the static rule setup. Surfaced before any rule runs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("Rule '{0}' is already registered")]
    DuplicateRule(RuleId),

    #[error("Rule identifiers must not be empty")]
    EmptyRuleId,

    #[error("Alias '{alias}' is already used by metric '{existing}', cannot bind it to '{requested}'")]
    AliasCollision {
        alias: String,
        existing: String,
        requested: String,
    },

    #[error("'{name}' is requested as a metric name and as an alias of '{aliased}'")]
    AliasShadowsMetric { name: String, aliased: String },

    #[error("Dependency cycle between rules: {}", format_rules(.rules))]
    DependencyCycle { rules: Vec<RuleId> },
}

fn format_rules(rules: &[RuleId]) -> String {
    rules
        .iter()
        .map(|r| r.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors raised while reading a resolved metric.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricError {
    #[error("Metric '{0}' is not available")]
    Unavailable(String),

    #[error("Metric '{name}' holds a {actual} value, expected {expected}")]
    KindMismatch {
        name: String,
        expected: ValueKind,
        actual: ValueKind,
    },

    #[error("Metric has {values} instance values but {correlation_ids} correlation ids")]
    InstanceLengthMismatch {
        values: usize,
        correlation_ids: usize,
    },

    #[error("Instance {index} out of range for metric with {len} instances")]
    InstanceOutOfRange { index: usize, len: usize },

    #[error("Metric with {len} instances carries no correlation ids")]
    NoCorrelationIds { len: usize },
}

/// Errors scoped to a single rule evaluation.
///
/// The scheduler turns any of these into one ERROR finding for the rule and
/// keeps the pass going.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    #[error("Required metrics missing: {}", .names.join(", "))]
    RequiredMetricMissing { names: Vec<String> },

    #[error(transparent)]
    Metric(#[from] MetricError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Rule failed: {0}")]
    Failed(String),
}

impl RuleError {
    pub fn failed(message: impl Into<String>) -> Self {
        RuleError::Failed(message.into())
    }
}

pub type EngineResult<T> = Result<T, ConfigurationError>;
pub type RuleResult<T> = Result<T, RuleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_rules() {
        let err = ConfigurationError::DependencyCycle {
            rules: vec![RuleId::new("A"), RuleId::new("B")],
        };
        assert_eq!(err.to_string(), "Dependency cycle between rules: A, B");
    }

    #[test]
    fn test_metric_error_converts_into_rule_error() {
        let err: RuleError = MetricError::Unavailable("m1".into()).into();
        assert_eq!(err.to_string(), "Metric 'm1' is not available");
    }

    #[test]
    fn test_required_missing_lists_names() {
        let err = RuleError::RequiredMetricMissing {
            names: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "Required metrics missing: a, b");
    }
}
