//! The rule interface implemented by diagnostic heuristics.

use std::borrow::Borrow;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::RuleResult;
use crate::finding::Finding;
use crate::request::MetricRequest;
use crate::resolver::{MetricResolver, ResolvedMetricSet};
use crate::weights::{ParentWeights, Weights};

/// Interned rule identifier.
///
/// Cloning is cheap, so identifiers can be handed around freely by the
/// registry, the scheduler and the findings they produce.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(Arc<str>);

impl RuleId {
    pub fn new(id: impl AsRef<str>) -> Self {
        RuleId(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RuleId {
    fn from(id: &str) -> Self {
        RuleId::new(id)
    }
}

impl From<String> for RuleId {
    fn from(id: String) -> Self {
        RuleId(Arc::from(id))
    }
}

impl Borrow<str> for RuleId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Serialize for RuleId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RuleId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(RuleId::from)
    }
}

/// Display metadata of a rule.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleInfo {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Report section the rule's findings belong to
    pub section: Option<String>,
}

impl RuleInfo {
    pub fn new(name: impl Into<String>) -> Self {
        RuleInfo {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }
}

/// What a rule produces for one evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleOutput {
    pub findings: Vec<Finding>,
    /// Weights forwarded to every rule that declared this one as a parent
    pub child_weights: Option<Weights>,
}

impl RuleOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, finding: Finding) {
        self.findings.push(finding);
    }

    pub fn with_finding(mut self, finding: Finding) -> Self {
        self.findings.push(finding);
        self
    }

    pub fn with_child_weights(mut self, weights: Weights) -> Self {
        self.child_weights = Some(weights);
        self
    }
}

/// A unit of analysis.
///
/// Rules are registered once and must be immutable afterwards; the engine
/// may evaluate independent rules from several threads.
pub trait Rule: Send + Sync {
    /// Globally unique identifier.
    fn identifier(&self) -> RuleId;

    fn info(&self) -> RuleInfo {
        RuleInfo::default()
    }

    /// Rules that must run before this one and whose weights it receives.
    fn parent_identifiers(&self) -> Vec<RuleId> {
        Vec::new()
    }

    fn metric_requests(&self) -> Vec<MetricRequest>;

    /// Evaluate the rule. Only called when every required metric resolved.
    fn apply(&self, ctx: &RuleContext<'_>) -> RuleResult<RuleOutput>;
}

/// Everything a rule sees during one evaluation.
pub struct RuleContext<'a> {
    rule: RuleId,
    metrics: ResolvedMetricSet,
    parents: ParentWeights,
    resolver: MetricResolver<'a>,
    warned: Cell<bool>,
    notices: RefCell<Vec<Finding>>,
}

impl<'a> RuleContext<'a> {
    pub(crate) fn new(
        rule: RuleId,
        metrics: ResolvedMetricSet,
        parents: ParentWeights,
        resolver: MetricResolver<'a>,
        warning: Option<Finding>,
    ) -> Self {
        let warned = warning.is_some();
        RuleContext {
            rule,
            metrics,
            parents,
            resolver,
            warned: Cell::new(warned),
            notices: RefCell::new(warning.into_iter().collect()),
        }
    }

    pub fn rule(&self) -> &RuleId {
        &self.rule
    }

    /// Metrics resolved from [`Rule::metric_requests`].
    pub fn metrics(&self) -> &ResolvedMetricSet {
        &self.metrics
    }

    /// Weights received from the rule's parents.
    pub fn parent_weights(&self) -> &ParentWeights {
        &self.parents
    }

    /// Resolve additional requests discovered while applying the rule, for
    /// example metric names listed inside a string-valued breakdown metric.
    ///
    /// Same semantics as the initial resolution. A missing optional metric
    /// only raises a warning if none was raised yet for this evaluation.
    pub fn resolve(&self, requests: &[MetricRequest]) -> RuleResult<ResolvedMetricSet> {
        let resolution = self.resolver.resolve(requests)?;
        if let Some(warning) = resolution.warning {
            if !self.warned.replace(true) {
                self.notices.borrow_mut().push(warning);
            }
        }
        Ok(resolution.metrics)
    }

    /// Engine-generated findings (warnings) to report before the rule's own.
    pub(crate) fn take_notices(&self) -> Vec<Finding> {
        self.notices.take()
    }
}
