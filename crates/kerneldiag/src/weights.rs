//! Normalized contributions passed from a rule to its children.
//!
//! A weight is a fraction in `[0, 1]` of the overall kernel time or
//! throughput attributable to some factor. Well-known cross-rule weights
//! have typed slots in [`KnownWeights`]; anything specific to one pair of
//! rules goes into the ad hoc map.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::rule::RuleId;
use crate::speedup::clamp_fraction;

/// A fraction in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Weight(f64);

impl Weight {
    /// Values outside `[0, 1]` are clamped.
    pub fn new(value: f64) -> Self {
        Weight(clamp_fraction(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl From<f64> for Weight {
    fn from(value: f64) -> Self {
        Weight::new(value)
    }
}

/// Typed slots for weights shared across many rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnownWeights {
    /// SM throughput as a fraction of peak
    pub compute_throughput: Option<Weight>,
    /// Memory throughput as a fraction of peak
    pub memory_throughput: Option<Weight>,
    /// Larger of compute and memory throughput
    pub max_throughput: Option<Weight>,
    /// Estimated gain from better issue slot utilization
    pub issue_slot_speedup: Option<Weight>,
}

impl KnownWeights {
    fn merge_from(&mut self, other: &KnownWeights) {
        if other.compute_throughput.is_some() {
            self.compute_throughput = other.compute_throughput;
        }
        if other.memory_throughput.is_some() {
            self.memory_throughput = other.memory_throughput;
        }
        if other.max_throughput.is_some() {
            self.max_throughput = other.max_throughput;
        }
        if other.issue_slot_speedup.is_some() {
            self.issue_slot_speedup = other.issue_slot_speedup;
        }
    }

    fn is_empty(&self) -> bool {
        self.compute_throughput.is_none()
            && self.memory_throughput.is_none()
            && self.max_throughput.is_none()
            && self.issue_slot_speedup.is_none()
    }
}

/// The weights one rule hands to its children.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub known: KnownWeights,
    ad_hoc: BTreeMap<String, Weight>,
}

impl Weights {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_known(known: KnownWeights) -> Self {
        Weights {
            known,
            ad_hoc: BTreeMap::new(),
        }
    }

    /// Set a weight only meaningful to a specific pair of rules.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.ad_hoc.insert(name.into(), Weight::new(value));
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.ad_hoc.get(name).map(|w| w.value())
    }

    pub fn ad_hoc(&self) -> impl Iterator<Item = (&str, f64)> {
        self.ad_hoc.iter().map(|(k, v)| (k.as_str(), v.value()))
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty() && self.ad_hoc.is_empty()
    }

    /// Overlay `other` on top of `self`; keys present in `other` win.
    pub fn merge_from(&mut self, other: &Weights) {
        self.known.merge_from(&other.known);
        for (name, weight) in &other.ad_hoc {
            self.ad_hoc.insert(name.clone(), *weight);
        }
    }
}

/// Weights received by a rule, one payload per parent edge.
///
/// Parents appear in the order the child declared them. Parents that were
/// not registered, were aborted, or published nothing have no entry.
#[derive(Debug, Clone, Default)]
pub struct ParentWeights {
    edges: Vec<(RuleId, Arc<Weights>)>,
}

impl ParentWeights {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, parent: RuleId, weights: Arc<Weights>) {
        self.edges.push((parent, weights));
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Payload sent by one specific parent.
    pub fn from_parent(&self, parent: &str) -> Option<&Weights> {
        self.edges
            .iter()
            .find(|(id, _)| id.as_str() == parent)
            .map(|(_, w)| w.as_ref())
    }

    pub fn parents(&self) -> impl Iterator<Item = &RuleId> {
        self.edges.iter().map(|(id, _)| id)
    }

    /// Union of all payloads; for a key sent by several parents the last
    /// declared parent wins.
    pub fn merged(&self) -> Weights {
        let mut merged = Weights::new();
        for (_, weights) in &self.edges {
            merged.merge_from(weights);
        }
        merged
    }

    /// Ad hoc weight, last declared parent wins.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.edges.iter().rev().find_map(|(_, w)| w.get(name))
    }

    fn known(&self, pick: impl Fn(&KnownWeights) -> Option<Weight>) -> Option<f64> {
        self.edges
            .iter()
            .rev()
            .find_map(|(_, w)| pick(&w.known))
            .map(Weight::value)
    }

    pub fn compute_throughput(&self) -> Option<f64> {
        self.known(|k| k.compute_throughput)
    }

    pub fn memory_throughput(&self) -> Option<f64> {
        self.known(|k| k.memory_throughput)
    }

    pub fn max_throughput(&self) -> Option<f64> {
        self.known(|k| k.max_throughput)
    }

    pub fn issue_slot_speedup(&self) -> Option<f64> {
        self.known(|k| k.issue_slot_speedup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_is_clamped() {
        assert_eq!(Weight::new(1.5).value(), 1.0);
        assert_eq!(Weight::new(-0.1).value(), 0.0);
    }

    #[test]
    fn test_merge_last_writer_wins() {
        let mut parents = ParentWeights::new();
        parents.push(
            RuleId::new("A"),
            Arc::new(Weights::new().with("w", 0.3).with("only_a", 0.1)),
        );
        parents.push(RuleId::new("B"), Arc::new(Weights::new().with("w", 0.6)));

        let merged = parents.merged();
        assert_eq!(merged.get("w"), Some(0.6));
        assert_eq!(merged.get("only_a"), Some(0.1));
        assert_eq!(parents.get("w"), Some(0.6));
        assert_eq!(parents.from_parent("A").and_then(|w| w.get("w")), Some(0.3));
        assert!(parents.from_parent("C").is_none());
    }

    #[test]
    fn test_known_weights_lookup() {
        let mut known = KnownWeights::default();
        known.max_throughput = Some(Weight::new(0.45));
        let mut parents = ParentWeights::new();
        parents.push(RuleId::new("SOLBottleneck"), Arc::new(Weights::with_known(known)));

        assert_eq!(parents.max_throughput(), Some(0.45));
        assert_eq!(parents.issue_slot_speedup(), None);
    }

    #[test]
    fn test_empty() {
        assert!(Weights::new().is_empty());
        assert!(!Weights::new().with("x", 0.0).is_empty());
        assert!(ParentWeights::new().is_empty());
    }
}
