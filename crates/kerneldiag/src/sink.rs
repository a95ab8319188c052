//! Append-only collection of findings for one analysis pass.

use serde::{Deserialize, Serialize};

use crate::finding::{Finding, FindingKind};
use crate::rule::RuleId;

/// A finding together with the rule that reported it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkEntry {
    pub rule: RuleId,
    pub finding: Finding,
}

/// Findings in scheduler order; per rule, in the order the rule reported
/// them. Entries cannot be changed or removed once appended.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticSink {
    entries: Vec<SinkEntry>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, rule: RuleId, finding: Finding) {
        self.entries.push(SinkEntry { rule, finding });
    }

    /// Append all findings of one rule evaluation.
    pub fn extend(&mut self, rule: &RuleId, findings: impl IntoIterator<Item = Finding>) {
        for finding in findings {
            self.push(rule.clone(), finding);
        }
    }

    pub fn entries(&self) -> &[SinkEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &SinkEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Findings reported by one rule.
    pub fn findings_for<'a>(&'a self, rule: &'a str) -> impl Iterator<Item = &'a Finding> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.rule.as_str() == rule)
            .map(|e| &e.finding)
    }

    pub fn count(&self, kind: FindingKind) -> usize {
        self.entries
            .iter()
            .filter(|e| e.finding.kind == kind)
            .count()
    }

    pub fn has_errors(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.finding.kind == FindingKind::Error)
    }

    /// Format all findings followed by a summary line.
    pub fn format_all(&self) -> String {
        let mut output = String::new();
        for entry in &self.entries {
            output.push_str(&format!("{}: ", entry.rule));
            output.push_str(&entry.finding.format());
            output.push('\n');
        }

        output.push_str(&format!(
            "\nSummary: {} optimization(s), {} warning(s), {} error(s)\n",
            self.count(FindingKind::Optimization),
            self.count(FindingKind::Warning),
            self.count(FindingKind::Error)
        ));

        output
    }

    pub fn into_entries(self) -> Vec<SinkEntry> {
        self.entries
    }
}

impl<'a> IntoIterator for &'a DiagnosticSink {
    type Item = &'a SinkEntry;
    type IntoIter = std::slice::Iter<'a, SinkEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
