//! Diagnostic findings reported by rules.
//!
//! A [`Finding`] is one reported unit: a message with an optional estimated
//! speedup, the metrics that act as the main lever for the suggested fix and,
//! for rules that can attribute an issue to code, source markers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::speedup::Speedup;

/// Category of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FindingKind {
    /// Informational, nothing to fix
    Ok,
    /// Actionable performance opportunity
    Optimization,
    /// Analysis is incomplete or questionable
    Warning,
    /// The rule could not be evaluated
    Error,
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FindingKind::Ok => write!(f, "OK"),
            FindingKind::Optimization => write!(f, "OPTIMIZATION"),
            FindingKind::Warning => write!(f, "WARNING"),
            FindingKind::Error => write!(f, "ERROR"),
        }
    }
}

/// How strongly a focus metric points at the problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Default,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Default => write!(f, "default"),
            Severity::High => write!(f, "high"),
        }
    }
}

/// A metric highlighted as the primary lever for an optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusMetric {
    pub metric_name: String,
    pub value: f64,
    pub severity: Severity,
    pub hint: String,
}

impl FocusMetric {
    pub fn new(
        metric_name: impl Into<String>,
        value: f64,
        severity: Severity,
        hint: impl Into<String>,
    ) -> Self {
        FocusMetric {
            metric_name: metric_name.into(),
            value,
            severity,
            hint: hint.into(),
        }
    }
}

/// Where in the kernel's code a source marker points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkerLocation {
    /// Instruction address, usually taken from a correlation id
    Address(u64),
    /// High-level source line
    Line { file: String, line: u32 },
}

impl fmt::Display for MarkerLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerLocation::Address(addr) => write!(f, "{:#x}", addr),
            MarkerLocation::Line { file, line } => write!(f, "{}:{}", file, line),
        }
    }
}

/// Which code view a marker belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarkerKind {
    Sass,
    Source,
}

/// Annotation of a code location with a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMarker {
    pub location: MarkerLocation,
    pub kind: MarkerKind,
    pub message: String,
    pub finding_kind: FindingKind,
}

impl SourceMarker {
    /// Marker on a SASS instruction address.
    pub fn sass(address: u64, finding_kind: FindingKind, message: impl Into<String>) -> Self {
        SourceMarker {
            location: MarkerLocation::Address(address),
            kind: MarkerKind::Sass,
            message: message.into(),
            finding_kind,
        }
    }

    /// Marker on a high-level source line.
    pub fn source(
        file: impl Into<String>,
        line: u32,
        finding_kind: FindingKind,
        message: impl Into<String>,
    ) -> Self {
        SourceMarker {
            location: MarkerLocation::Line {
                file: file.into(),
                line,
            },
            kind: MarkerKind::Source,
            message: message.into(),
            finding_kind,
        }
    }
}

/// One reported diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub title: Option<String>,
    pub body: String,
    pub speedup: Option<Speedup>,
    pub focus_metrics: Vec<FocusMetric>,
    pub source_markers: Vec<SourceMarker>,
}

impl Finding {
    pub fn new(kind: FindingKind, body: impl Into<String>) -> Self {
        Finding {
            kind,
            title: None,
            body: body.into(),
            speedup: None,
            focus_metrics: Vec::new(),
            source_markers: Vec::new(),
        }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(FindingKind::Ok, body)
    }

    pub fn optimization(body: impl Into<String>) -> Self {
        Self::new(FindingKind::Optimization, body)
    }

    pub fn warning(body: impl Into<String>) -> Self {
        Self::new(FindingKind::Warning, body)
    }

    pub fn error(body: impl Into<String>) -> Self {
        Self::new(FindingKind::Error, body)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_speedup(mut self, speedup: Speedup) -> Self {
        self.speedup = Some(speedup);
        self
    }

    pub fn with_focus_metric(mut self, focus: FocusMetric) -> Self {
        self.focus_metrics.push(focus);
        self
    }

    pub fn with_source_marker(mut self, marker: SourceMarker) -> Self {
        self.source_markers.push(marker);
        self
    }

    /// Format as a human-readable block.
    pub fn format(&self) -> String {
        let mut output = String::new();

        match &self.title {
            Some(title) => output.push_str(&format!("[{}] {}\n", self.kind, title)),
            None => output.push_str(&format!("[{}]\n", self.kind)),
        }
        output.push_str(&format!("  {}\n", self.body));

        if let Some(speedup) = &self.speedup {
            output.push_str(&format!("  estimated speedup: {}\n", speedup));
        }

        if !self.focus_metrics.is_empty() {
            output.push_str("\nFocus metrics:\n");
            for focus in &self.focus_metrics {
                output.push_str(&format!(
                    "  - {} = {} [{}] {}\n",
                    focus.metric_name, focus.value, focus.severity, focus.hint
                ));
            }
        }

        if !self.source_markers.is_empty() {
            output.push_str("\nSource markers:\n");
            for marker in &self.source_markers {
                output.push_str(&format!("  - {} {}\n", marker.location, marker.message));
            }
        }

        output
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format())
    }
}
