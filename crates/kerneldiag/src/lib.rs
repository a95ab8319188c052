//! Rule engine for GPU kernel performance diagnostics.
//!
//! **Version**: 0.1.0-alpha.1
//!
//! Diagnostic rules analyze the performance counters ("metrics") captured for
//! one kernel launch. This crate provides the infrastructure they share:
//!
//! ## Metrics
//! - **MetricStore**: read-only source of raw counter values for one kernel
//! - **MetricRequest**: a rule's declaration of a named metric (alias, required
//!   or optional, fallback value, warning policy)
//! - **MetricResolver**: resolves requests into a **ResolvedMetricSet**,
//!   addressable by name or alias
//!
//! ## Rules
//! - **Rule**: identifier, parents, metric requests and `apply`
//! - **RuleRegistry**: validated set of rules for a pass
//! - **RuleScheduler**: runs rules in dependency order and routes the
//!   **Weights** each rule publishes to its children
//!
//! ## Results
//! - **Finding**: message, severity, focus metrics, source markers and an
//!   estimated **Speedup** (Local or Global)
//! - **DiagnosticSink**: append-only findings in execution order
//!
//! ## Example
//!
//! ```
//! use kerneldiag::{
//!     Finding, MemoryMetricStore, MetricRequest, Rule, RuleContext, RuleId, RuleOutput,
//!     RuleRegistry, RuleResult, RuleScheduler, Speedup,
//! };
//!
//! struct HighIssueRate;
//!
//! impl Rule for HighIssueRate {
//!     fn identifier(&self) -> RuleId {
//!         RuleId::new("HighIssueRate")
//!     }
//!
//!     fn metric_requests(&self) -> Vec<MetricRequest> {
//!         vec![MetricRequest::new("smsp__issue_active.avg").alias("issue_active")]
//!     }
//!
//!     fn apply(&self, ctx: &RuleContext<'_>) -> RuleResult<RuleOutput> {
//!         let issue_active = ctx.metrics().f64("issue_active")?;
//!         let mut output = RuleOutput::new();
//!         if issue_active < 0.6 {
//!             output.push(
//!                 Finding::optimization("Issue slots are underused.")
//!                     .with_speedup(Speedup::local(1.0 - issue_active)),
//!             );
//!         }
//!         Ok(output)
//!     }
//! }
//!
//! let mut registry = RuleRegistry::new();
//! registry.register(HighIssueRate).unwrap();
//!
//! let store = MemoryMetricStore::new().with("smsp__issue_active.avg", 0.25);
//! let report = RuleScheduler::new().run(&registry, &store).unwrap();
//! assert_eq!(report.sink.len(), 1);
//! ```

pub mod config;
pub mod error;
pub mod finding;
#[cfg(feature = "structured-logging")]
pub mod logging;
pub mod metric;
pub mod registry;
pub mod request;
pub mod resolver;
pub mod rule;
pub mod scheduler;
pub mod sink;
pub mod speedup;
pub mod weights;

pub use config::{EngineConfig, ExecutionMode, LogFormat, LogLevel, LoggingConfig};
pub use error::{ConfigurationError, EngineResult, MetricError, RuleError, RuleResult};
pub use finding::{
    Finding, FindingKind, FocusMetric, MarkerKind, MarkerLocation, Severity, SourceMarker,
};
pub use metric::{Instances, MemoryMetricStore, MetricStore, MetricValue, Value, ValueKind};
pub use registry::{MissingDependency, RegisteredRule, RuleRegistry};
pub use request::{Importance, MetricRequest};
pub use resolver::{
    AliasTable, MetricResolver, Resolution, ResolvedEntry, ResolvedMetric, ResolvedMetricSet,
};
pub use rule::{Rule, RuleContext, RuleId, RuleInfo, RuleOutput};
pub use scheduler::{AnalysisReport, ExecutionPlan, RuleOutcome, RuleScheduler, RuleStatus};
pub use sink::{DiagnosticSink, SinkEntry};
pub use speedup::{Combinator, Speedup, SpeedupType};
pub use weights::{KnownWeights, ParentWeights, Weight, Weights};
