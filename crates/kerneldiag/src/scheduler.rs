//! Dependency-ordered execution of registered rules.
//!
//! The scheduler sorts the rule DAG into dependency levels (Kahn's
//! algorithm, ties broken by registration order). Rules of one level have no
//! ancestor/descendant relationship and may run concurrently; the flattened
//! levels are the canonical execution order, so findings come out in the
//! same order whichever execution mode is used.

use std::sync::Arc;

use tracing::{debug, debug_span, info, info_span, warn, Span};

use crate::config::{EngineConfig, ExecutionMode};
use crate::error::{ConfigurationError, EngineResult, RuleError};
use crate::finding::{Finding, FindingKind};
use crate::metric::MetricStore;
use crate::registry::{MissingDependency, RegisteredRule, RuleRegistry};
use crate::resolver::MetricResolver;
use crate::rule::{RuleContext, RuleId};
use crate::sink::DiagnosticSink;
use crate::weights::{ParentWeights, Weights};

/// Topological schedule of a registry.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    ids: Vec<RuleId>,
    /// Registry positions grouped by dependency level
    levels: Vec<Vec<usize>>,
    /// Registered parents of each rule, in declaration order
    parents: Vec<Vec<usize>>,
    /// Number of registered children of each rule
    consumers: Vec<usize>,
    missing: Vec<MissingDependency>,
}

impl ExecutionPlan {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Rules in execution order.
    pub fn execution_order(&self) -> Vec<RuleId> {
        self.levels
            .iter()
            .flatten()
            .map(|&i| self.ids[i].clone())
            .collect()
    }

    /// Groups of rules that can be evaluated concurrently.
    pub fn levels(&self) -> Vec<Vec<RuleId>> {
        self.levels
            .iter()
            .map(|level| level.iter().map(|&i| self.ids[i].clone()).collect())
            .collect()
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn missing_dependencies(&self) -> &[MissingDependency] {
        &self.missing
    }
}

/// What happened to one rule during a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleStatus {
    Applied {
        findings: usize,
        published_weights: bool,
    },
    /// Evaluation failed; the rule produced no weights.
    Aborted(RuleError),
    /// Disabled by configuration.
    Skipped,
}

impl RuleStatus {
    pub fn is_applied(&self) -> bool {
        matches!(self, RuleStatus::Applied { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, RuleStatus::Aborted(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub rule: RuleId,
    pub status: RuleStatus,
}

/// Result of one analysis pass.
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub sink: DiagnosticSink,
    /// One entry per registered rule, in execution order
    pub outcomes: Vec<RuleOutcome>,
    pub missing_dependencies: Vec<MissingDependency>,
}

impl AnalysisReport {
    pub fn status(&self, rule: &str) -> Option<&RuleStatus> {
        self.outcomes
            .iter()
            .find(|o| o.rule.as_str() == rule)
            .map(|o| &o.status)
    }

    pub fn applied(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_applied()).count()
    }

    pub fn aborted(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_aborted()).count()
    }
}

/// Result of evaluating one rule, before it is committed to the pass.
struct Evaluation {
    findings: Vec<Finding>,
    weights: Option<Weights>,
    status: RuleStatus,
}

impl Evaluation {
    fn skipped() -> Self {
        Evaluation {
            findings: Vec::new(),
            weights: None,
            status: RuleStatus::Skipped,
        }
    }
}

/// Mutable state of one pass.
struct PassState {
    published: Vec<Option<Arc<Weights>>>,
    pending_consumers: Vec<usize>,
    sink: DiagnosticSink,
    outcomes: Vec<RuleOutcome>,
}

impl PassState {
    fn new(plan: &ExecutionPlan) -> Self {
        PassState {
            published: vec![None; plan.len()],
            pending_consumers: plan.consumers.clone(),
            sink: DiagnosticSink::new(),
            outcomes: Vec::with_capacity(plan.len()),
        }
    }

    /// Collect the weights sent to `idx` by its parents. A parent's weights
    /// are dropped once its last child has collected them.
    fn inbox(&mut self, plan: &ExecutionPlan, idx: usize) -> ParentWeights {
        let mut inbox = ParentWeights::new();
        for &parent in &plan.parents[idx] {
            if let Some(weights) = &self.published[parent] {
                inbox.push(plan.ids[parent].clone(), Arc::clone(weights));
            }
            self.pending_consumers[parent] -= 1;
            if self.pending_consumers[parent] == 0 {
                self.published[parent] = None;
            }
        }
        inbox
    }

    fn commit(&mut self, rule: &RegisteredRule, idx: usize, evaluation: Evaluation) {
        self.sink.extend(rule.id(), evaluation.findings);
        if let Some(weights) = evaluation.weights {
            if self.pending_consumers[idx] > 0 {
                self.published[idx] = Some(Arc::new(weights));
            }
        }
        self.outcomes.push(RuleOutcome {
            rule: rule.id().clone(),
            status: evaluation.status,
        });
    }

    fn into_report(self, plan: &ExecutionPlan) -> AnalysisReport {
        AnalysisReport {
            sink: self.sink,
            outcomes: self.outcomes,
            missing_dependencies: plan.missing.clone(),
        }
    }
}

/// Executes the rules of a registry against one metric store.
#[derive(Debug, Clone, Default)]
pub struct RuleScheduler {
    config: EngineConfig,
}

impl RuleScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: EngineConfig) -> Self {
        RuleScheduler { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Order the registry's rules.
    ///
    /// Fails with [`ConfigurationError::DependencyCycle`] if the parent
    /// relation has a cycle; the error names every rule that could not be
    /// ordered. Parents that are not registered are ignored for ordering and
    /// reported as missing dependencies.
    pub fn plan(registry: &RuleRegistry) -> EngineResult<ExecutionPlan> {
        let rules = registry.rules();
        let n = rules.len();

        let mut parents: Vec<Vec<usize>> = Vec::with_capacity(n);
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut in_degree = vec![0usize; n];

        for (idx, rule) in rules.iter().enumerate() {
            let registered: Vec<usize> = rule
                .parents()
                .iter()
                .filter_map(|p| registry.position(p.as_str()))
                .collect();
            for &parent in &registered {
                children[parent].push(idx);
            }
            in_degree[idx] = registered.len();
            parents.push(registered);
        }

        let missing = registry.missing_dependencies();
        for dep in &missing {
            warn!(rule = %dep.rule, parent = %dep.parent, "parent rule is not registered");
        }

        let mut levels: Vec<Vec<usize>> = Vec::new();
        let mut current: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut ordered = 0;

        while !current.is_empty() {
            ordered += current.len();
            let mut next = Vec::new();
            for &idx in &current {
                for &child in &children[idx] {
                    in_degree[child] -= 1;
                    if in_degree[child] == 0 {
                        next.push(child);
                    }
                }
            }
            next.sort_unstable();
            levels.push(current);
            current = next;
        }

        if ordered != n {
            let blocked = (0..n)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| rules[i].id().clone())
                .collect();
            return Err(ConfigurationError::DependencyCycle { rules: blocked });
        }

        Ok(ExecutionPlan {
            ids: rules.iter().map(|r| r.id().clone()).collect(),
            levels,
            consumers: children.iter().map(Vec::len).collect(),
            parents,
            missing,
        })
    }

    /// Run one analysis pass.
    ///
    /// Configuration errors are returned before any rule runs. Errors of a
    /// single rule are recorded in the report and do not stop the pass.
    pub fn run(
        &self,
        registry: &RuleRegistry,
        store: &dyn MetricStore,
    ) -> EngineResult<AnalysisReport> {
        let plan = Self::plan(registry)?;
        Ok(self.execute(&plan, registry, store))
    }

    fn execute(
        &self,
        plan: &ExecutionPlan,
        registry: &RuleRegistry,
        store: &dyn MetricStore,
    ) -> AnalysisReport {
        let span = info_span!("analysis_pass", rules = plan.len(), levels = plan.num_levels());
        let _enter = span.enter();

        let rules = registry.rules();
        let parallel = self.parallel_enabled();
        let mut state = PassState::new(plan);

        for level in &plan.levels {
            if parallel && level.len() > 1 {
                let inboxes: Vec<ParentWeights> =
                    level.iter().map(|&idx| state.inbox(plan, idx)).collect();
                let evaluations = self.evaluate_level(rules, level, inboxes, store, &span);
                for (&idx, evaluation) in level.iter().zip(evaluations) {
                    state.commit(&rules[idx], idx, evaluation);
                }
            } else {
                for &idx in level {
                    let inbox = state.inbox(plan, idx);
                    let evaluation = self.evaluate(&rules[idx], inbox, store, &span);
                    state.commit(&rules[idx], idx, evaluation);
                }
            }
        }

        let report = state.into_report(plan);
        info!(
            findings = report.sink.len(),
            errors = report.sink.count(FindingKind::Error),
            aborted = report.aborted(),
            "analysis pass finished"
        );
        report
    }

    /// Whether `run` evaluates the rules of a level on the rayon pool.
    /// Parallel mode needs the `parallel` feature; without it passes run
    /// sequentially.
    pub fn runs_in_parallel(&self) -> bool {
        self.config.execution == ExecutionMode::Parallel && cfg!(feature = "parallel")
    }

    fn parallel_enabled(&self) -> bool {
        let parallel = self.runs_in_parallel();
        if !parallel && self.config.execution == ExecutionMode::Parallel {
            warn!("parallel execution requires the `parallel` feature, running sequentially");
        }
        parallel
    }

    #[cfg(feature = "parallel")]
    fn evaluate_level(
        &self,
        rules: &[RegisteredRule],
        level: &[usize],
        inboxes: Vec<ParentWeights>,
        store: &dyn MetricStore,
        pass: &Span,
    ) -> Vec<Evaluation> {
        use rayon::prelude::*;

        level
            .par_iter()
            .zip(inboxes.into_par_iter())
            .map(|(&idx, inbox)| self.evaluate(&rules[idx], inbox, store, pass))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn evaluate_level(
        &self,
        rules: &[RegisteredRule],
        level: &[usize],
        inboxes: Vec<ParentWeights>,
        store: &dyn MetricStore,
        pass: &Span,
    ) -> Vec<Evaluation> {
        level
            .iter()
            .zip(inboxes)
            .map(|(&idx, inbox)| self.evaluate(&rules[idx], inbox, store, pass))
            .collect()
    }

    fn evaluate(
        &self,
        rule: &RegisteredRule,
        parents: ParentWeights,
        store: &dyn MetricStore,
        pass: &Span,
    ) -> Evaluation {
        let id = rule.id();
        let span = debug_span!(parent: pass, "rule", rule = %id);
        let _enter = span.enter();

        if self.config.is_disabled(id.as_str()) {
            debug!("rule disabled by configuration");
            return Evaluation::skipped();
        }

        debug!(parents = parents.len(), "evaluating rule");
        let resolver =
            MetricResolver::new(store).with_optional_warnings(self.config.warn_on_missing_optional);

        let result = resolver.resolve(rule.requests()).and_then(|resolution| {
            let ctx = RuleContext::new(
                id.clone(),
                resolution.metrics,
                parents,
                resolver,
                resolution.warning,
            );
            let output = rule.rule().apply(&ctx)?;
            let mut findings = ctx.take_notices();
            findings.extend(output.findings);
            Ok((findings, output.child_weights))
        });

        match result {
            Ok((findings, weights)) => {
                debug!(findings = findings.len(), weights = weights.is_some(), "rule applied");
                Evaluation {
                    status: RuleStatus::Applied {
                        findings: findings.len(),
                        published_weights: weights.is_some(),
                    },
                    findings,
                    weights,
                }
            }
            Err(err) => {
                warn!(error = %err, "rule aborted");
                let findings = if self.config.report_error_findings {
                    vec![aborted_finding(&err)]
                } else {
                    Vec::new()
                };
                Evaluation {
                    findings,
                    weights: None,
                    status: RuleStatus::Aborted(err),
                }
            }
        }
    }
}

fn aborted_finding(err: &RuleError) -> Finding {
    let body = match err {
        RuleError::RequiredMetricMissing { names } => format!(
            "The required metric(s) {} could not be found. Collecting them is necessary \
             for this rule to run.",
            names.join(", ")
        ),
        other => other.to_string(),
    };
    Finding::error(body).with_title("Rule Execution Aborted")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuleResult;
    use crate::metric::MemoryMetricStore;
    use crate::request::MetricRequest;
    use crate::rule::{Rule, RuleOutput};

    struct Node {
        id: &'static str,
        parents: Vec<&'static str>,
    }

    impl Node {
        fn new(id: &'static str, parents: &[&'static str]) -> Self {
            Node {
                id,
                parents: parents.to_vec(),
            }
        }
    }

    impl Rule for Node {
        fn identifier(&self) -> RuleId {
            RuleId::new(self.id)
        }

        fn parent_identifiers(&self) -> Vec<RuleId> {
            self.parents.iter().map(|p| RuleId::new(p)).collect()
        }

        fn metric_requests(&self) -> Vec<MetricRequest> {
            Vec::new()
        }

        fn apply(&self, ctx: &RuleContext<'_>) -> RuleResult<RuleOutput> {
            let seen = ctx.parent_weights().len();
            Ok(RuleOutput::new()
                .with_finding(Finding::ok(format!("{} saw {} parents", self.id, seen)))
                .with_child_weights(Weights::new().with(self.id, 0.5)))
        }
    }

    fn registry(nodes: Vec<Node>) -> RuleRegistry {
        let mut registry = RuleRegistry::new();
        for node in nodes {
            registry.register(node).unwrap();
        }
        registry
    }

    fn ids(ids: &[&str]) -> Vec<RuleId> {
        ids.iter().map(|i| RuleId::new(i)).collect()
    }

    #[test]
    fn test_plan_respects_parents_registered_later() {
        let registry = registry(vec![
            Node::new("C", &["B"]),
            Node::new("B", &["A"]),
            Node::new("A", &[]),
        ]);
        let plan = RuleScheduler::plan(&registry).unwrap();
        assert_eq!(plan.execution_order(), ids(&["A", "B", "C"]));
        assert_eq!(plan.num_levels(), 3);
    }

    #[test]
    fn test_plan_levels_group_independent_rules() {
        let registry = registry(vec![
            Node::new("Root", &[]),
            Node::new("Left", &["Root"]),
            Node::new("Right", &["Root"]),
            Node::new("Join", &["Right", "Left"]),
            Node::new("Lonely", &[]),
        ]);
        let plan = RuleScheduler::plan(&registry).unwrap();
        assert_eq!(
            plan.levels(),
            vec![ids(&["Root", "Lonely"]), ids(&["Left", "Right"]), ids(&["Join"])]
        );
    }

    #[test]
    fn test_cycle_is_rejected() {
        let registry = registry(vec![
            Node::new("A", &["B"]),
            Node::new("B", &["A"]),
            Node::new("Free", &[]),
        ]);
        let err = RuleScheduler::plan(&registry).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::DependencyCycle {
                rules: ids(&["A", "B"])
            }
        );
    }

    #[test]
    fn test_self_parent_is_a_cycle() {
        let registry = registry(vec![Node::new("A", &["A"])]);
        assert!(matches!(
            RuleScheduler::plan(&registry),
            Err(ConfigurationError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn test_missing_parent_is_reported_not_fatal() {
        let registry = registry(vec![Node::new("A", &["Ghost"])]);
        let report = RuleScheduler::new()
            .run(&registry, &MemoryMetricStore::new())
            .unwrap();
        assert_eq!(report.missing_dependencies.len(), 1);
        assert_eq!(report.applied(), 1);
        assert_eq!(
            report.sink.findings_for("A").next().map(|f| f.body.as_str()),
            Some("A saw 0 parents")
        );
    }

    #[test]
    fn test_weights_reach_every_child() {
        let registry = registry(vec![
            Node::new("Root", &[]),
            Node::new("Left", &["Root"]),
            Node::new("Right", &["Root"]),
            Node::new("Join", &["Left", "Right", "Root"]),
        ]);
        let report = RuleScheduler::new()
            .run(&registry, &MemoryMetricStore::new())
            .unwrap();
        let bodies: Vec<_> = report.sink.iter().map(|e| e.finding.body.clone()).collect();
        assert_eq!(
            bodies,
            vec![
                "Root saw 0 parents",
                "Left saw 1 parents",
                "Right saw 1 parents",
                "Join saw 3 parents",
            ]
        );
    }

    #[test]
    fn test_disabled_rule_is_skipped() {
        let registry = registry(vec![Node::new("A", &[]), Node::new("B", &["A"])]);
        let scheduler = RuleScheduler::with_config(EngineConfig::default().disable_rule("A"));
        let report = scheduler.run(&registry, &MemoryMetricStore::new()).unwrap();

        assert_eq!(report.status("A"), Some(&RuleStatus::Skipped));
        assert_eq!(
            report.sink.findings_for("B").next().map(|f| f.body.as_str()),
            Some("B saw 0 parents")
        );
    }
}
