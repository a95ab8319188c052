//! Rule registration.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{ConfigurationError, EngineResult};
use crate::request::MetricRequest;
use crate::resolver::AliasTable;
use crate::rule::{Rule, RuleId, RuleInfo};

/// A registered rule together with its static description, captured once at
/// registration time.
#[derive(Clone)]
pub struct RegisteredRule {
    id: RuleId,
    info: RuleInfo,
    parents: Vec<RuleId>,
    requests: Vec<MetricRequest>,
    rule: Arc<dyn Rule>,
}

impl RegisteredRule {
    pub fn id(&self) -> &RuleId {
        &self.id
    }

    pub fn info(&self) -> &RuleInfo {
        &self.info
    }

    /// Declared parents, deduplicated, in declaration order.
    pub fn parents(&self) -> &[RuleId] {
        &self.parents
    }

    pub fn requests(&self) -> &[MetricRequest] {
        &self.requests
    }

    pub fn rule(&self) -> &dyn Rule {
        self.rule.as_ref()
    }
}

impl std::fmt::Debug for RegisteredRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredRule")
            .field("id", &self.id)
            .field("parents", &self.parents)
            .field("requests", &self.requests.len())
            .finish()
    }
}

/// A declared parent that is not registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDependency {
    pub rule: RuleId,
    pub parent: RuleId,
}

/// The set of rules one analysis pass evaluates.
///
/// Registration validates identifiers and metric aliases across all rules;
/// a rejected rule leaves the registry untouched.
#[derive(Debug, Default)]
pub struct RuleRegistry {
    rules: Vec<RegisteredRule>,
    index: HashMap<RuleId, usize>,
    aliases: AliasTable,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, rule: impl Rule + 'static) -> EngineResult<()> {
        self.register_arc(Arc::new(rule))
    }

    pub fn register_arc(&mut self, rule: Arc<dyn Rule>) -> EngineResult<()> {
        let id = rule.identifier();
        if id.as_str().is_empty() {
            return Err(ConfigurationError::EmptyRuleId);
        }
        if self.index.contains_key(&id) {
            return Err(ConfigurationError::DuplicateRule(id));
        }

        let requests = rule.metric_requests();
        self.aliases.bind_all(&requests)?;

        let mut parents: Vec<RuleId> = Vec::new();
        for parent in rule.parent_identifiers() {
            if !parents.contains(&parent) {
                parents.push(parent);
            }
        }

        debug!(rule = %id, parents = parents.len(), metrics = requests.len(), "registered rule");

        self.index.insert(id.clone(), self.rules.len());
        self.rules.push(RegisteredRule {
            id,
            info: rule.info(),
            parents,
            requests,
            rule,
        });
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_rule(mut self, rule: impl Rule + 'static) -> EngineResult<Self> {
        self.register(rule)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&RegisteredRule> {
        self.index.get(id).map(|&i| &self.rules[i])
    }

    /// Rules in registration order.
    pub fn rules(&self) -> &[RegisteredRule] {
        &self.rules
    }

    pub fn ids(&self) -> impl Iterator<Item = &RuleId> {
        self.rules.iter().map(|r| &r.id)
    }

    pub(crate) fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Rules that declared `id` as a parent, in registration order.
    pub fn children_of<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a RuleId> + 'a {
        self.rules
            .iter()
            .filter(move |r| r.parents.iter().any(|p| p.as_str() == id))
            .map(|r| &r.id)
    }

    /// Aliases bound by all registered rules.
    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    /// Declared parents that are not registered.
    pub fn missing_dependencies(&self) -> Vec<MissingDependency> {
        self.rules
            .iter()
            .flat_map(|r| {
                r.parents
                    .iter()
                    .filter(|p| !self.index.contains_key(*p))
                    .map(|p| MissingDependency {
                        rule: r.id.clone(),
                        parent: p.clone(),
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuleResult;
    use crate::rule::{RuleContext, RuleOutput};

    struct Stub {
        id: &'static str,
        parents: Vec<&'static str>,
        requests: Vec<MetricRequest>,
    }

    impl Stub {
        fn new(id: &'static str) -> Self {
            Stub {
                id,
                parents: Vec::new(),
                requests: Vec::new(),
            }
        }
    }

    impl Rule for Stub {
        fn identifier(&self) -> RuleId {
            RuleId::new(self.id)
        }

        fn parent_identifiers(&self) -> Vec<RuleId> {
            self.parents.iter().map(|p| RuleId::new(p)).collect()
        }

        fn metric_requests(&self) -> Vec<MetricRequest> {
            self.requests.clone()
        }

        fn apply(&self, _ctx: &RuleContext<'_>) -> RuleResult<RuleOutput> {
            Ok(RuleOutput::new())
        }
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let mut registry = RuleRegistry::new();
        registry.register(Stub::new("A")).unwrap();
        let err = registry.register(Stub::new("A")).unwrap_err();
        assert_eq!(err, ConfigurationError::DuplicateRule(RuleId::new("A")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_empty_id_rejected() {
        let mut registry = RuleRegistry::new();
        assert_eq!(
            registry.register(Stub::new("")).unwrap_err(),
            ConfigurationError::EmptyRuleId
        );
    }

    #[test]
    fn test_alias_collision_across_rules_is_atomic() {
        let mut registry = RuleRegistry::new();
        let mut a = Stub::new("A");
        a.requests = vec![MetricRequest::new("m1").alias("x")];
        registry.register(a).unwrap();

        let mut b = Stub::new("B");
        b.requests = vec![
            MetricRequest::new("m3").alias("y"),
            MetricRequest::new("m2").alias("x"),
        ];
        let err = registry.register(b).unwrap_err();
        assert!(matches!(err, ConfigurationError::AliasCollision { .. }));
        assert!(!registry.contains("B"));
        assert!(!registry.aliases().contains("y"));
    }

    #[test]
    fn test_alias_shadowing_a_metric_of_another_rule() {
        let mut registry = RuleRegistry::new();
        let mut a = Stub::new("A");
        a.requests = vec![MetricRequest::new("x")];
        registry.register(a).unwrap();

        let mut b = Stub::new("B");
        b.requests = vec![
            MetricRequest::new("m3").alias("y"),
            MetricRequest::new("m2").alias("x"),
        ];
        assert_eq!(
            registry.register(b).unwrap_err(),
            ConfigurationError::AliasShadowsMetric {
                name: "x".to_string(),
                aliased: "m2".to_string(),
            }
        );
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains("B"));
        assert_eq!(registry.aliases().canonical("x"), Some("x"));
        assert!(!registry.aliases().contains("m2"));
        assert!(!registry.aliases().contains("y"));

        // Same clash with the registration order reversed
        let mut registry = RuleRegistry::new();
        let mut a = Stub::new("A");
        a.requests = vec![MetricRequest::new("m1").alias("x")];
        registry.register(a).unwrap();

        let mut b = Stub::new("B");
        b.requests = vec![MetricRequest::new("x")];
        assert_eq!(
            registry.register(b).unwrap_err(),
            ConfigurationError::AliasShadowsMetric {
                name: "x".to_string(),
                aliased: "m1".to_string(),
            }
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.aliases().canonical("x"), Some("m1"));
    }

    #[test]
    fn test_parents_and_missing_dependencies() {
        let mut registry = RuleRegistry::new();
        registry.register(Stub::new("A")).unwrap();
        let mut b = Stub::new("B");
        b.parents = vec!["A", "Ghost", "A"];
        registry.register(b).unwrap();

        let b = registry.get("B").unwrap();
        assert_eq!(b.parents(), &[RuleId::new("A"), RuleId::new("Ghost")]);
        assert_eq!(registry.children_of("A").count(), 1);
        assert_eq!(
            registry.missing_dependencies(),
            vec![MissingDependency {
                rule: RuleId::new("B"),
                parent: RuleId::new("Ghost"),
            }]
        );
    }
}
