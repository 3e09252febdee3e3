//! Composite policies: named target policies combined by a policy expression.
//!
//! A [`Policy`] is built in one of three ways:
//!
//! - **group**: caller-authored expression over caller-named target policies
//! - **single**: one target policy under a generated name, with the
//!   expression `data.<name>`
//! - **merge**: two policies joined with `&&` or `||`, see [`Policy::and`]
//!   and [`Policy::or`]

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{BitAnd, BitOr};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use crate::attributes::AttributeContext;
use crate::expression::{Connective, PolicyExpression};
use crate::resolver::InjectedValueResolver;
use crate::target::{TargetPolicy, TargetSpec};

// ============================================================================
// Specs
// ============================================================================

/// Group-mode input: an expression over named target policies.
///
/// ```json
/// {
///   "expression": "data.adult && data.owner",
///   "policies": {
///     "adult": { "target": ["user.age >= 18"], "effect": "permit" },
///     "owner": { "target": ["user.id == resource.owner"], "effect": "permit" }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub expression: String,
    pub policies: BTreeMap<String, TargetSpec>,
}

/// Either construction shape. Group mode is selected when both `expression`
/// and `policies` are present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PolicySpec {
    Group(GroupSpec),
    Single(TargetSpec),
}

impl From<GroupSpec> for PolicySpec {
    fn from(spec: GroupSpec) -> Self {
        Self::Group(spec)
    }
}

impl From<TargetSpec> for PolicySpec {
    fn from(spec: TargetSpec) -> Self {
        Self::Single(spec)
    }
}

// ============================================================================
// Decision
// ============================================================================

/// The result of checking a request against a [`Policy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether access is allowed.
    pub allowed: bool,
    /// Result of every target policy, by name.
    pub results: BTreeMap<String, bool>,
    /// Human-readable explanation of the outcome.
    pub reason: String,
}

// ============================================================================
// Policy
// ============================================================================

/// Named target policies plus the expression that combines their results.
///
/// Immutable once built. Target policies are shared between merged policies.
#[derive(Debug, Clone)]
pub struct Policy {
    expression: PolicyExpression,
    policies: BTreeMap<String, Arc<TargetPolicy>>,
    log_errors: bool,
}

impl Policy {
    /// Group mode, compiling every target policy against `resolver`.
    ///
    /// The expression is stored as written; malformed expressions deny at
    /// check time.
    pub fn group(spec: &GroupSpec, resolver: &InjectedValueResolver) -> Self {
        Self::build_group(spec, resolver, true)
    }

    /// Single mode: one target policy under a fresh unique name.
    pub fn single(spec: &TargetSpec, resolver: &InjectedValueResolver) -> Self {
        Self::build_single(spec, resolver, true)
    }

    /// Builds from either spec shape.
    pub fn from_spec(spec: &PolicySpec, resolver: &InjectedValueResolver) -> Self {
        match spec {
            PolicySpec::Group(group) => Self::group(group, resolver),
            PolicySpec::Single(single) => Self::single(single, resolver),
        }
    }

    pub(crate) fn build_group(
        spec: &GroupSpec,
        resolver: &InjectedValueResolver,
        log_errors: bool,
    ) -> Self {
        let policies = spec
            .policies
            .iter()
            .map(|(name, target)| {
                let compiled = compile_target(target, resolver, log_errors);
                (name.clone(), Arc::new(compiled))
            })
            .collect();

        Self {
            expression: PolicyExpression::parse(spec.expression.as_str()),
            policies,
            log_errors,
        }
    }

    pub(crate) fn build_single(
        spec: &TargetSpec,
        resolver: &InjectedValueResolver,
        log_errors: bool,
    ) -> Self {
        let name = unique_name();
        let target = compile_target(spec, resolver, log_errors);

        Self {
            expression: PolicyExpression::reference(&name),
            policies: BTreeMap::from([(name, Arc::new(target))]),
            log_errors,
        }
    }

    /// Merge mode: `origin <connective> source`.
    ///
    /// The expression is the textual concatenation of both expressions. The
    /// policy set is the union of both sets; on a name collision the entry
    /// from `source` wins. The logging toggle is taken from `origin`.
    pub fn merge(origin: &Policy, source: &Policy, connective: Connective) -> Self {
        let mut policies = origin.policies.clone();
        policies.extend(
            source
                .policies
                .iter()
                .map(|(name, target)| (name.clone(), Arc::clone(target))),
        );

        let expression = PolicyExpression::concat(&origin.expression, connective, &source.expression);

        Self {
            expression,
            policies,
            log_errors: origin.log_errors,
        }
    }

    /// `self && other`, as a new policy.
    pub fn and(&self, other: &Policy) -> Self {
        Self::merge(self, other, Connective::And)
    }

    /// `self || other`, as a new policy.
    pub fn or(&self, other: &Policy) -> Self {
        Self::merge(self, other, Connective::Or)
    }

    /// Sets whether expression problems are logged. Target policies keep the
    /// toggle they were compiled with.
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.log_errors = enabled;
        self
    }

    pub fn expression(&self) -> &PolicyExpression {
        &self.expression
    }

    /// Names of the target policies, in sorted order.
    pub fn policy_names(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    pub fn target(&self, name: &str) -> Option<&TargetPolicy> {
        self.policies.get(name).map(Arc::as_ref)
    }

    /// Number of target policies.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Evaluates the policy. Never fails; any error denies.
    pub fn check(&self, ctx: &AttributeContext) -> bool {
        self.decide(ctx).allowed
    }

    /// Evaluates every target policy, then folds the named results through
    /// the expression.
    pub fn decide(&self, ctx: &AttributeContext) -> Decision {
        let results: BTreeMap<String, bool> = self
            .policies
            .iter()
            .map(|(name, target)| (name.clone(), target.evaluate(ctx)))
            .collect();

        if self.log_errors {
            for name in self.expression.references() {
                if !results.contains_key(name) {
                    warn!(
                        policy = name,
                        expression = %self.expression,
                        "Policy expression references an unknown target policy; treating it as false"
                    );
                }
            }
        }

        match self.expression.evaluate(&results) {
            Ok(allowed) => {
                let granted = results.values().filter(|r| **r).count();
                Decision {
                    allowed,
                    reason: format!(
                        "Expression '{}' evaluated to {allowed} ({granted} of {} target policies true)",
                        self.expression,
                        results.len()
                    ),
                    results,
                }
            }
            Err(err) => {
                if self.log_errors {
                    error!(expression = %self.expression, error = %err, "Malformed policy expression; denying");
                }
                Decision {
                    allowed: false,
                    reason: format!("Malformed policy expression '{}': {err}", self.expression),
                    results,
                }
            }
        }
    }
}

impl BitAnd for &Policy {
    type Output = Policy;

    fn bitand(self, rhs: Self) -> Policy {
        self.and(rhs)
    }
}

impl BitOr for &Policy {
    type Output = Policy;

    fn bitor(self, rhs: Self) -> Policy {
        self.or(rhs)
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression)
    }
}

fn compile_target(
    spec: &TargetSpec,
    resolver: &InjectedValueResolver,
    log_errors: bool,
) -> TargetPolicy {
    TargetPolicy::compile(
        spec.target.iter().cloned(),
        spec.algorithm,
        spec.effect,
        resolver,
    )
    .with_logging(log_errors)
}

/// A fresh name that is also a valid expression identifier.
fn unique_name() -> String {
    format!("_{}", Uuid::new_v4().simple())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{Algorithm, Effect};
    use serde_json::json;

    fn permit(rules: &[&str]) -> TargetSpec {
        TargetSpec::new(rules.iter().copied(), Algorithm::All, Effect::Permit)
    }

    fn single(rules: &[&str]) -> Policy {
        Policy::build_single(&permit(rules), &InjectedValueResolver::new(), false)
    }

    fn ctx(age: i64) -> AttributeContext {
        AttributeContext::default()
            .with_user(json!({"id": 7, "age": age}))
            .with_resource(json!({"owner": 7}))
    }

    #[test]
    fn test_single_mode_expression() {
        let policy = single(&["user.age >= 18"]);
        let name = policy.policy_names().next().expect("one target policy").to_string();

        assert!(name.starts_with('_'));
        assert_eq!(policy.len(), 1);
        assert_eq!(policy.expression().as_str(), format!("data.{name}"));
        assert!(policy.check(&ctx(30)));
        assert!(!policy.check(&ctx(10)));
    }

    #[test]
    fn test_single_mode_names_are_unique() {
        let a = single(&["user.age > 1"]);
        let b = single(&["user.age > 1"]);
        assert_ne!(a.expression(), b.expression());
        assert_eq!(a.and(&b).len(), 2);
    }

    #[test]
    fn test_group_mode() {
        let spec = GroupSpec {
            expression: "data.adult && data.owner".to_string(),
            policies: BTreeMap::from([
                ("adult".to_string(), permit(&["user.age >= 18"])),
                ("owner".to_string(), permit(&["user.id == resource.owner"])),
            ]),
        };
        let policy = Policy::build_group(&spec, &InjectedValueResolver::new(), false);

        assert_eq!(policy.policy_names().collect::<Vec<_>>(), vec!["adult", "owner"]);
        assert!(policy.check(&ctx(30)));
        assert!(!policy.check(&ctx(10)));
    }

    #[test]
    fn test_merge_expression_mirrors_call_order() {
        let a = single(&["user.age > 1"]);
        let b = single(&["user.age > 2"]);
        let c = single(&["user.age > 3"]);

        let merged = a.and(&b).or(&c);
        assert_eq!(
            merged.expression().as_str(),
            format!("{}&&{}||{}", a.expression(), b.expression(), c.expression())
        );
        assert_eq!(merged.len(), 3);

        let via_ops = &(&a & &b) | &c;
        assert_eq!(via_ops.expression().as_str(), merged.expression().as_str());
    }

    #[test]
    fn test_merge_does_not_mutate_operands() {
        let a = single(&["user.age > 1"]);
        let b = single(&["user.age > 2"]);
        let before = a.expression().clone();

        let _ = a.and(&b);
        assert_eq!(a.expression(), &before);
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn test_merge_source_wins_on_collision() {
        let resolver = InjectedValueResolver::new();
        let origin = Policy::build_group(
            &GroupSpec {
                expression: "data.p".to_string(),
                policies: BTreeMap::from([("p".to_string(), permit(&["user.age > 100"]))]),
            },
            &resolver,
            false,
        );
        let source = Policy::build_group(
            &GroupSpec {
                expression: "data.p".to_string(),
                policies: BTreeMap::from([("p".to_string(), permit(&["user.age > 1"]))]),
            },
            &resolver,
            false,
        );

        let merged = origin.and(&source);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.expression().as_str(), "data.p&&data.p");
        // Both references now point at the source's rule.
        assert!(merged.check(&ctx(30)));
    }

    #[test]
    fn test_unknown_reference_is_false() {
        let spec = GroupSpec {
            expression: "data.missing || data.adult".to_string(),
            policies: BTreeMap::from([("adult".to_string(), permit(&["user.age >= 18"]))]),
        };
        let policy = Policy::build_group(&spec, &InjectedValueResolver::new(), false);
        assert!(policy.check(&ctx(30)));

        let spec = GroupSpec {
            expression: "data.missing".to_string(),
            ..spec
        };
        let policy = Policy::build_group(&spec, &InjectedValueResolver::new(), false);
        assert!(!policy.check(&ctx(30)));
    }

    #[test]
    fn test_malformed_expression_denies() {
        let spec = GroupSpec {
            expression: "data.adult &&".to_string(),
            policies: BTreeMap::from([("adult".to_string(), permit(&["user.age >= 18"]))]),
        };
        let policy = Policy::build_group(&spec, &InjectedValueResolver::new(), false);

        let decision = policy.decide(&ctx(30));
        assert!(!decision.allowed);
        assert_eq!(decision.results.get("adult"), Some(&true));
        assert!(decision.reason.starts_with("Malformed policy expression"));
    }

    #[test]
    fn test_decide_reports_results() {
        let spec = GroupSpec {
            expression: "data.adult || data.senior".to_string(),
            policies: BTreeMap::from([
                ("adult".to_string(), permit(&["user.age >= 18"])),
                ("senior".to_string(), permit(&["user.age >= 65"])),
            ]),
        };
        let policy = Policy::build_group(&spec, &InjectedValueResolver::new(), false);

        let decision = policy.decide(&ctx(30));
        assert!(decision.allowed);
        assert_eq!(
            decision.results,
            BTreeMap::from([("adult".to_string(), true), ("senior".to_string(), false)])
        );
        assert_eq!(
            decision.reason,
            "Expression 'data.adult || data.senior' evaluated to true (1 of 2 target policies true)"
        );
    }

    #[test]
    fn test_policy_spec_shape_selection() {
        let group: PolicySpec = serde_json::from_value(json!({
            "expression": "data.a",
            "policies": { "a": { "target": ["user.age > 1"] } }
        }))
        .expect("deserialize group");
        assert!(matches!(group, PolicySpec::Group(_)));

        let single: PolicySpec = serde_json::from_value(json!({
            "target": ["user.age > 1"],
            "algorithm": "any",
            "effect": "permit"
        }))
        .expect("deserialize single");
        assert!(matches!(single, PolicySpec::Single(ref t) if t.algorithm == Algorithm::Any));
    }
}
