//! Target policies: a list of rules folded under an algorithm and an effect.
//!
//! ```text
//! acc = (algorithm == All)
//! for rule in rules:
//!     result = rule(ctx)
//!     error  -> log, return false      (fail closed, effect NOT applied)
//!     ok     -> acc = All ? acc && result : acc || result
//! return effect == Deny ? !acc : acc
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::attributes::AttributeContext;
use crate::error::{ParseError, RuleError};
use crate::resolver::InjectedValueResolver;
use crate::rule::Rule;

// ============================================================================
// Algorithm
// ============================================================================

/// How rule results are aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Conjunction: every rule must hold.
    #[default]
    All,
    /// Disjunction: at least one rule must hold.
    Any,
}

impl Algorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Any => "any",
        }
    }
}

impl FromStr for Algorithm {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "any" => Ok(Self::Any),
            other => Err(ParseError {
                kind: "algorithm",
                value: other.to_string(),
                expected: "all, any",
            }),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Effect
// ============================================================================

/// Polarity applied once, after aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    /// Pass the aggregate through.
    Permit,
    /// Invert the aggregate.
    #[default]
    Deny,
}

impl Effect {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Permit => "permit",
            Self::Deny => "deny",
        }
    }

    /// Applies the effect to an aggregated rule result.
    pub fn apply(self, aggregate: bool) -> bool {
        match self {
            Self::Permit => aggregate,
            Self::Deny => !aggregate,
        }
    }
}

impl FromStr for Effect {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "permit" => Ok(Self::Permit),
            "deny" => Ok(Self::Deny),
            other => Err(ParseError {
                kind: "effect",
                value: other.to_string(),
                expected: "permit, deny",
            }),
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// TargetSpec
// ============================================================================

/// Declarative description of a target policy.
///
/// ```json
/// { "target": ["user.age >= 18"], "algorithm": "all", "effect": "permit" }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSpec {
    /// Rule strings, evaluated in order.
    pub target: Vec<String>,
    pub algorithm: Algorithm,
    pub effect: Effect,
}

impl TargetSpec {
    pub fn new<I, S>(target: I, algorithm: Algorithm, effect: Effect) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target: target.into_iter().map(Into::into).collect(),
            algorithm,
            effect,
        }
    }
}

// ============================================================================
// TargetPolicy
// ============================================================================

/// Compiled rules plus their aggregation algorithm and effect.
#[derive(Debug, Clone)]
pub struct TargetPolicy {
    rules: Vec<Rule>,
    algorithm: Algorithm,
    effect: Effect,
    log_errors: bool,
}

impl TargetPolicy {
    /// Compiles every rule once. Rules that fail to parse are kept and
    /// reported when evaluated.
    pub fn compile<I, S>(
        rules: I,
        algorithm: Algorithm,
        effect: Effect,
        resolver: &InjectedValueResolver,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_rules(
            rules
                .into_iter()
                .map(|source| Rule::compile(source, resolver))
                .collect(),
            algorithm,
            effect,
        )
    }

    /// Wraps already compiled rules.
    pub fn from_rules(rules: Vec<Rule>, algorithm: Algorithm, effect: Effect) -> Self {
        Self {
            rules,
            algorithm,
            effect,
            log_errors: true,
        }
    }

    /// Sets whether rule failures are logged.
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.log_errors = enabled;
        self
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn effect(&self) -> Effect {
        self.effect
    }

    /// Folds rule results and applies the effect, stopping at the first
    /// rule that errors.
    ///
    /// Rule execution is never skipped because the aggregate is already
    /// decided.
    pub fn outcome(&self, ctx: &AttributeContext) -> Result<bool, RuleError> {
        let all = self.algorithm == Algorithm::All;
        let mut acc = all;

        for rule in &self.rules {
            let result = rule.evaluate(ctx)?;
            acc = if all { acc & result } else { acc | result };
        }

        Ok(self.effect.apply(acc))
    }

    /// Evaluates the target policy, failing closed on any rule error.
    pub fn evaluate(&self, ctx: &AttributeContext) -> bool {
        match self.outcome(ctx) {
            Ok(decision) => decision,
            Err(err) => {
                if self.log_errors {
                    error!(rule = %err.rule(), error = %err, "Access rule failed; denying target policy");
                }
                false
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    fn ctx() -> AttributeContext {
        AttributeContext::default().with_user(json!({"age": 30}))
    }

    fn target(rules: &[&str], algorithm: Algorithm, effect: Effect) -> TargetPolicy {
        TargetPolicy::compile(
            rules.iter().copied(),
            algorithm,
            effect,
            &InjectedValueResolver::new(),
        )
        .with_logging(false)
    }

    #[test_case(Algorithm::All, Effect::Permit, false; "all permit")]
    #[test_case(Algorithm::All, Effect::Deny, true; "all deny")]
    #[test_case(Algorithm::Any, Effect::Permit, true; "any permit")]
    #[test_case(Algorithm::Any, Effect::Deny, false; "any deny")]
    fn mixed_rules(algorithm: Algorithm, effect: Effect, expected: bool) {
        let policy = target(&["user.age > 18", "user.age > 60"], algorithm, effect);
        assert_eq!(policy.evaluate(&ctx()), expected);
    }

    #[test]
    fn test_effect_inversion() {
        let permit = target(&["user.age == 30"], Algorithm::All, Effect::Permit);
        let deny = target(&["user.age == 30"], Algorithm::All, Effect::Deny);
        assert!(permit.evaluate(&ctx()));
        assert!(!deny.evaluate(&ctx()));
    }

    #[test]
    fn test_empty_target() {
        let ctx = ctx();
        assert!(target(&[], Algorithm::All, Effect::Permit).evaluate(&ctx));
        assert!(!target(&[], Algorithm::Any, Effect::Permit).evaluate(&ctx));
        assert!(!target(&[], Algorithm::All, Effect::Deny).evaluate(&ctx));
    }

    #[test_case(Effect::Permit; "permit")]
    #[test_case(Effect::Deny; "deny")]
    fn unparsable_rule_fails_closed(effect: Effect) {
        for algorithm in [Algorithm::All, Algorithm::Any] {
            let policy = target(&["user.age > 18", "garbage"], algorithm, effect);
            assert!(!policy.evaluate(&ctx()));
            assert!(matches!(policy.outcome(&ctx()), Err(RuleError::Compile(_))));
        }
    }

    #[test]
    fn test_runtime_error_fails_closed_even_when_deny_would_invert() {
        let policy = target(&["user.salary > 10"], Algorithm::Any, Effect::Deny);
        assert!(!policy.evaluate(&ctx()));
        assert!(matches!(policy.outcome(&ctx()), Err(RuleError::Runtime { .. })));
    }

    #[test]
    fn test_error_after_decided_aggregate_still_denies() {
        // The first rule already decides the ANY aggregate; the broken second
        // rule must still run and deny.
        let policy = target(&["user.age > 18", "user.salary > 10"], Algorithm::Any, Effect::Permit);
        assert!(!policy.evaluate(&ctx()));
    }

    #[test]
    fn test_algorithm_and_effect_parse() {
        assert_eq!("all".parse::<Algorithm>(), Ok(Algorithm::All));
        assert_eq!("any".parse::<Algorithm>(), Ok(Algorithm::Any));
        assert_eq!("permit".parse::<Effect>(), Ok(Effect::Permit));
        assert_eq!("deny".parse::<Effect>(), Ok(Effect::Deny));

        let err = "some".parse::<Algorithm>().expect_err("unknown algorithm");
        assert_eq!(
            err.to_string(),
            "unknown algorithm 'some', expected one of: all, any"
        );
    }

    #[test]
    fn test_target_spec_defaults() {
        let spec: TargetSpec = serde_json::from_value(json!({"target": ["user.age > 1"]}))
            .expect("deserialize spec");
        assert_eq!(spec.algorithm, Algorithm::All);
        assert_eq!(spec.effect, Effect::Deny);

        let spec: TargetSpec =
            serde_json::from_value(json!({"algorithm": "any", "effect": "permit"}))
                .expect("deserialize spec");
        assert!(spec.target.is_empty());
        assert_eq!(spec.algorithm, Algorithm::Any);
        assert_eq!(spec.effect, Effect::Permit);
    }
}
