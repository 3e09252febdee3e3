//! Entry point binding a resolver and evaluation settings.

use serde::{Deserialize, Serialize};

use crate::policy::{GroupSpec, Policy, PolicySpec};
use crate::resolver::InjectedValueResolver;
use crate::rule::Rule;
use crate::target::{Algorithm, Effect, TargetPolicy, TargetSpec};

/// Evaluation settings, captured by everything a [`Compiler`] builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Log rule, expression and reference failures through `tracing`.
    pub log_errors: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self { log_errors: true }
    }
}

/// Compiles rules and policies against one resolver.
///
/// Injected identifiers are looked up when something is compiled; a compiled
/// rule never sees later changes to the resolver.
#[derive(Debug, Clone, Copy)]
pub struct Compiler<'r> {
    resolver: &'r InjectedValueResolver,
    settings: Settings,
}

impl<'r> Compiler<'r> {
    pub fn new(resolver: &'r InjectedValueResolver) -> Self {
        Self {
            resolver,
            settings: Settings::default(),
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Disables error logging for everything compiled from now on.
    pub fn without_logging(mut self) -> Self {
        self.settings.log_errors = false;
        self
    }

    pub fn resolver(&self) -> &'r InjectedValueResolver {
        self.resolver
    }

    pub fn settings(&self) -> Settings {
        self.settings
    }

    /// Compiles one rule. Failures are deferred to evaluation.
    pub fn compile_rule(&self, source: impl Into<String>) -> Rule {
        Rule::compile(source, self.resolver)
    }

    /// Compiles a rule list into a target policy.
    pub fn compile_target<I, S>(
        &self,
        target: I,
        algorithm: Algorithm,
        effect: Effect,
    ) -> TargetPolicy
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TargetPolicy::compile(target, algorithm, effect, self.resolver)
            .with_logging(self.settings.log_errors)
    }

    /// Single-mode policy.
    pub fn single(&self, spec: &TargetSpec) -> Policy {
        Policy::build_single(spec, self.resolver, self.settings.log_errors)
    }

    /// Group-mode policy.
    pub fn group(&self, spec: &GroupSpec) -> Policy {
        Policy::build_group(spec, self.resolver, self.settings.log_errors)
    }

    /// Policy from either spec shape.
    pub fn policy(&self, spec: &PolicySpec) -> Policy {
        match spec {
            PolicySpec::Group(group) => self.group(group),
            PolicySpec::Single(single) => self.single(single),
        }
    }
}

impl Default for Compiler<'static> {
    /// Binds the process-wide resolver.
    fn default() -> Self {
        Self::new(InjectedValueResolver::global())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttributeContext;
    use serde_json::json;

    #[test]
    fn test_settings_default_logs() {
        assert!(Settings::default().log_errors);
        let parsed: Settings = serde_json::from_value(json!({})).expect("deserialize settings");
        assert_eq!(parsed, Settings::default());
    }

    #[test]
    fn test_compile_target_uses_resolver() {
        let resolver = InjectedValueResolver::new();
        resolver.register("minAge", 21);
        let compiler = Compiler::new(&resolver).without_logging();

        let target =
            compiler.compile_target(["user.age >= minAge"], Algorithm::All, Effect::Permit);
        let ctx = AttributeContext::default().with_user(json!({"age": 21}));
        assert!(target.evaluate(&ctx));

        let ctx = AttributeContext::default().with_user(json!({"age": 20}));
        assert!(!target.evaluate(&ctx));
    }

    #[test]
    fn test_policy_dispatches_on_shape() {
        let resolver = InjectedValueResolver::new();
        let compiler = Compiler::new(&resolver).without_logging();

        let single = compiler.policy(&PolicySpec::Single(TargetSpec::new(
            ["action.kind == 'read'"],
            Algorithm::All,
            Effect::Permit,
        )));
        assert_eq!(single.len(), 1);
        assert!(single.expression().as_str().starts_with("data._"));

        let group: PolicySpec = serde_json::from_value(json!({
            "expression": "data.read",
            "policies": {
                "read": { "target": ["action.kind == 'read'"], "effect": "permit" }
            }
        }))
        .expect("deserialize group");
        let group = compiler.policy(&group);
        assert_eq!(group.expression().as_str(), "data.read");

        let ctx = AttributeContext::default().with_action(json!({"kind": "read"}));
        assert!(single.check(&ctx));
        assert!(group.check(&ctx));
    }

    #[test]
    fn test_default_binds_global_resolver() {
        let compiler = Compiler::default();
        assert!(std::ptr::eq(compiler.resolver(), InjectedValueResolver::global()));
        assert_eq!(compiler.settings(), Settings::default());
    }
}
