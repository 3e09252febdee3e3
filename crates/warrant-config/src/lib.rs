//! Configuration management for Warrant
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (WARRANT_* prefix, `__` between sections)
//! 2. warrant.local.toml (gitignored, local overrides)
//! 3. warrant.toml (git-tracked, project config)
//! 4. ~/.config/warrant/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)
//!
//! ```toml
//! [evaluation]
//! log_errors = true
//!
//! [injected]
//! max_age = 65
//!
//! [policies.adults]
//! target = ["user.age >= 18", "user.age < max_age"]
//! effect = "permit"
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use warrant_abac::{
    Bag, Compiler, InjectedValueResolver, Policy, PolicyExpression, PolicySpec, Rule, Settings,
    TargetSpec,
};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main Warrant configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarrantConfig {
    /// Evaluation settings applied to every compiled policy.
    pub evaluation: Settings,
    /// Values registered with the resolver before policies are compiled.
    pub injected: BTreeMap<String, Value>,
    /// Named policies, in either group or single shape.
    pub policies: BTreeMap<String, PolicySpec>,
}

impl WarrantConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Read a single TOML file, without merging any other source
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check injected names and policy text
    ///
    /// Injected names must be identifiers that rule text can reference, and
    /// must not shadow an attribute bag. Every rule must parse and every
    /// group expression must parse and reference only its own policies.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for name in self.injected.keys() {
            validate_injected_name(name)?;
        }

        let resolver = InjectedValueResolver::new();
        for (policy, spec) in &self.policies {
            match spec {
                PolicySpec::Single(target) => validate_target(policy, target, &resolver)?,
                PolicySpec::Group(group) => {
                    let expression = PolicyExpression::parse(group.expression.as_str());
                    if let Some(err) = expression.error() {
                        return Err(invalid(policy, format!("expression: {err}")));
                    }
                    if let Some(unknown) = expression
                        .references()
                        .into_iter()
                        .find(|name| !group.policies.contains_key(*name))
                    {
                        return Err(invalid(
                            policy,
                            format!("expression references unknown target policy '{unknown}'"),
                        ));
                    }
                    for (name, target) in &group.policies {
                        validate_target(&format!("{policy}.{name}"), target, &resolver)?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Register every configured injected value with `resolver`
    pub fn register_injected(&self, resolver: &InjectedValueResolver) {
        for (name, value) in &self.injected {
            resolver.register(name.as_str(), value.clone());
        }
    }

    /// Register injected values, then compile every configured policy
    pub fn compile_policies(&self, resolver: &InjectedValueResolver) -> BTreeMap<String, Policy> {
        self.register_injected(resolver);
        let compiler = Compiler::new(resolver).with_settings(self.evaluation);

        self.policies
            .iter()
            .map(|(name, spec)| (name.clone(), compiler.policy(spec)))
            .collect()
    }
}

fn validate_injected_name(name: &str) -> Result<(), ConfigError> {
    let reject = |reason| ConfigError::InvalidInjectedName {
        name: name.to_string(),
        reason,
    };

    let mut chars = name.chars();
    match chars.next() {
        None => return Err(reject("name is empty")),
        Some(c) if !(c.is_ascii_alphabetic() || c == '_' || c == '$') => {
            return Err(reject("name must start with a letter, '_' or '$'"));
        }
        Some(_) => {}
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') {
        return Err(reject("name may only contain letters, digits, '_' or '$'"));
    }
    if Bag::from_ident(name).is_some() {
        return Err(reject("name is reserved for an attribute bag"));
    }
    if matches!(name, "true" | "false" | "null") {
        return Err(reject("name is a literal keyword"));
    }

    Ok(())
}

fn validate_target(
    policy: &str,
    target: &TargetSpec,
    resolver: &InjectedValueResolver,
) -> Result<(), ConfigError> {
    for source in &target.target {
        if let Some(err) = Rule::compile(source.as_str(), resolver).compile_error() {
            return Err(invalid(policy, err.to_string()));
        }
    }
    Ok(())
}

fn invalid(policy: &str, reason: String) -> ConfigError {
    ConfigError::InvalidPolicy {
        policy: policy.to_string(),
        reason,
    }
}
