//! Attribute bags for ABAC evaluation.
//!
//! Four attribute categories are visible to every rule:
//! - **user**: who is asking (role, age, department, ...)
//! - **action**: what they want to do
//! - **env**: request context (time, network, country, ...)
//! - **resource**: what is being accessed
//!
//! Each bag is an arbitrary JSON value, usually an object. Rules reach into
//! the bags with field paths such as `user.age` or `resource.tags[0]`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Bag
// ============================================================================

/// One of the four attribute roots a rule may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bag {
    User,
    Action,
    Env,
    Resource,
}

impl Bag {
    /// All bags, in the order they are passed to a predicate.
    pub const ALL: [Bag; 4] = [Bag::User, Bag::Action, Bag::Env, Bag::Resource];

    /// Maps a bare identifier in rule text to a bag root.
    ///
    /// These names are reserved: injected values never shadow them.
    pub fn from_ident(ident: &str) -> Option<Self> {
        match ident {
            "user" => Some(Self::User),
            "action" => Some(Self::Action),
            "env" => Some(Self::Env),
            "resource" => Some(Self::Resource),
            _ => None,
        }
    }

    /// The identifier used for this bag in rule text.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Action => "action",
            Self::Env => "env",
            Self::Resource => "resource",
        }
    }
}

impl std::fmt::Display for Bag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// AttributeContext
// ============================================================================

/// The attribute bags supplied by the caller for one access decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeContext {
    /// Attributes of the requesting user.
    pub user: Value,
    /// Attributes of the requested action.
    pub action: Value,
    /// Attributes of the environment the request is made in.
    pub env: Value,
    /// Attributes of the resource being accessed.
    pub resource: Value,
}

impl AttributeContext {
    /// Creates a context from all four bags.
    pub fn new(
        user: impl Into<Value>,
        action: impl Into<Value>,
        env: impl Into<Value>,
        resource: impl Into<Value>,
    ) -> Self {
        Self {
            user: user.into(),
            action: action.into(),
            env: env.into(),
            resource: resource.into(),
        }
    }

    /// Sets the user bag.
    pub fn with_user(mut self, user: impl Into<Value>) -> Self {
        self.user = user.into();
        self
    }

    /// Sets the action bag.
    pub fn with_action(mut self, action: impl Into<Value>) -> Self {
        self.action = action.into();
        self
    }

    /// Sets the environment bag.
    pub fn with_env(mut self, env: impl Into<Value>) -> Self {
        self.env = env.into();
        self
    }

    /// Sets the resource bag.
    pub fn with_resource(mut self, resource: impl Into<Value>) -> Self {
        self.resource = resource.into();
        self
    }

    /// Returns the value of a bag.
    pub fn bag(&self, bag: Bag) -> &Value {
        match bag {
            Bag::User => &self.user,
            Bag::Action => &self.action,
            Bag::Env => &self.env,
            Bag::Resource => &self.resource,
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

    #[test]
    fn test_bag_from_ident() {
        for bag in Bag::ALL {
            assert_eq!(Bag::from_ident(bag.as_str()), Some(bag));
        }
        assert_eq!(Bag::from_ident("users"), None);
        assert_eq!(Bag::from_ident("data"), None);
    }

    #[test]
    fn test_default_bags_are_null() {
        let ctx = AttributeContext::default();
        for bag in Bag::ALL {
            assert!(ctx.bag(bag).is_null());
        }
    }

    #[test]
    fn test_context_builder() {
        let ctx = AttributeContext::default()
            .with_user(json!({"age": 30}))
            .with_action(json!({"name": "read"}))
            .with_env(json!({"country": "US"}))
            .with_resource(json!({"owner": "alice"}));

        assert_eq!(ctx.bag(Bag::User)["age"], 30);
        assert_eq!(ctx.bag(Bag::Action)["name"], "read");
        assert_eq!(ctx.bag(Bag::Env)["country"], "US");
        assert_eq!(ctx.bag(Bag::Resource)["owner"], "alice");
    }

    #[test]
    fn test_context_deserializes_missing_bags_as_null() {
        let ctx: AttributeContext =
            serde_json::from_value(json!({"user": {"id": 7}})).expect("deserialize context");
        assert_eq!(ctx.user["id"], 7);
        assert!(ctx.resource.is_null());
    }
}
