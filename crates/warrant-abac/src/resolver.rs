//! Injected values that rule text may reference by bare identifier.
//!
//! A rule such as `user.age < maxAge` refers to `maxAge`, which is neither a
//! bag nor a literal. The compiler looks such names up in an
//! [`InjectedValueResolver`] and snapshots the value into the compiled rule.
//! Registry changes made after compilation are never observed by that rule.
//!
//! The table is guarded by an `RwLock`: registration may race with
//! compilation on other threads, and each compilation takes its snapshot under
//! a single read lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use serde_json::Value;

type Callable = dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync;

// ============================================================================
// InjectedFunction
// ============================================================================

/// A named host function callable from rule text, e.g. `isAdult(user.age)`.
#[derive(Clone)]
pub struct InjectedFunction {
    name: Arc<str>,
    call: Arc<Callable>,
}

impl InjectedFunction {
    /// Wraps a closure under the name rules use to call it.
    pub fn new<F>(name: impl Into<Arc<str>>, call: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            call: Arc::new(call),
        }
    }

    /// The name this function registers under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invokes the function.
    pub fn call(&self, args: &[Value]) -> Result<Value, String> {
        (self.call)(args)
    }
}

impl fmt::Debug for InjectedFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectedFunction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Injected
// ============================================================================

/// An entry in the resolver table.
#[derive(Debug, Clone)]
pub enum Injected {
    /// A plain value, e.g. a threshold or an allow-list.
    Value(Value),
    /// A callable.
    Function(InjectedFunction),
}

impl From<Value> for Injected {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<InjectedFunction> for Injected {
    fn from(function: InjectedFunction) -> Self {
        Self::Function(function)
    }
}

/// Anything that names a resolver entry: a string or a registered function.
pub trait InjectedName {
    fn injected_name(&self) -> &str;
}

impl InjectedName for str {
    fn injected_name(&self) -> &str {
        self
    }
}

impl InjectedName for String {
    fn injected_name(&self) -> &str {
        self
    }
}

impl InjectedName for InjectedFunction {
    fn injected_name(&self) -> &str {
        self.name()
    }
}

impl<T: InjectedName + ?Sized> InjectedName for &T {
    fn injected_name(&self) -> &str {
        (**self).injected_name()
    }
}

/// Bindings captured for one rule at compile time.
pub(crate) type Scope = HashMap<String, Injected>;

// ============================================================================
// InjectedValueResolver
// ============================================================================

/// Name-keyed table of injected values and functions.
///
/// The table itself is created on the first registration and discarded by
/// [`clear`](Self::clear); until then lookups simply find nothing.
#[derive(Debug, Default)]
pub struct InjectedValueResolver {
    table: RwLock<Option<HashMap<String, Injected>>>,
}

impl InjectedValueResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide resolver used by [`Compiler::default`](crate::Compiler).
    pub fn global() -> &'static InjectedValueResolver {
        static GLOBAL: OnceLock<InjectedValueResolver> = OnceLock::new();
        GLOBAL.get_or_init(InjectedValueResolver::new)
    }

    /// Registers `value` under `name`, replacing any previous entry.
    pub fn register(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.insert(name.into(), Injected::Value(value.into()));
    }

    /// Registers a function under its own name.
    pub fn register_fn(&self, function: InjectedFunction) {
        self.insert(function.name().to_string(), Injected::Function(function));
    }

    /// Removes an entry. A no-op when nothing has been registered yet.
    pub fn unregister(&self, name: impl InjectedName) {
        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entries) = table.as_mut() {
            entries.remove(name.injected_name());
        }
    }

    /// Discards the whole table.
    pub fn clear(&self) {
        *self.table.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Returns a copy of the entry registered under `name`.
    pub fn get(&self, name: &str) -> Option<Injected> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(|entries| entries.get(name).cloned())
    }

    /// Whether `name` is currently registered.
    pub fn contains(&self, name: &str) -> bool {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|entries| entries.contains_key(name))
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, HashMap::len)
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Captures the current entries for `names` under one read lock.
    ///
    /// Names that are not registered are left out of the scope and fail at
    /// evaluation time as unknown identifiers.
    pub(crate) fn snapshot<'n>(&self, names: impl IntoIterator<Item = &'n str>) -> Scope {
        let table = self.table.read().unwrap_or_else(PoisonError::into_inner);
        let Some(entries) = table.as_ref() else {
            return Scope::new();
        };

        names
            .into_iter()
            .filter_map(|name| {
                entries
                    .get(name)
                    .map(|entry| (name.to_string(), entry.clone()))
            })
            .collect()
    }

    fn insert(&self, name: String, entry: Injected) {
        self.table
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert_with(HashMap::new)
            .insert(name, entry);
    }
}

// ============================================================================
// Tests
// ============================================================================
