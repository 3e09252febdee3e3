//! # warrant-abac: Attribute-Based Access Control
//!
//! Compiles comparison rules written as text into safe predicates over four
//! attribute bags (`user`, `action`, `env`, `resource`) and combines them into
//! composite policies.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  Access Request                              │
//! │  (user + action + env + resource bags)       │
//! └─────────────────┬───────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │  Policy                                      │
//! │  ├─ Evaluate every named target policy       │
//! │  │   ├─ Run each compiled rule               │
//! │  │   ├─ Fold results (all / any)             │
//! │  │   └─ Apply effect (permit / deny)         │
//! │  └─ Fold named results through expression    │
//! └─────────────────┬───────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │  Decision                                    │
//! │  - allowed (bool)                            │
//! │  - per target policy results                 │
//! │  - human-readable reason                     │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Every failure is fail-closed. A rule that does not parse, or that faults at
//! evaluation time, makes its target policy evaluate to `false` regardless of
//! its effect. [`Policy::check`] always returns a plain boolean.
//!
//! ## Injected identifiers
//!
//! Rule text may reference values and functions registered with an
//! [`InjectedValueResolver`]. References are bound when the rule is compiled;
//! later changes to the resolver do not affect already compiled rules.
//!
//! ## Examples
//!
//! ```
//! use warrant_abac::{AttributeContext, Compiler, InjectedValueResolver, TargetSpec};
//! use warrant_abac::{Algorithm, Effect};
//! use serde_json::json;
//!
//! let resolver = InjectedValueResolver::new();
//! resolver.register("maxAge", 65);
//! let compiler = Compiler::new(&resolver);
//!
//! let adult = compiler.single(&TargetSpec::new(
//!     ["user.age >= 18", "user.age < maxAge"],
//!     Algorithm::All,
//!     Effect::Permit,
//! ));
//! let owner = compiler.single(&TargetSpec::new(
//!     ["user.id == resource.owner"],
//!     Algorithm::All,
//!     Effect::Permit,
//! ));
//! let policy = adult.and(&owner);
//!
//! let ctx = AttributeContext::new(
//!     json!({"id": 7, "age": 30}),
//!     json!({"kind": "read"}),
//!     json!({}),
//!     json!({"owner": 7}),
//! );
//! assert!(policy.check(&ctx));
//! ```

pub mod attributes;
pub mod compiler;
pub mod error;
mod eval;
pub mod expression;
mod lexer;
pub mod policy;
pub mod resolver;
pub mod rule;
pub mod target;

// Kani proofs for bounded model checking
#[cfg(any(test, kani))]
mod kani_proofs;


pub use attributes::{AttributeContext, Bag};
pub use compiler::{Compiler, Settings};
pub use error::{CompileError, EvalFault, ExpressionError, ParseError, RuleError, SyntaxError};
pub use expression::{Connective, PolicyExpression};
pub use lexer::{ArithOp, CmpOp};
pub use policy::{Decision, GroupSpec, Policy, PolicySpec};
pub use resolver::{Injected, InjectedFunction, InjectedName, InjectedValueResolver};
pub use rule::Rule;
pub use target::{Algorithm, Effect, TargetPolicy, TargetSpec};
