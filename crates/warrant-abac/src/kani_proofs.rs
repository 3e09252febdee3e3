//! Kani proofs for ABAC policy evaluation
//!
//! These proofs verify the fail-closed and effect properties of target
//! policies using bounded model checking.
//!
//! **Proof Count**: 4 proofs
//!
//! Run with: `cargo kani --tests --harness verify_*`

#[cfg(kani)]
use crate::attributes::AttributeContext;
#[cfg(kani)]
use crate::resolver::InjectedValueResolver;
#[cfg(kani)]
use crate::target::{Algorithm, Effect, TargetPolicy};
#[cfg(kani)]
use serde_json::json;

#[cfg(kani)]
fn any_algorithm() -> Algorithm {
    if kani::any() { Algorithm::All } else { Algorithm::Any }
}

#[cfg(kani)]
fn any_effect() -> Effect {
    if kani::any() { Effect::Permit } else { Effect::Deny }
}

/// Proof: Target policy evaluation determinism
///
/// **Property**: Same inputs always produce the same decision
#[cfg(kani)]
#[kani::proof]
#[kani::unwind(16)]
fn verify_target_evaluation_determinism() {
    let age: i64 = kani::any();
    let policy = TargetPolicy::compile(
        ["user.age >= 18"],
        any_algorithm(),
        any_effect(),
        &InjectedValueResolver::new(),
    )
    .with_logging(false);
    let ctx = AttributeContext::default().with_user(json!({ "age": age }));

    // Postcondition: Identical decisions
    assert_eq!(policy.evaluate(&ctx), policy.evaluate(&ctx));
}

/// Proof: Effect inversion is applied exactly once
///
/// **Property**: For an error-free target, permit and deny disagree
#[cfg(kani)]
#[kani::proof]
#[kani::unwind(16)]
fn verify_effect_inversion() {
    let age: i64 = kani::any();
    let algorithm = any_algorithm();
    let resolver = InjectedValueResolver::new();
    let ctx = AttributeContext::default().with_user(json!({ "age": age }));

    let permit = TargetPolicy::compile(["user.age > 18"], algorithm, Effect::Permit, &resolver);
    let deny = TargetPolicy::compile(["user.age > 18"], algorithm, Effect::Deny, &resolver);

    // Postcondition: Deny is the negation of permit
    assert_eq!(permit.evaluate(&ctx), !deny.evaluate(&ctx));
    assert_eq!(permit.evaluate(&ctx), age > 18);
}

/// Proof: Unparsable rules fail closed
///
/// **Property**: A rule without a comparison denies for every algorithm and
/// effect
#[cfg(kani)]
#[kani::proof]
#[kani::unwind(16)]
fn verify_compile_error_fails_closed() {
    let policy = TargetPolicy::compile(
        ["user.age > 1", "garbage"],
        any_algorithm(),
        any_effect(),
        &InjectedValueResolver::new(),
    )
    .with_logging(false);
    let ctx = AttributeContext::default().with_user(json!({ "age": 30 }));

    // Postcondition: Denied, and the effect is never applied
    assert!(!policy.evaluate(&ctx));
}

/// Proof: Runtime faults fail closed
///
/// **Property**: A missing attribute denies even under a deny effect
#[cfg(kani)]
#[kani::proof]
#[kani::unwind(16)]
fn verify_runtime_error_fails_closed() {
    let policy = TargetPolicy::compile(
        ["user.clearance > 1"],
        any_algorithm(),
        Effect::Deny,
        &InjectedValueResolver::new(),
    )
    .with_logging(false);
    let ctx = AttributeContext::default().with_user(json!({ "age": 30 }));

    // Postcondition: Denied without inversion
    assert!(!policy.evaluate(&ctx));
}
