#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use serde_json::json;
use warrant_abac::{
    Algorithm, AttributeContext, Compiler, Effect, InjectedValueResolver, TargetSpec,
};

// ============================================================================
// Arbitrary Implementations
// ============================================================================

#[derive(Debug, Clone, Copy, Arbitrary)]
enum FuzzRule {
    AgeAbove(i8),
    AgeBelow(i8),
    MissingField,
    Garbage,
}

impl FuzzRule {
    fn text(self) -> String {
        match self {
            Self::AgeAbove(n) => format!("user.age > {n}"),
            Self::AgeBelow(n) => format!("user.age < {n}"),
            Self::MissingField => "user.salary > 0".to_string(),
            Self::Garbage => "garbage".to_string(),
        }
    }

    /// `None` when the rule errors.
    fn expected(self, age: i8) -> Option<bool> {
        match self {
            Self::AgeAbove(n) => Some(age > n),
            Self::AgeBelow(n) => Some(age < n),
            Self::MissingField | Self::Garbage => None,
        }
    }
}

#[derive(Debug, Clone, Arbitrary)]
struct FuzzTarget {
    rules: Vec<FuzzRule>,
    any: bool,
    permit: bool,
}

impl FuzzTarget {
    fn spec(&self) -> TargetSpec {
        TargetSpec::new(
            self.rules.iter().map(|r| r.text()),
            if self.any { Algorithm::Any } else { Algorithm::All },
            if self.permit { Effect::Permit } else { Effect::Deny },
        )
    }

    fn expected(&self, age: i8) -> bool {
        let mut acc = !self.any;
        for rule in &self.rules {
            let Some(result) = rule.expected(age) else {
                return false;
            };
            acc = if self.any { acc || result } else { acc && result };
        }
        if self.permit { acc } else { !acc }
    }
}

#[derive(Debug, Arbitrary)]
struct Input {
    first: FuzzTarget,
    /// `true` merges with `&&`, `false` with `||`.
    rest: Vec<(bool, FuzzTarget)>,
    age: i8,
}

fuzz_target!(|input: Input| {
    if input.rest.len() > 16 {
        return;
    }

    let resolver = InjectedValueResolver::new();
    let compiler = Compiler::new(&resolver).without_logging();

    let mut policy = compiler.single(&input.first.spec());
    for (and, target) in &input.rest {
        let next = compiler.single(&target.spec());
        policy = if *and { policy.and(&next) } else { policy.or(&next) };
    }

    // `&&` binds tighter than `||`: OR over runs of AND.
    let mut expected = false;
    let mut clause = input.first.expected(input.age);
    for (and, target) in &input.rest {
        let value = target.expected(input.age);
        if *and {
            clause = clause && value;
        } else {
            expected = expected || clause;
            clause = value;
        }
    }
    expected = expected || clause;

    let ctx = AttributeContext::default().with_user(json!({ "age": input.age }));
    assert_eq!(policy.check(&ctx), expected, "expression: {}", policy.expression());
    assert_eq!(policy.len(), input.rest.len() + 1);
});
