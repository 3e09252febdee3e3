#![no_main]

use std::collections::BTreeMap;

use libfuzzer_sys::fuzz_target;
use serde_json::{Value, json};
use warrant_abac::{
    AttributeContext, InjectedFunction, InjectedValueResolver, PolicyExpression, Rule,
};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let resolver = InjectedValueResolver::new();
    resolver.register("limit", 65);
    resolver.register("tags", json!(["a", "b"]));
    resolver.register_fn(InjectedFunction::new("first", |args| {
        args.first().cloned().ok_or_else(|| "no arguments".to_string())
    }));

    let ctx = AttributeContext::new(
        json!({"age": 30, "name": "ann", "roles": ["staff"], "big": i64::MAX}),
        json!({"name": "read"}),
        json!({"hour": 9, "ratio": 0.5}),
        json!({"owner": Value::Null, "meta": {"size": 1}}),
    );

    // Compilation and evaluation must never panic, and must be deterministic.
    let rule = Rule::compile(text, &resolver);
    assert_eq!(rule.evaluate(&ctx), rule.evaluate(&ctx));
    assert_eq!(rule.is_compiled(), rule.compile_error().is_none());
    let _ = rule.to_string();

    // The same bytes as a policy expression.
    let expression = PolicyExpression::parse(text);
    let results: BTreeMap<String, bool> = expression
        .references()
        .into_iter()
        .map(|name| (name.to_string(), name.len() % 2 == 0))
        .collect();
    assert_eq!(expression.evaluate(&results), expression.evaluate(&results));
});
