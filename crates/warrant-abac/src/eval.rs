//! Evaluation of compiled comparisons.
//!
//! Operands evaluate to JSON values borrowed from the attribute bags or the
//! compile-time scope wherever possible. Semantics:
//!
//! - `==`/`!=` are strict: numbers compare numerically, everything else
//!   compares structurally, values of different kinds are never equal.
//! - `<`, `>`, `<=`, `>=` order numbers numerically and strings
//!   lexicographically. Any other pairing is a fault.
//! - `+` adds numbers or concatenates strings; `- * / %` take numbers only.

use std::borrow::Cow;
use std::cmp::Ordering;

use serde_json::{Number, Value};

use crate::attributes::AttributeContext;
use crate::error::EvalFault;
use crate::lexer::{ArithOp, CmpOp};
use crate::resolver::{Injected, Scope};
use crate::rule::{Comparison, Operand};

/// Evaluates `left op right`.
pub(crate) fn compare(
    comparison: &Comparison,
    scope: &Scope,
    ctx: &AttributeContext,
) -> Result<bool, EvalFault> {
    let env = Env { scope, ctx };
    let left = env.operand(&comparison.left)?;
    let right = env.operand(&comparison.right)?;

    match comparison.op {
        CmpOp::Eq => Ok(strict_eq(&left, &right)),
        CmpOp::Ne => Ok(!strict_eq(&left, &right)),
        CmpOp::Lt => order(&left, &right).map(Ordering::is_lt),
        CmpOp::Gt => order(&left, &right).map(Ordering::is_gt),
        CmpOp::Le => order(&left, &right).map(Ordering::is_le),
        CmpOp::Ge => order(&left, &right).map(Ordering::is_ge),
    }
}

struct Env<'a> {
    scope: &'a Scope,
    ctx: &'a AttributeContext,
}

impl<'a> Env<'a> {
    fn operand(&self, operand: &'a Operand) -> Result<Cow<'a, Value>, EvalFault> {
        match operand {
            Operand::Literal(value) => Ok(Cow::Borrowed(value)),
            Operand::Bag(bag) => Ok(Cow::Borrowed(self.ctx.bag(*bag))),
            Operand::Ident(name) => match self.scope.get(name) {
                Some(Injected::Value(value)) => Ok(Cow::Borrowed(value)),
                Some(Injected::Function(_)) => Err(EvalFault::NotAValue(name.clone())),
                None => Err(EvalFault::UnknownIdentifier(name.clone())),
            },
            Operand::Field(base, field) => {
                let base = self.operand(base)?;
                project(base, |v| field_of(v, field))
            }
            Operand::Index(base, index) => {
                let base = self.operand(base)?;
                let index = self.operand(index)?;
                project(base, |v| index_of(v, &index))
            }
            Operand::Call(name, args) => {
                let function = match self.scope.get(name) {
                    Some(Injected::Function(function)) => function,
                    Some(Injected::Value(_)) => return Err(EvalFault::NotCallable(name.clone())),
                    None => return Err(EvalFault::UnknownIdentifier(name.clone())),
                };
                let args = args
                    .iter()
                    .map(|arg| self.operand(arg).map(Cow::into_owned))
                    .collect::<Result<Vec<_>, _>>()?;
                function
                    .call(&args)
                    .map(Cow::Owned)
                    .map_err(|message| EvalFault::Function {
                        name: name.clone(),
                        message,
                    })
            }
            Operand::Neg(inner) => {
                let inner = self.operand(inner)?;
                match &*inner {
                    Value::Number(n) => negate(n).map(Cow::Owned),
                    other => Err(EvalFault::TypeMismatch {
                        op: "-",
                        left: "number",
                        right: kind(other),
                    }),
                }
            }
            Operand::Arith(lhs, op, rhs) => {
                let lhs = self.operand(lhs)?;
                let rhs = self.operand(rhs)?;
                arith(&lhs, *op, &rhs).map(Cow::Owned)
            }
        }
    }
}

/// Applies a lookup to a borrowed or owned base without cloning borrowed data.
fn project<'a>(
    base: Cow<'a, Value>,
    lookup: impl for<'v> Fn(&'v Value) -> Result<Cow<'v, Value>, EvalFault>,
) -> Result<Cow<'a, Value>, EvalFault> {
    match base {
        Cow::Borrowed(value) => lookup(value),
        Cow::Owned(value) => lookup(&value).map(|v| Cow::Owned(v.into_owned())),
    }
}

fn field_of<'v>(value: &'v Value, field: &str) -> Result<Cow<'v, Value>, EvalFault> {
    match value {
        Value::Object(map) => map
            .get(field)
            .map(Cow::Borrowed)
            .ok_or_else(|| EvalFault::MissingField {
                field: field.to_string(),
            }),
        Value::Array(items) if field == "length" => Ok(Cow::Owned(Value::from(items.len()))),
        Value::String(s) if field == "length" => {
            Ok(Cow::Owned(Value::from(s.chars().count())))
        }
        other => Err(EvalFault::NotAnObject {
            field: field.to_string(),
            kind: kind(other),
        }),
    }
}

fn index_of<'v>(value: &'v Value, index: &Value) -> Result<Cow<'v, Value>, EvalFault> {
    match (value, index) {
        (_, Value::String(key)) => field_of(value, key),
        (Value::Array(items), Value::Number(n)) => {
            let i = n
                .as_u64()
                .and_then(|i| usize::try_from(i).ok())
                .ok_or(EvalFault::InvalidIndex {
                    target: "array",
                    index: "non-integer number",
                })?;
            items
                .get(i)
                .map(Cow::Borrowed)
                .ok_or(EvalFault::IndexOutOfBounds {
                    index: i,
                    len: items.len(),
                })
        }
        (target, index) => Err(EvalFault::InvalidIndex {
            target: kind(target),
            index: kind(index),
        }),
    }
}

/// Name of a value's kind for diagnostics.
pub(crate) fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Comparison
// ============================================================================

fn strict_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => cmp_numbers(a, b) == Some(Ordering::Equal),
        _ => left == right,
    }
}

fn order(left: &Value, right: &Value) -> Result<Ordering, EvalFault> {
    let incomparable = || EvalFault::Incomparable {
        left: kind(left),
        right: kind(right),
    };
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => cmp_numbers(a, b).ok_or_else(incomparable),
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(incomparable()),
    }
}

/// Compares two numbers exactly when both are integers, otherwise as `f64`.
fn cmp_numbers(a: &Number, b: &Number) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Some(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return Some(x.cmp(&y));
    }
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

// ============================================================================
// Arithmetic
// ============================================================================

fn arith(left: &Value, op: ArithOp, right: &Value) -> Result<Value, EvalFault> {
    match (left, op, right) {
        (Value::String(a), ArithOp::Add, Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
        (Value::Number(a), op, Value::Number(b)) => numeric(a, op, b),
        _ => Err(EvalFault::TypeMismatch {
            op: op.as_str(),
            left: kind(left),
            right: kind(right),
        }),
    }
}

fn numeric(a: &Number, op: ArithOp, b: &Number) -> Result<Value, EvalFault> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        let exact = match op {
            ArithOp::Add => x.checked_add(y),
            ArithOp::Sub => x.checked_sub(y),
            ArithOp::Mul => x.checked_mul(y),
            ArithOp::Div | ArithOp::Rem if y == 0 => return Err(EvalFault::DivisionByZero),
            ArithOp::Div if x.checked_rem(y) == Some(0) => x.checked_div(y),
            ArithOp::Div => None,
            ArithOp::Rem => x.checked_rem(y),
        };
        if let Some(n) = exact {
            return Ok(Value::from(n));
        }
    }

    let (x, y) = (to_f64(a)?, to_f64(b)?);
    let result = match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div | ArithOp::Rem if y == 0.0 => return Err(EvalFault::DivisionByZero),
        ArithOp::Div => x / y,
        ArithOp::Rem => x % y,
    };
    finite(result)
}

fn negate(n: &Number) -> Result<Value, EvalFault> {
    if let Some(x) = n.as_i64().and_then(i64::checked_neg) {
        return Ok(Value::from(x));
    }
    finite(-to_f64(n)?)
}

fn to_f64(n: &Number) -> Result<f64, EvalFault> {
    n.as_f64().ok_or(EvalFault::NonFinite)
}

fn finite(f: f64) -> Result<Value, EvalFault> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or(EvalFault::NonFinite)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::InjectedFunction;
    use crate::rule::parse;
    use serde_json::json;

    fn run(src: &str, ctx: &AttributeContext) -> Result<bool, EvalFault> {
        compare(&parse(src).expect("parse"), &Scope::new(), ctx)
    }

    fn user(value: Value) -> AttributeContext {
        AttributeContext::default().with_user(value)
    }

    #[test]
    fn test_numbers_compare_across_representations() {
        let ctx = user(json!({"score": 2.0, "big": u64::MAX}));
        assert_eq!(run("user.score == 2", &ctx), Ok(true));
        assert_eq!(run("user.score < 2.5", &ctx), Ok(true));
        assert_eq!(run("user.big > 1", &ctx), Ok(true));
    }

    #[test]
    fn test_strict_equality_across_kinds() {
        let ctx = user(json!({"id": 1, "flag": true, "none": null}));
        assert_eq!(run("user.id == '1'", &ctx), Ok(false));
        assert_eq!(run("user.id != '1'", &ctx), Ok(true));
        assert_eq!(run("user.flag == true", &ctx), Ok(true));
        assert_eq!(run("user.none == null", &ctx), Ok(true));
    }

    #[test]
    fn test_string_ordering() {
        let ctx = user(json!({"name": "bob"}));
        assert_eq!(run("user.name > 'alice'", &ctx), Ok(true));
        assert_eq!(run("user.name <= 'bob'", &ctx), Ok(true));
    }

    #[test]
    fn test_incomparable_kinds() {
        let ctx = user(json!({"name": "bob"}));
        assert_eq!(
            run("user.name > 3", &ctx),
            Err(EvalFault::Incomparable {
                left: "string",
                right: "number"
            })
        );
        assert_eq!(
            run("null < 1", &ctx),
            Err(EvalFault::Incomparable {
                left: "null",
                right: "number"
            })
        );
    }

    #[test]
    fn test_field_on_non_object() {
        let ctx = user(json!({"age": 3}));
        assert_eq!(
            run("user.age.years > 1", &ctx),
            Err(EvalFault::NotAnObject {
                field: "years".to_string(),
                kind: "number"
            })
        );
        assert_eq!(
            run("resource.owner == 1", &ctx),
            Err(EvalFault::NotAnObject {
                field: "owner".to_string(),
                kind: "null"
            })
        );
    }

    #[test]
    fn test_indexing() {
        let ctx = user(json!({"tags": ["a", "b"]}));
        assert_eq!(run("user.tags[0] == 'a'", &ctx), Ok(true));
        assert_eq!(
            run("user.tags[5] == 'a'", &ctx),
            Err(EvalFault::IndexOutOfBounds { index: 5, len: 2 })
        );
        assert_eq!(
            run("user.tags[true] == 'a'", &ctx),
            Err(EvalFault::InvalidIndex {
                target: "array",
                index: "boolean"
            })
        );
        assert!(matches!(
            run("user.tags[-1] == 'a'", &ctx),
            Err(EvalFault::InvalidIndex { .. })
        ));
    }

    #[test]
    fn test_length_pseudo_field() {
        let ctx = user(json!({"name": "héllo", "obj": {"length": 9}}));
        assert_eq!(run("user.name.length == 5", &ctx), Ok(true));
        // Real object keys win over the pseudo field.
        assert_eq!(run("user.obj.length == 9", &ctx), Ok(true));
    }

    #[test]
    fn test_arithmetic() {
        let ctx = user(json!({"a": 7, "b": 2, "f": 0.5}));
        assert_eq!(run("user.a / user.b == 3.5", &ctx), Ok(true));
        assert_eq!(run("user.a % user.b == 1", &ctx), Ok(true));
        assert_eq!(run("user.a * user.f == 3.5", &ctx), Ok(true));
        assert_eq!(run("-user.a == -7", &ctx), Ok(true));
        assert_eq!(run("'ab' + 'cd' == 'abcd'", &ctx), Ok(true));
        assert_eq!(run("user.a / 0 == 1", &ctx), Err(EvalFault::DivisionByZero));
        assert_eq!(
            run("user.a - 'x' == 1", &ctx),
            Err(EvalFault::TypeMismatch {
                op: "-",
                left: "number",
                right: "string"
            })
        );
    }

    #[test]
    fn test_integer_overflow_falls_back_to_float() {
        let ctx = user(json!({"max": i64::MAX}));
        assert_eq!(run("user.max + 1 > user.max", &ctx), Ok(false));
        assert_eq!(run("user.max + 1 >= user.max", &ctx), Ok(true));
    }

    #[test]
    fn test_non_finite_result() {
        let ctx = user(json!({"huge": 1e308}));
        assert_eq!(run("user.huge * 10 > 1", &ctx), Err(EvalFault::NonFinite));
    }

    #[test]
    fn test_scope_function_misuse() {
        let mut scope = Scope::new();
        scope.insert(
            "f".to_string(),
            Injected::Function(InjectedFunction::new("f", |_| Ok(json!(1)))),
        );
        scope.insert("v".to_string(), Injected::Value(json!(1)));
        let ctx = AttributeContext::default();

        let eval = |src: &str| compare(&parse(src).expect("parse"), &scope, &ctx);
        assert_eq!(eval("f() == 1"), Ok(true));
        assert_eq!(eval("f == 1"), Err(EvalFault::NotAValue("f".to_string())));
        assert_eq!(eval("v() == 1"), Err(EvalFault::NotCallable("v".to_string())));
        assert_eq!(eval("v == 1"), Ok(true));
    }
}
