//! Rule compiler.
//!
//! A rule is a single comparison `<left> <op> <right>` over the attribute
//! bags, injected identifiers and literals:
//!
//! ```text
//! user.age >= 18
//! resource.owner == user.id
//! env.hour < closingHour - 1
//! isMember(user.groups, 'admin') = true
//! ```
//!
//! Compilation parses the text into an operand tree exactly once and
//! snapshots every referenced injected identifier. It never fails eagerly: a
//! rule that does not parse still compiles, and reports its
//! [`CompileError`] each time it is evaluated.

use std::collections::BTreeSet;
use std::fmt;

use serde_json::Value;
use tracing::debug;

use crate::attributes::{AttributeContext, Bag};
use crate::error::{CompileError, RuleError, SyntaxError};
use crate::eval;
use crate::lexer::{ArithOp, CmpOp, Spanned, Token, tokenize};
use crate::resolver::{InjectedValueResolver, Scope};

// ============================================================================
// AST
// ============================================================================

/// One side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Operand {
    Literal(Value),
    Bag(Bag),
    Ident(String),
    Field(Box<Operand>, String),
    Index(Box<Operand>, Box<Operand>),
    Call(String, Vec<Operand>),
    Neg(Box<Operand>),
    Arith(Box<Operand>, ArithOp, Box<Operand>),
}

impl Operand {
    /// Collects every bare identifier and called name in this operand.
    fn collect_names<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Self::Literal(_) | Self::Bag(_) => {}
            Self::Ident(name) => {
                out.insert(name.as_str());
            }
            Self::Field(base, _) | Self::Neg(base) => base.collect_names(out),
            Self::Index(base, index) => {
                base.collect_names(out);
                index.collect_names(out);
            }
            Self::Call(name, args) => {
                out.insert(name.as_str());
                for arg in args {
                    arg.collect_names(out);
                }
            }
            Self::Arith(lhs, _, rhs) => {
                lhs.collect_names(out);
                rhs.collect_names(out);
            }
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => write!(f, "{value}"),
            Self::Bag(bag) => write!(f, "{bag}"),
            Self::Ident(name) => f.write_str(name),
            Self::Field(base, field) => write!(f, "{base}.{field}"),
            Self::Index(base, index) => write!(f, "{base}[{index}]"),
            Self::Call(name, args) => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Self::Neg(inner) => write!(f, "-{inner}"),
            Self::Arith(lhs, op, rhs) => write!(f, "({lhs} {} {rhs})", op.as_str()),
        }
    }
}

/// A parsed `left op right` triple.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Comparison {
    pub left: Operand,
    pub op: CmpOp,
    pub right: Operand,
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.op.as_str(), self.right)
    }
}

// ============================================================================
// Parser
// ============================================================================

/// Parses rule text into a single comparison.
pub(crate) fn parse(src: &str) -> Result<Comparison, SyntaxError> {
    let tokens = tokenize(src)?;

    let ops: Vec<(usize, CmpOp)> = tokens
        .iter()
        .enumerate()
        .filter_map(|(i, t)| match t.token {
            Token::Cmp(op) => Some((i, op)),
            _ => None,
        })
        .collect();

    let (split, op) = match ops.as_slice() {
        [] => return Err(SyntaxError::MissingOperator),
        [one] => *one,
        many => return Err(SyntaxError::MultipleOperators { count: many.len() }),
    };

    let left = OperandParser::new(&tokens[..split], "left").parse_all()?;
    let right = OperandParser::new(&tokens[split + 1..], "right").parse_all()?;

    Ok(Comparison { left, op, right })
}

/// Recursive-descent parser over the tokens of one comparison side.
///
/// ```text
/// expr    := term (('+' | '-') term)*
/// term    := unary (('*' | '/' | '%') unary)*
/// unary   := '-' unary | postfix
/// postfix := primary ('.' ident | '[' expr ']')*
/// primary := literal | ident | ident '(' args ')' | '(' expr ')'
/// ```
struct OperandParser<'t> {
    tokens: &'t [Spanned],
    pos: usize,
    side: &'static str,
    depth: usize,
}

/// Maximum height of one operand tree.
const MAX_NESTING: usize = 64;

impl<'t> OperandParser<'t> {
    fn new(tokens: &'t [Spanned], side: &'static str) -> Self {
        Self {
            tokens,
            pos: 0,
            side,
            depth: 0,
        }
    }

    fn parse_all(mut self) -> Result<Operand, SyntaxError> {
        if self.tokens.is_empty() {
            return Err(SyntaxError::EmptyOperand { side: self.side });
        }
        let operand = self.expr()?;
        match self.tokens.get(self.pos) {
            None => Ok(operand),
            Some(extra) => Err(unexpected(extra)),
        }
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn next(&mut self) -> Result<&'t Spanned, SyntaxError> {
        let spanned = self
            .tokens
            .get(self.pos)
            .ok_or(SyntaxError::UnexpectedEnd { side: self.side })?;
        self.pos += 1;
        Ok(spanned)
    }

    fn expect(&mut self, expected: &Token) -> Result<(), SyntaxError> {
        let spanned = self.next()?;
        if &spanned.token == expected {
            Ok(())
        } else {
            Err(unexpected(spanned))
        }
    }

    /// Claims one level of the nesting budget.
    ///
    /// Every node that wraps another operand claims a level, so chained
    /// operators and accessors are bounded the same way parentheses are.
    fn enter(&mut self) -> Result<(), SyntaxError> {
        if self.depth == MAX_NESTING {
            return Err(SyntaxError::TooDeep {
                side: self.side,
                limit: MAX_NESTING,
            });
        }
        self.depth += 1;
        Ok(())
    }

    fn expr(&mut self) -> Result<Operand, SyntaxError> {
        let base = self.depth;
        let mut lhs = self.term()?;
        while let Some(Token::Arith(op @ (ArithOp::Add | ArithOp::Sub))) = self.peek() {
            self.pos += 1;
            self.enter()?;
            let rhs = self.term()?;
            lhs = Operand::Arith(Box::new(lhs), *op, Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Operand, SyntaxError> {
        let base = self.depth;
        let mut lhs = self.unary()?;
        while let Some(Token::Arith(op @ (ArithOp::Mul | ArithOp::Div | ArithOp::Rem))) =
            self.peek()
        {
            self.pos += 1;
            self.enter()?;
            let rhs = self.unary()?;
            lhs = Operand::Arith(Box::new(lhs), *op, Box::new(rhs));
        }
        self.depth = base;
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Operand, SyntaxError> {
        let base = self.depth;
        self.enter()?;
        let operand = if let Some(Token::Arith(ArithOp::Sub)) = self.peek() {
            self.pos += 1;
            self.unary().map(|inner| Operand::Neg(Box::new(inner)))
        } else {
            self.postfix()
        };
        self.depth = base;
        operand
    }

    fn postfix(&mut self) -> Result<Operand, SyntaxError> {
        let base = self.depth;
        let mut operand = self.primary()?;
        loop {
            if matches!(self.peek(), Some(Token::Dot | Token::LBracket)) {
                self.enter()?;
            }
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let spanned = self.next()?;
                    let Token::Ident(field) = &spanned.token else {
                        return Err(unexpected(spanned));
                    };
                    operand = Operand::Field(Box::new(operand), field.clone());
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.expr()?;
                    self.expect(&Token::RBracket)?;
                    operand = Operand::Index(Box::new(operand), Box::new(index));
                }
                _ => {
                    self.depth = base;
                    return Ok(operand);
                }
            }
        }
    }

    fn primary(&mut self) -> Result<Operand, SyntaxError> {
        let spanned = self.next()?;
        match &spanned.token {
            Token::Literal(value) => Ok(Operand::Literal(value.clone())),
            Token::Ident(name) => {
                if let Some(bag) = Bag::from_ident(name) {
                    return Ok(Operand::Bag(bag));
                }
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let args = self.arguments()?;
                    return Ok(Operand::Call(name.clone(), args));
                }
                Ok(Operand::Ident(name.clone()))
            }
            Token::LParen => {
                let inner = self.expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            _ => Err(unexpected(spanned)),
        }
    }

    /// Parses call arguments after the opening parenthesis.
    fn arguments(&mut self) -> Result<Vec<Operand>, SyntaxError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            let spanned = self.next()?;
            match spanned.token {
                Token::Comma => {}
                Token::RParen => return Ok(args),
                _ => return Err(unexpected(spanned)),
            }
        }
    }
}

fn unexpected(spanned: &Spanned) -> SyntaxError {
    SyntaxError::UnexpectedToken {
        found: spanned.token.describe(),
        offset: spanned.offset,
    }
}

// ============================================================================
// Rule
// ============================================================================

#[derive(Debug, Clone)]
enum Compiled {
    Ready { comparison: Comparison, scope: Scope },
    Failed(CompileError),
}

/// A compiled access rule.
///
/// Immutable once built: the text is parsed once and injected identifiers are
/// bound from the resolver as it was at compile time.
#[derive(Debug, Clone)]
pub struct Rule {
    source: String,
    compiled: Compiled,
}

impl Rule {
    /// Compiles `source` against the current contents of `resolver`.
    pub fn compile(source: impl Into<String>, resolver: &InjectedValueResolver) -> Self {
        let source = source.into();
        let compiled = match parse(&source) {
            Ok(comparison) => {
                let mut names = BTreeSet::new();
                comparison.left.collect_names(&mut names);
                comparison.right.collect_names(&mut names);
                let scope = resolver.snapshot(names);
                Compiled::Ready { comparison, scope }
            }
            Err(reason) => {
                debug!(rule = %source, error = %reason, "Access rule failed to compile");
                Compiled::Failed(CompileError {
                    rule: source.clone(),
                    reason,
                })
            }
        };
        Self { source, compiled }
    }

    /// The rule text as written.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The deferred compile failure, if the text did not parse.
    pub fn compile_error(&self) -> Option<&CompileError> {
        match &self.compiled {
            Compiled::Ready { .. } => None,
            Compiled::Failed(err) => Some(err),
        }
    }

    /// Whether the rule parsed.
    pub fn is_compiled(&self) -> bool {
        self.compile_error().is_none()
    }

    /// Names bound from the resolver at compile time.
    pub fn bound_names(&self) -> Vec<&str> {
        match &self.compiled {
            Compiled::Ready { scope, .. } => {
                let mut names: Vec<&str> = scope.keys().map(String::as_str).collect();
                names.sort_unstable();
                names
            }
            Compiled::Failed(_) => Vec::new(),
        }
    }

    /// Evaluates the comparison against the attribute bags.
    ///
    /// Never panics: parse failures come back as [`RuleError::Compile`] and
    /// evaluation faults as [`RuleError::Runtime`].
    pub fn evaluate(&self, ctx: &AttributeContext) -> Result<bool, RuleError> {
        match &self.compiled {
            Compiled::Ready { comparison, scope } => {
                eval::compare(comparison, scope, ctx).map_err(|fault| RuleError::Runtime {
                    rule: self.source.clone(),
                    fault,
                })
            }
            Compiled::Failed(err) => Err(RuleError::Compile(err.clone())),
        }
    }
}

impl fmt::Display for Rule {
    /// Writes the normalized comparison, or the raw text if it never parsed.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.compiled {
            Compiled::Ready { comparison, .. } => write!(f, "{comparison}"),
            Compiled::Failed(_) => f.write_str(&self.source),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalFault;
    use crate::resolver::InjectedFunction;
    use serde_json::json;

    fn ctx() -> AttributeContext {
        AttributeContext::new(
            json!({"age": 30, "name": "alice", "groups": ["staff", "admin"], "id": 7}),
            json!({"name": "read"}),
            json!({"hour": 14, "country": "US"}),
            json!({"owner": 7, "tags": ["public"], "meta": {"size": 1024}}),
        )
    }

    fn compile(src: &str) -> Rule {
        Rule::compile(src, &InjectedValueResolver::new())
    }

    #[test]
    fn test_parse_field_paths() {
        let cmp = parse("resource.meta.size <= 2048").expect("parse");
        assert_eq!(cmp.op, CmpOp::Le);
        assert_eq!(cmp.to_string(), "resource.meta.size <= 2048");
    }

    #[test]
    fn test_parse_precedence() {
        let cmp = parse("1 + 2 * 3 == 7").expect("parse");
        assert_eq!(cmp.left.to_string(), "(1 + (2 * 3))");
    }

    #[test]
    fn test_parse_rejects_missing_operator() {
        assert_eq!(parse("garbage"), Err(SyntaxError::MissingOperator));
    }

    #[test]
    fn test_parse_rejects_chained_comparison() {
        assert_eq!(
            parse("1 < user.age < 99"),
            Err(SyntaxError::MultipleOperators { count: 2 })
        );
    }

    #[test]
    fn test_parse_rejects_empty_side() {
        assert_eq!(
            parse("user.age >"),
            Err(SyntaxError::EmptyOperand { side: "right" })
        );
        assert_eq!(
            parse("== 3"),
            Err(SyntaxError::EmptyOperand { side: "left" })
        );
    }

    #[test]
    fn test_parse_rejects_trailing_tokens() {
        assert!(matches!(
            parse("user.age 3 > 1"),
            Err(SyntaxError::UnexpectedToken { offset: 9, .. })
        ));
    }

    #[test]
    fn test_parse_rejects_unclosed_index() {
        assert_eq!(
            parse("user.groups[0 == 'staff'"),
            Err(SyntaxError::UnexpectedEnd { side: "left" })
        );
    }

    #[test]
    fn test_evaluate_simple_rules() {
        let ctx = ctx();
        assert_eq!(compile("user.age>18").evaluate(&ctx), Ok(true));
        assert_eq!(compile("user.age < 18").evaluate(&ctx), Ok(false));
        assert_eq!(compile("user.name = 'alice'").evaluate(&ctx), Ok(true));
        assert_eq!(compile("resource.owner == user.id").evaluate(&ctx), Ok(true));
        assert_eq!(compile("action.name != \"write\"").evaluate(&ctx), Ok(true));
        assert_eq!(compile("user.groups[1] == 'admin'").evaluate(&ctx), Ok(true));
        assert_eq!(compile("user['name'] == 'alice'").evaluate(&ctx), Ok(true));
        assert_eq!(compile("user.groups.length >= 2").evaluate(&ctx), Ok(true));
        assert_eq!(compile("env.hour + 2 * 3 == 20").evaluate(&ctx), Ok(true));
    }

    #[test]
    fn test_compile_error_is_deferred() {
        let rule = compile("garbage");
        assert!(!rule.is_compiled());
        let err = rule.evaluate(&ctx()).expect_err("garbage must not evaluate");
        assert!(matches!(err, RuleError::Compile(ref e) if e.rule == "garbage"));

        // Every evaluation reports the same failure.
        assert_eq!(rule.evaluate(&ctx()), Err(err));
    }

    #[test]
    fn test_runtime_error_for_missing_field() {
        let err = compile("user.salary > 10").evaluate(&ctx()).expect_err("missing");
        assert_eq!(
            err,
            RuleError::Runtime {
                rule: "user.salary > 10".to_string(),
                fault: EvalFault::MissingField {
                    field: "salary".to_string()
                },
            }
        );
    }

    #[test]
    fn test_unknown_identifier_is_runtime_error() {
        let err = compile("user.age < maxAge").evaluate(&ctx()).expect_err("unbound");
        assert!(matches!(
            err,
            RuleError::Runtime { fault: EvalFault::UnknownIdentifier(ref n), .. } if n == "maxAge"
        ));
    }

    #[test]
    fn test_injected_value_is_snapshotted() {
        let resolver = InjectedValueResolver::new();
        resolver.register("maxAge", 65);
        let rule = Rule::compile("user.age<maxAge", &resolver);
        assert_eq!(rule.bound_names(), vec!["maxAge"]);

        let old = AttributeContext::default().with_user(json!({"age": 70}));
        let young = AttributeContext::default().with_user(json!({"age": 40}));
        assert_eq!(rule.evaluate(&young), Ok(true));
        assert_eq!(rule.evaluate(&old), Ok(false));

        resolver.unregister("maxAge");
        resolver.register("maxAge", 100);
        assert_eq!(rule.evaluate(&old), Ok(false));
    }

    #[test]
    fn test_registration_after_compile_is_not_seen() {
        let resolver = InjectedValueResolver::new();
        let rule = Rule::compile("user.age < limit", &resolver);
        resolver.register("limit", 99);
        assert!(rule.evaluate(&ctx()).is_err());
    }

    #[test]
    fn test_injected_function_call() {
        let resolver = InjectedValueResolver::new();
        resolver.register_fn(InjectedFunction::new("contains", |args| match args {
            [Value::Array(items), needle] => Ok(Value::Bool(items.contains(needle))),
            _ => Err("expected (array, value)".to_string()),
        }));

        let rule = Rule::compile("contains(user.groups, 'admin') == true", &resolver);
        assert_eq!(rule.evaluate(&ctx()), Ok(true));

        let bad = Rule::compile("contains(user.name, 'x') == true", &resolver);
        assert!(matches!(
            bad.evaluate(&ctx()),
            Err(RuleError::Runtime { fault: EvalFault::Function { .. }, .. })
        ));
    }

    #[test]
    fn test_bag_names_are_not_shadowed() {
        let resolver = InjectedValueResolver::new();
        resolver.register("user", json!({"age": 1}));
        let rule = Rule::compile("user.age == 30", &resolver);
        assert_eq!(rule.evaluate(&ctx()), Ok(true));
        assert!(rule.bound_names().is_empty());
    }

    #[test]
    fn test_display_normalizes_equality() {
        assert_eq!(compile("user.age=30").to_string(), "user.age == 30");
        assert_eq!(compile("garbage").to_string(), "garbage");
    }

    #[test]
    fn test_nesting_limit() {
        let nested = format!("{}user.age{} == 30", "(".repeat(40), ")".repeat(40));
        assert_eq!(compile(&nested).evaluate(&ctx()), Ok(true));

        let too_deep = format!("{}user.age{} == 30", "(".repeat(200), ")".repeat(200));
        assert_eq!(
            compile(&too_deep).compile_error().map(|e| &e.reason),
            Some(&SyntaxError::TooDeep {
                side: "left",
                limit: MAX_NESTING
            })
        );

        let negations = format!("{}1 == 1", "-".repeat(200));
        assert!(!compile(&negations).is_compiled());
    }

    #[test]
    fn test_operator_chain_limit() {
        let short = format!("1{} == 41", "+1".repeat(40));
        assert_eq!(compile(&short).evaluate(&ctx()), Ok(true));

        let long = format!("1{} == 5001", "+1".repeat(5000));
        let rule = compile(&long);
        assert_eq!(
            rule.compile_error().map(|e| &e.reason),
            Some(&SyntaxError::TooDeep {
                side: "left",
                limit: MAX_NESTING
            })
        );
        assert!(matches!(rule.evaluate(&ctx()), Err(RuleError::Compile(_))));

        let products = format!("1 == 1{}", "*1".repeat(5000));
        assert_eq!(
            compile(&products).compile_error().map(|e| &e.reason),
            Some(&SyntaxError::TooDeep {
                side: "right",
                limit: MAX_NESTING
            })
        );
    }

    #[test]
    fn test_accessor_chain_limit() {
        let fields = format!("user{} == 1", ".a".repeat(5000));
        let rule = compile(&fields);
        assert_eq!(
            rule.compile_error().map(|e| &e.reason),
            Some(&SyntaxError::TooDeep {
                side: "left",
                limit: MAX_NESTING
            })
        );
        assert!(matches!(rule.evaluate(&ctx()), Err(RuleError::Compile(_))));

        let indexes = format!("user{} == 1", "[0]".repeat(5000));
        assert!(!compile(&indexes).is_compiled());

        let mixed = format!("user{} == 1", ".a[0]".repeat(2500));
        assert!(!compile(&mixed).is_compiled());
    }
}
