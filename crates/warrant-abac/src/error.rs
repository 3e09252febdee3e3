//! Error types for rule compilation, rule evaluation and policy expressions.
//!
//! None of these errors escape [`Policy::check`](crate::Policy::check): rule
//! errors deny the owning target policy and expression errors deny the whole
//! policy. They are surfaced as values so callers and logs can tell a broken
//! rule apart from a legitimate denial.

use thiserror::Error;

/// Reason a rule string does not match the single-comparison grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    /// The rule has no comparison operator.
    #[error("missing comparison operator")]
    MissingOperator,

    /// The rule has more than one comparison operator.
    #[error("expected exactly one comparison operator, found {count}")]
    MultipleOperators { count: usize },

    /// One side of the comparison is empty.
    #[error("empty {side} operand")]
    EmptyOperand { side: &'static str },

    /// A character that is not part of the rule grammar.
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    /// Boolean connectives are not allowed inside a single rule.
    #[error("boolean connective '{op}' at offset {offset} is not allowed in a rule")]
    Connective { op: &'static str, offset: usize },

    /// A string literal without its closing quote.
    #[error("unterminated string literal starting at offset {offset}")]
    UnterminatedString { offset: usize },

    /// A numeric literal that cannot be represented.
    #[error("invalid number literal '{literal}'")]
    InvalidNumber { literal: String },

    /// A token in a position the grammar does not allow.
    #[error("unexpected {found} at offset {offset}")]
    UnexpectedToken { found: String, offset: usize },

    /// The operand ended where more input was required.
    #[error("unexpected end of {side} operand")]
    UnexpectedEnd { side: &'static str },

    /// Operand tree nested too deeply, through parentheses, negations,
    /// operator chains or accessor chains.
    #[error("{side} operand nests deeper than {limit} levels")]
    TooDeep { side: &'static str, limit: usize },
}

/// A rule that failed to compile.
///
/// Compilation never fails eagerly; this error is reported every time the
/// rule is evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("in access rule '{rule}': {reason}")]
pub struct CompileError {
    /// The offending rule text.
    pub rule: String,
    /// Why the text was rejected.
    pub reason: SyntaxError,
}

/// A fault raised while evaluating a compiled rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalFault {
    /// A bare identifier that is neither a bag nor an injected value.
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),

    /// An object does not contain the requested key.
    #[error("missing field '{field}'")]
    MissingField { field: String },

    /// Field access on a value that is not an object.
    #[error("cannot read field '{field}' of {kind}")]
    NotAnObject { field: String, kind: &'static str },

    /// Array index past the end.
    #[error("index {index} out of bounds for array of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// Index expression of an unusable kind.
    #[error("cannot index {target} with {index}")]
    InvalidIndex {
        target: &'static str,
        index: &'static str,
    },

    /// Arithmetic on incompatible operands.
    #[error("cannot apply '{op}' to {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    /// Ordering comparison between values that have no order.
    #[error("cannot order {left} against {right}")]
    Incomparable {
        left: &'static str,
        right: &'static str,
    },

    /// Call syntax on something that is not an injected function.
    #[error("'{0}' is not a function")]
    NotCallable(String),

    /// An injected function used where a value is expected.
    #[error("'{0}' is a function, not a value")]
    NotAValue(String),

    /// An injected function returned an error.
    #[error("function '{name}' failed: {message}")]
    Function { name: String, message: String },

    /// Division or remainder by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// Arithmetic result that is not a finite number.
    #[error("arithmetic result is not a finite number")]
    NonFinite,
}

/// Outcome of a rule that did not produce a boolean.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    /// The rule text never compiled.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// The rule compiled but evaluation faulted.
    #[error("in access rule '{rule}': {fault}")]
    Runtime { rule: String, fault: EvalFault },
}

impl RuleError {
    /// The rule text this error belongs to.
    pub fn rule(&self) -> &str {
        match self {
            Self::Compile(err) => &err.rule,
            Self::Runtime { rule, .. } => rule,
        }
    }
}

/// A policy expression that cannot be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    /// The expression text is empty.
    #[error("empty policy expression")]
    Empty,

    /// A character or token the expression grammar does not allow.
    #[error("unexpected {found} at offset {offset} in policy expression")]
    UnexpectedToken { found: String, offset: usize },

    /// The expression ended where more input was required.
    #[error("unexpected end of policy expression")]
    UnexpectedEnd,

    /// A parenthesis without its partner.
    #[error("unbalanced parenthesis at offset {offset} in policy expression")]
    Unbalanced { offset: usize },

    /// Parenthesized groups nested too deeply.
    #[error("policy expression nests deeper than {limit} groups")]
    TooDeep { limit: usize },
}

/// Unknown keyword for an algorithm or effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}', expected one of: {expected}")]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
    pub expected: &'static str,
}
