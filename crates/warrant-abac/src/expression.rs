//! Boolean expressions over named target-policy results.
//!
//! Grammar (`&&` binds tighter than `||`, both left-associative):
//!
//! ```text
//! expr   := clause ('||' clause)*
//! clause := atom ('&&' atom)*
//! atom   := 'data.' name | 'data[' quoted ']' | '(' expr ')'
//! ```
//!
//! Trees are kept in disjunctive form, an OR of AND-clauses. Joining two
//! expressions with a connective therefore produces exactly the tree the
//! parser would build for the concatenated text: `a||b` joined by `&&` with
//! `c` is `a || (b && c)`, not `(a || b) && c`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::ExpressionError;

/// Connective used when merging two policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Connective {
    And,
    Or,
}

impl Connective {
    /// The operator text spliced between merged expressions.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

impl fmt::Display for Connective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Atom {
    Ref(String),
    Group(Disjunction),
}

/// OR over AND-clauses. Never empty, and no clause is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Disjunction(Vec<Vec<Atom>>);

impl Disjunction {
    fn evaluate(&self, results: &BTreeMap<String, bool>) -> bool {
        self.0.iter().any(|clause| {
            clause.iter().all(|atom| match atom {
                Atom::Ref(name) => results.get(name).copied().unwrap_or(false),
                Atom::Group(inner) => inner.evaluate(results),
            })
        })
    }

    fn join(mut self, connective: Connective, mut other: Disjunction) -> Disjunction {
        match connective {
            Connective::Or => self.0.append(&mut other.0),
            Connective::And => {
                let mut rest = other.0.into_iter();
                if let (Some(last), Some(first)) = (self.0.last_mut(), rest.next()) {
                    last.extend(first);
                }
                self.0.extend(rest);
            }
        }
        self
    }

    fn collect_refs<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        for atom in self.0.iter().flatten() {
            match atom {
                Atom::Ref(name) => {
                    out.insert(name.as_str());
                }
                Atom::Group(inner) => inner.collect_refs(out),
            }
        }
    }
}

// ============================================================================
// PolicyExpression
// ============================================================================

/// A policy expression: its verbatim text and the tree evaluated by
/// [`evaluate`](Self::evaluate).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyExpression {
    source: String,
    tree: Result<Disjunction, ExpressionError>,
}

impl PolicyExpression {
    /// Parses caller-authored expression text.
    ///
    /// Parsing never fails eagerly; a malformed expression is kept and
    /// reported by [`evaluate`](Self::evaluate).
    pub fn parse(source: impl Into<String>) -> Self {
        let source = source.into();
        let tree = Parser::new(&source).parse();
        Self { source, tree }
    }

    /// The single-reference expression `data.<name>`.
    pub fn reference(name: &str) -> Self {
        Self {
            source: format!("data.{name}"),
            tree: Ok(Disjunction(vec![vec![Atom::Ref(name.to_string())]])),
        }
    }

    /// Joins two expressions textually and structurally.
    pub fn concat(lhs: &Self, connective: Connective, rhs: &Self) -> Self {
        let source = format!("{}{}{}", lhs.source, connective.symbol(), rhs.source);
        let tree = match (&lhs.tree, &rhs.tree) {
            (Ok(l), Ok(r)) => Ok(l.clone().join(connective, r.clone())),
            // A malformed half can still be completed by the other half.
            _ => Parser::new(&source).parse(),
        };
        Self { source, tree }
    }

    /// The expression text.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// The parse failure, if the text is malformed.
    pub fn error(&self) -> Option<&ExpressionError> {
        self.tree.as_ref().err()
    }

    /// Policy names referenced by the expression.
    pub fn references(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        if let Ok(tree) = &self.tree {
            tree.collect_refs(&mut out);
        }
        out
    }

    /// Evaluates against named results. Names absent from `results` are false.
    pub fn evaluate(&self, results: &BTreeMap<String, bool>) -> Result<bool, ExpressionError> {
        match &self.tree {
            Ok(tree) => Ok(tree.evaluate(results)),
            Err(err) => Err(err.clone()),
        }
    }
}

impl fmt::Display for PolicyExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

// ============================================================================
// Parser
// ============================================================================

struct Parser<'s> {
    src: &'s str,
    pos: usize,
    depth: usize,
}

/// Maximum nesting of parenthesized groups.
const MAX_GROUPS: usize = 64;

impl<'s> Parser<'s> {
    fn new(src: &'s str) -> Self {
        Self { src, pos: 0, depth: 0 }
    }

    fn parse(mut self) -> Result<Disjunction, ExpressionError> {
        self.skip_ws();
        if self.pos == self.src.len() {
            return Err(ExpressionError::Empty);
        }
        let tree = self.disjunction()?;
        self.skip_ws();
        match self.peek() {
            None => Ok(tree),
            Some(')') => Err(ExpressionError::Unbalanced { offset: self.pos }),
            Some(_) => Err(self.unexpected()),
        }
    }

    fn disjunction(&mut self) -> Result<Disjunction, ExpressionError> {
        let mut clauses = vec![self.clause()?];
        while self.eat("||") {
            clauses.push(self.clause()?);
        }
        Ok(Disjunction(clauses))
    }

    fn clause(&mut self) -> Result<Vec<Atom>, ExpressionError> {
        let mut atoms = vec![self.atom()?];
        while self.eat("&&") {
            atoms.push(self.atom()?);
        }
        Ok(atoms)
    }

    fn atom(&mut self) -> Result<Atom, ExpressionError> {
        self.skip_ws();
        let open = self.pos;
        if self.eat("(") {
            if self.depth == MAX_GROUPS {
                return Err(ExpressionError::TooDeep { limit: MAX_GROUPS });
            }
            self.depth += 1;
            let inner = self.disjunction()?;
            self.depth -= 1;
            if !self.eat(")") {
                return Err(ExpressionError::Unbalanced { offset: open });
            }
            return Ok(Atom::Group(inner));
        }
        if !self.eat_raw("data") {
            return Err(self.unexpected());
        }
        if self.eat_raw(".") {
            let name = self.name();
            if name.is_empty() {
                return Err(self.unexpected());
            }
            return Ok(Atom::Ref(name.to_string()));
        }
        if self.eat_raw("[") {
            let name = self.quoted()?;
            if !self.eat("]") {
                return Err(self.unexpected());
            }
            return Ok(Atom::Ref(name));
        }
        Err(self.unexpected())
    }

    fn name(&mut self) -> &'s str {
        let src = self.src;
        let rest = &src[self.pos..];
        let len = rest
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
            .unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    fn quoted(&mut self) -> Result<String, ExpressionError> {
        self.skip_ws();
        let quote = match self.peek() {
            Some(q @ ('"' | '\'')) => q,
            Some(_) => return Err(self.unexpected()),
            None => return Err(ExpressionError::UnexpectedEnd),
        };
        let body = &self.src[self.pos + 1..];
        let end = body.find(quote).ok_or(ExpressionError::UnexpectedEnd)?;
        self.pos += 1 + end + 1;
        Ok(body[..end].to_string())
    }

    fn skip_ws(&mut self) {
        let rest = &self.src[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    /// Consumes `token` after optional whitespace.
    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        self.eat_raw(token)
    }

    /// Consumes `token` at the current position.
    fn eat_raw(&mut self, token: &str) -> bool {
        if self.src[self.pos..].starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn unexpected(&self) -> ExpressionError {
        match self.peek() {
            None => ExpressionError::UnexpectedEnd,
            Some(c) => ExpressionError::UnexpectedToken {
                found: format!("'{c}'"),
                offset: self.pos,
            },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
