//! Tokenizer for rule text.

use serde_json::{Number, Value};

use crate::error::SyntaxError;

/// Comparison operator of a rule. `=` and `==` both lex to [`CmpOp::Eq`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
}

impl CmpOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }
}

/// Arithmetic operator inside an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl ArithOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    Literal(Value),
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Arith(ArithOp),
    Cmp(CmpOp),
}

impl Token {
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Ident(name) => format!("identifier '{name}'"),
            Self::Literal(value) => format!("literal {value}"),
            Self::Dot => "'.'".to_string(),
            Self::Comma => "','".to_string(),
            Self::LParen => "'('".to_string(),
            Self::RParen => "')'".to_string(),
            Self::LBracket => "'['".to_string(),
            Self::RBracket => "']'".to_string(),
            Self::Arith(op) => format!("'{}'", op.as_str()),
            Self::Cmp(op) => format!("'{}'", op.as_str()),
        }
    }
}

/// A token with its byte offset in the rule text.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub offset: usize,
}

/// Splits rule text into tokens.
pub(crate) fn tokenize(src: &str) -> Result<Vec<Spanned>, SyntaxError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while let Some(&b) = bytes.get(pos) {
        let offset = pos;
        let token = match b {
            b' ' | b'\t' | b'\r' | b'\n' => {
                pos += 1;
                continue;
            }
            b'.' if bytes.get(pos + 1).is_some_and(u8::is_ascii_digit) => {
                let (value, end) = lex_number(src, pos)?;
                pos = end;
                Token::Literal(value)
            }
            b'0'..=b'9' => {
                let (value, end) = lex_number(src, pos)?;
                pos = end;
                Token::Literal(value)
            }
            b'"' | b'\'' => {
                let (text, end) = lex_string(src, pos)?;
                pos = end;
                Token::Literal(Value::String(text))
            }
            b if b.is_ascii_alphabetic() || b == b'_' || b == b'$' => {
                let end = bytes[pos..]
                    .iter()
                    .position(|c| !(c.is_ascii_alphanumeric() || *c == b'_' || *c == b'$'))
                    .map_or(bytes.len(), |n| pos + n);
                let word = &src[pos..end];
                pos = end;
                match word {
                    "true" => Token::Literal(Value::Bool(true)),
                    "false" => Token::Literal(Value::Bool(false)),
                    "null" => Token::Literal(Value::Null),
                    _ => Token::Ident(word.to_string()),
                }
            }
            b'.' => single(&mut pos, Token::Dot),
            b',' => single(&mut pos, Token::Comma),
            b'(' => single(&mut pos, Token::LParen),
            b')' => single(&mut pos, Token::RParen),
            b'[' => single(&mut pos, Token::LBracket),
            b']' => single(&mut pos, Token::RBracket),
            b'+' => single(&mut pos, Token::Arith(ArithOp::Add)),
            b'-' => single(&mut pos, Token::Arith(ArithOp::Sub)),
            b'*' => single(&mut pos, Token::Arith(ArithOp::Mul)),
            b'/' => single(&mut pos, Token::Arith(ArithOp::Div)),
            b'%' => single(&mut pos, Token::Arith(ArithOp::Rem)),
            b'<' | b'>' | b'=' | b'!' => {
                let followed_by_eq = bytes.get(pos + 1) == Some(&b'=');
                let op = match (b, followed_by_eq) {
                    (b'<', true) => CmpOp::Le,
                    (b'<', false) => CmpOp::Lt,
                    (b'>', true) => CmpOp::Ge,
                    (b'>', false) => CmpOp::Gt,
                    (b'=', _) => CmpOp::Eq,
                    (b'!', true) => CmpOp::Ne,
                    _ => return Err(SyntaxError::UnexpectedChar { ch: '!', offset }),
                };
                pos += if followed_by_eq { 2 } else { 1 };
                Token::Cmp(op)
            }
            b'&' if bytes.get(pos + 1) == Some(&b'&') => {
                return Err(SyntaxError::Connective { op: "&&", offset });
            }
            b'|' if bytes.get(pos + 1) == Some(&b'|') => {
                return Err(SyntaxError::Connective { op: "||", offset });
            }
            _ => {
                let ch = src[pos..].chars().next().unwrap_or('\u{fffd}');
                return Err(SyntaxError::UnexpectedChar { ch, offset });
            }
        };
        tokens.push(Spanned { token, offset });
    }

    Ok(tokens)
}

fn single(pos: &mut usize, token: Token) -> Token {
    *pos += 1;
    token
}

/// Lexes a decimal literal with optional fraction and exponent.
///
/// Integers that fit in `i64` stay integers; everything else becomes `f64`.
fn lex_number(src: &str, start: usize) -> Result<(Value, usize), SyntaxError> {
    let bytes = src.as_bytes();
    let mut end = start;
    let mut is_float = false;

    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    if bytes.get(end) == Some(&b'.') && bytes.get(end + 1).is_some_and(u8::is_ascii_digit) {
        is_float = true;
        end += 1;
        while bytes.get(end).is_some_and(u8::is_ascii_digit) {
            end += 1;
        }
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        if bytes.get(exp).is_some_and(u8::is_ascii_digit) {
            is_float = true;
            end = exp;
            while bytes.get(end).is_some_and(u8::is_ascii_digit) {
                end += 1;
            }
        }
    }

    let literal = &src[start..end];
    let invalid = || SyntaxError::InvalidNumber {
        literal: literal.to_string(),
    };

    if !is_float {
        if let Ok(n) = literal.parse::<i64>() {
            return Ok((Value::Number(n.into()), end));
        }
    }
    let f: f64 = literal.parse().map_err(|_| invalid())?;
    let number = Number::from_f64(f).ok_or_else(invalid)?;
    Ok((Value::Number(number), end))
}

/// Lexes a quoted string. Supports `\n`, `\t`, `\r`, `\\` and escaped quotes.
fn lex_string(src: &str, start: usize) -> Result<(String, usize), SyntaxError> {
    let quote = src.as_bytes()[start] as char;
    let mut out = String::new();
    let mut chars = src[start + 1..].char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            c if c == quote => return Ok((out, start + 1 + i + 1)),
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, other)) => out.push(other),
                None => break,
            },
            c => out.push(c),
        }
    }

    Err(SyntaxError::UnterminatedString { offset: start })
}
