//! Boolean condition expressions gating agent execution.
//!
//! Conditions are parsed once when configuration is loaded and evaluated
//! against the run [`Context`] right before an agent would start.
//!
//! Grammar:
//!
//! ```text
//! expr    := or
//! or      := and ( "||" and )*
//! and     := unary ( "&&" unary )*
//! unary   := "!" unary | primary
//! primary := "(" expr ")" | "true" | "false" | key [ ("==" | "!=") value ]
//! value   := "quoted string" | number | true | false | bare-word
//! ```
//!
//! A bare `key` is true when the key is present and truthy. Comparisons
//! against a missing key are false for `==` and true for `!=`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Values visible to conditions and executors during a run.
pub type Context = HashMap<String, Value>;

/// A parsed condition expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Condition {
    source: String,
    expr: Expr,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(bool),
    Truthy(String),
    Compare {
        key: String,
        op: CompareOp,
        value: Literal,
    },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Str(String),
    Num(f64),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Not,
    And,
    Or,
    Eq,
    Ne,
    Str(String),
    Num(f64),
    Ident(String),
}

impl Condition {
    /// Parse a condition expression.
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(Error::Config("condition is empty".to_string()));
        }
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            source,
        };
        let expr = parser.parse_or()?;
        if parser.pos != tokens.len() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(Self {
            source: source.trim().to_string(),
            expr,
        })
    }

    /// The expression text as written in the configuration.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate the condition against the given context.
    pub fn evaluate(&self, context: &Context) -> bool {
        eval(&self.expr, context)
    }
}

impl PartialEq for Condition {
    fn eq(&self, other: &Self) -> bool {
        self.expr == other.expr
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::str::FromStr for Condition {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Condition {
    type Error = Error;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Condition> for String {
    fn from(condition: Condition) -> Self {
        condition.source
    }
}

fn eval(expr: &Expr, context: &Context) -> bool {
    match expr {
        Expr::Literal(b) => *b,
        Expr::Truthy(key) => context.get(key).is_some_and(is_truthy),
        Expr::Compare { key, op, value } => {
            let equal = context.get(key).is_some_and(|v| value_matches(v, value));
            match op {
                CompareOp::Eq => equal,
                CompareOp::Ne => !equal,
            }
        }
        Expr::Not(inner) => !eval(inner, context),
        Expr::And(lhs, rhs) => eval(lhs, context) && eval(rhs, context),
        Expr::Or(lhs, rhs) => eval(lhs, context) || eval(rhs, context),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn value_matches(value: &Value, literal: &Literal) -> bool {
    match (value, literal) {
        (Value::Bool(b), Literal::Bool(l)) => b == l,
        (Value::Number(n), Literal::Num(l)) => n.as_f64() == Some(*l),
        (Value::String(s), Literal::Str(l)) => s == l,
        // Mixed kinds fall back to comparing the textual form, so `port == "80"`
        // and `flag == "true"` behave the way config authors expect.
        (Value::String(s), Literal::Num(l)) => s.parse::<f64>().ok() == Some(*l),
        (Value::String(s), Literal::Bool(l)) => s == if *l { "true" } else { "false" },
        (Value::Number(n), Literal::Str(l)) => l.parse::<f64>().ok() == n.as_f64(),
        (Value::Bool(b), Literal::Str(l)) => l == if *b { "true" } else { "false" },
        _ => false,
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '"' | '\'' => {
                let quote = c;
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != quote {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(Error::Config(format!(
                        "unterminated string in condition '{}'",
                        source
                    )));
                }
                tokens.push(Token::Str(chars[start..end].iter().collect()));
                i = end + 1;
            }
            c if c.is_ascii_digit() || (c == '-' && next_is_digit(&chars, i)) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let num = text.parse::<f64>().map_err(|_| {
                    Error::Config(format!("invalid number '{}' in condition '{}'", text, source))
                })?;
                tokens.push(Token::Num(num));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || matches!(chars[i], '_' | '.' | '-'))
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(Error::Config(format!(
                    "unexpected character '{}' in condition '{}'",
                    other, source
                )));
            }
        }
    }

    Ok(tokens)
}

fn next_is_digit(chars: &[char], i: usize) -> bool {
    chars.get(i + 1).is_some_and(|c| c.is_ascii_digit())
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    source: &'a str,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, what: &str) -> Error {
        Error::Config(format!(
            "{} at token {} in condition '{}'",
            what, self.pos, self.source
        ))
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.next().cloned() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.error("expected ')'")),
                }
            }
            Some(Token::Ident(word)) if word == "true" => Ok(Expr::Literal(true)),
            Some(Token::Ident(word)) if word == "false" => Ok(Expr::Literal(false)),
            Some(Token::Ident(key)) => {
                let op = match self.peek() {
                    Some(Token::Eq) => CompareOp::Eq,
                    Some(Token::Ne) => CompareOp::Ne,
                    _ => return Ok(Expr::Truthy(key)),
                };
                self.pos += 1;
                let value = self.parse_value()?;
                Ok(Expr::Compare { key, op, value })
            }
            Some(_) => {
                self.pos -= 1;
                Err(self.error("expected key, literal or '('"))
            }
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn parse_value(&mut self) -> Result<Literal> {
        match self.next().cloned() {
            Some(Token::Str(s)) => Ok(Literal::Str(s)),
            Some(Token::Num(n)) => Ok(Literal::Num(n)),
            Some(Token::Ident(word)) => Ok(match word.as_str() {
                "true" => Literal::Bool(true),
                "false" => Literal::Bool(false),
                _ => Literal::Str(word),
            }),
            _ => Err(self.error("expected value after comparison")),
        }
    }
}
