//! Textual expression backend.
//!
//! Compiles cut/weight strings such as `njets>=4 && jets_pt[0] > 30` into
//! [`NamedFunc`]s against a declared field schema. The parser builds its result
//! from the same combinators code uses directly, so scalar/vector broadcasting
//! behaves identically for both paths.
//!
//! Supports arithmetic (+, -, *, /, %), comparisons (==, !=, <, <=, >, >=),
//! boolean operators (&&, ||, !), indexing (`v[i]`), element-wise functions
//! (abs, sqrt, log, exp, pow, min, max) and vector reductions (sum, count,
//! maxof, minof).

use std::collections::HashMap;

use ys_core::{Error, FieldKind, Result};

use crate::backend::ExpressionBackend;
use crate::named_func::NamedFunc;

/// Formula compiler bound to one row schema.
#[derive(Debug, Clone, Default)]
pub struct FormulaBackend {
    fields: HashMap<String, FieldKind>,
}

impl FormulaBackend {
    /// Backend for the given `(name, kind)` field declarations.
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (S, FieldKind)>,
        S: Into<String>,
    {
        Self { fields: fields.into_iter().map(|(n, k)| (n.into(), k)).collect() }
    }

    /// Declared kind of a field, if any.
    pub fn field_kind(&self, name: &str) -> Option<FieldKind> {
        self.fields.get(name).copied()
    }
}

impl ExpressionBackend for FormulaBackend {
    fn compile(&self, text: &str) -> Result<NamedFunc> {
        let tokens = tokenize(text)?;
        if tokens.is_empty() {
            return Err(Error::Expression("empty expression".into()));
        }
        let mut parser = Parser { tokens: &tokens, pos: 0, backend: self };
        let expr = parser.parse_or()?;
        if parser.pos < parser.tokens.len() {
            return Err(Error::Expression(format!(
                "unexpected token after expression: {:?}",
                parser.tokens[parser.pos]
            )));
        }
        let name: String = text.split_whitespace().collect();
        Ok(expr.with_name(name))
    }
}

// ── Tokenizer ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if let Some(&next) = chars.get(i + 1) {
            let tok = match (c, next) {
                ('&', '&') => Some(Token::And),
                ('|', '|') => Some(Token::Or),
                ('=', '=') => Some(Token::Eq),
                ('!', '=') => Some(Token::Ne),
                ('<', '=') => Some(Token::Le),
                ('>', '=') => Some(Token::Ge),
                _ => None,
            };
            if let Some(t) = tok {
                tokens.push(t);
                i += 2;
                continue;
            }
        }

        let single = match c {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '%' => Some(Token::Percent),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            ',' => Some(Token::Comma),
            '<' => Some(Token::Lt),
            '>' => Some(Token::Gt),
            '!' => Some(Token::Not),
            _ => None,
        };
        if let Some(t) = single {
            tokens.push(t);
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_ascii_digit()
                    || chars[i] == '.'
                    || chars[i] == 'e'
                    || chars[i] == 'E'
                    || ((chars[i] == '+' || chars[i] == '-')
                        && i > start
                        && (chars[i - 1] == 'e' || chars[i - 1] == 'E')))
            {
                i += 1;
            }
            let s: String = chars[start..i].iter().collect();
            let n: f64 =
                s.parse().map_err(|_| Error::Expression(format!("invalid number: '{s}'")))?;
            tokens.push(Token::Num(n));
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            return Err(Error::Expression(format!("unexpected character: '{c}'")));
        }
    }

    Ok(tokens)
}

// ── Parser (recursive descent) ─────────────────────────────────

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    backend: &'a FormulaBackend,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.advance() {
            Some(t) if t == expected => Ok(()),
            other => Err(Error::Expression(format!("expected {expected:?}, got {other:?}"))),
        }
    }

    fn parse_or(&mut self) -> Result<NamedFunc> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Or)) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = lhs.or(rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<NamedFunc> {
        let mut lhs = self.parse_cmp()?;
        while matches!(self.peek(), Some(Token::And)) {
            self.advance();
            let rhs = self.parse_cmp()?;
            lhs = lhs.and(rhs);
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<NamedFunc> {
        let lhs = self.parse_add()?;
        let op: fn(&NamedFunc, NamedFunc) -> NamedFunc = match self.peek() {
            Some(Token::Eq) => |a, b| a.equal(b),
            Some(Token::Ne) => |a, b| a.not_equal(b),
            Some(Token::Lt) => |a, b| a.less(b),
            Some(Token::Le) => |a, b| a.less_equal(b),
            Some(Token::Gt) => |a, b| a.greater(b),
            Some(Token::Ge) => |a, b| a.greater_equal(b),
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_add()?;
        Ok(op(&lhs, rhs))
    }

    fn parse_add(&mut self) -> Result<NamedFunc> {
        let mut lhs = self.parse_mul()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.advance();
                    lhs = lhs + self.parse_mul()?;
                }
                Some(Token::Minus) => {
                    self.advance();
                    lhs = lhs - self.parse_mul()?;
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<NamedFunc> {
        let mut lhs = self.parse_unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.advance();
                    lhs = lhs * self.parse_unary()?;
                }
                Some(Token::Slash) => {
                    self.advance();
                    lhs = lhs / self.parse_unary()?;
                }
                Some(Token::Percent) => {
                    self.advance();
                    lhs = lhs % self.parse_unary()?;
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<NamedFunc> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                Ok(-self.parse_unary()?)
            }
            Some(Token::Plus) => {
                self.advance();
                self.parse_unary()
            }
            Some(Token::Not) => {
                self.advance();
                Ok(!self.parse_unary()?)
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<NamedFunc> {
        let mut e = self.parse_atom()?;
        while matches!(self.peek(), Some(Token::LBracket)) {
            self.advance();
            let index = self.parse_or()?;
            self.expect(&Token::RBracket)?;
            if !e.is_vector() {
                return Err(Error::Expression(format!("cannot index scalar '{}'", e.name())));
            }
            e = e.at(index);
        }
        Ok(e)
    }

    fn parse_atom(&mut self) -> Result<NamedFunc> {
        match self.advance().cloned() {
            Some(Token::Num(n)) => Ok(NamedFunc::constant(n)),
            Some(Token::LParen) => {
                let e = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(e)
            }
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.advance(); // consume '('
                    let mut args = vec![self.parse_or()?];
                    while matches!(self.peek(), Some(Token::Comma)) {
                        self.advance();
                        args.push(self.parse_or()?);
                    }
                    self.expect(&Token::RParen)?;
                    call(&name, args)
                } else {
                    self.resolve_field(&name)
                }
            }
            other => Err(Error::Expression(format!(
                "expected number, identifier, or '(', got {other:?}"
            ))),
        }
    }

    fn resolve_field(&self, name: &str) -> Result<NamedFunc> {
        match self.backend.field_kind(name) {
            Some(FieldKind::Scalar) => Ok(NamedFunc::field(name)),
            Some(FieldKind::Vector) => Ok(NamedFunc::vector_field(name)),
            None => Err(Error::Expression(format!("unknown field: '{name}'"))),
        }
    }
}

fn call(name: &str, mut args: Vec<NamedFunc>) -> Result<NamedFunc> {
    let arity = match name {
        "abs" | "sqrt" | "log" | "exp" | "sum" | "count" | "maxof" | "minof" => 1,
        "pow" | "min" | "max" => 2,
        _ => return Err(Error::Expression(format!("unknown function: '{name}'"))),
    };
    if args.len() != arity {
        return Err(Error::Expression(format!(
            "function '{name}' takes {arity} argument(s), got {}",
            args.len()
        )));
    }
    let a0 = args.remove(0);
    Ok(match name {
        "abs" => a0.map("abs", f64::abs),
        "sqrt" => a0.map("sqrt", f64::sqrt),
        "log" => a0.map("log", f64::ln),
        "exp" => a0.map("exp", f64::exp),
        "sum" => a0.sum(),
        "count" => a0.count(),
        "maxof" => a0.max_of(),
        "minof" => a0.min_of(),
        "pow" => a0.pow(args.remove(0)),
        "min" => a0.min(args.remove(0)),
        _ => a0.max(args.remove(0)),
    })
}

// ── Tests ──────────────────────────────────────────────────────
