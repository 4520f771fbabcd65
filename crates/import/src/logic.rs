//! Boolean expressions over condition ids, e.g. `(1 OR 2) AND NOT 3`.
//!
//! Operators are case-insensitive and accepted in English or German:
//! `AND`/`UND`, `OR`/`ODER`, `NOT`/`NICHT`. Precedence is NOT > AND > OR.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Ref(u32),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Unknown ids evaluate to `false`.
    pub fn evaluate(&self, results: &HashMap<u32, bool>) -> bool {
        match self {
            Expr::Ref(id) => results.get(id).copied().unwrap_or(false),
            Expr::Not(inner) => !inner.evaluate(results),
            Expr::And(a, b) => a.evaluate(results) && b.evaluate(results),
            Expr::Or(a, b) => a.evaluate(results) || b.evaluate(results),
        }
    }

    pub fn references(&self) -> Vec<u32> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs(&self, out: &mut Vec<u32>) {
        match self {
            Expr::Ref(id) => out.push(*id),
            Expr::Not(inner) => inner.collect_refs(out),
            Expr::And(a, b) | Expr::Or(a, b) => {
                a.collect_refs(out);
                b.collect_refs(out);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogicParseError {
    #[error("empty expression")]
    Empty,
    #[error("unknown word '{0}'")]
    UnknownWord(String),
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("number out of range: {0}")]
    BadNumber(String),
    #[error("unexpected {found} at token {position}")]
    UnexpectedToken { position: usize, found: String },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("reference to undeclared condition {0}")]
    UnknownReference(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Num(u32),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Num(n) => format!("'{n}'"),
            Token::And => "AND".to_string(),
            Token::Or => "OR".to_string(),
            Token::Not => "NOT".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, LogicParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '(' {
            chars.next();
            tokens.push(Token::LParen);
        } else if c == ')' {
            chars.next();
            tokens.push(Token::RParen);
        } else if c.is_ascii_digit() || c.is_alphabetic() {
            let numeric = c.is_ascii_digit();
            let mut end = start;
            while let Some(&(idx, ch)) = chars.peek() {
                let same_kind = if numeric { ch.is_ascii_digit() } else { ch.is_alphabetic() };
                if !same_kind {
                    break;
                }
                end = idx + ch.len_utf8();
                chars.next();
            }
            let word = &input[start..end];
            if numeric {
                let n = word
                    .parse::<u32>()
                    .map_err(|_| LogicParseError::BadNumber(word.to_string()))?;
                tokens.push(Token::Num(n));
            } else {
                tokens.push(match word.to_uppercase().as_str() {
                    "AND" | "UND" => Token::And,
                    "OR" | "ODER" => Token::Or,
                    "NOT" | "NICHT" => Token::Not,
                    _ => return Err(LogicParseError::UnknownWord(word.to_string())),
                });
            }
        } else {
            return Err(LogicParseError::UnexpectedChar(c));
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn unexpected(&self, token: &Token) -> LogicParseError {
        LogicParseError::UnexpectedToken {
            position: self.pos,
            found: token.describe(),
        }
    }

    fn or_expr(&mut self) -> Result<Expr, LogicParseError> {
        let mut left = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, LogicParseError> {
        let mut left = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, LogicParseError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, LogicParseError> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Expr::Ref(n)),
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(other) => {
                        self.pos -= 1;
                        Err(self.unexpected(&other))
                    }
                    None => Err(LogicParseError::UnexpectedEnd),
                }
            }
            Some(other) => {
                self.pos -= 1;
                Err(self.unexpected(&other))
            }
            None => Err(LogicParseError::UnexpectedEnd),
        }
    }
}

/// Parses a condition-logic string into an expression tree.
pub fn parse(input: &str) -> Result<Expr, LogicParseError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(LogicParseError::Empty);
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or_expr()?;
    if let Some(extra) = parser.peek().cloned() {
        return Err(parser.unexpected(&extra));
    }
    Ok(expr)
}

/// Like [`parse`], but also rejects references to ids not in `declared`.
pub fn parse_for(input: &str, declared: &[u32]) -> Result<Expr, LogicParseError> {
    let expr = parse(input)?;
    if let Some(id) = expr.references().into_iter().find(|id| !declared.contains(id)) {
        return Err(LogicParseError::UnknownReference(id));
    }
    Ok(expr)
}
