//! Tokenizer and precedence-climbing parser for condition expressions.

use serde_json::Value;

use super::ExprError;

/// Deepest nesting accepted before parsing gives up.
const MAX_DEPTH: usize = 64;

/// Longest token stream accepted. Operator chains parse into left-deep
/// trees that evaluation walks recursively, so their length is bounded too.
const MAX_TOKENS: usize = 512;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Bang,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    And,
    Or,
    Question,
    Colon,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    And,
    Or,
}

impl BinaryOp {
    fn precedence(self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            Self::Eq | Self::Ne | Self::StrictEq | Self::StrictNe => 3,
            Self::Lt | Self::Le | Self::Gt | Self::Ge => 4,
            Self::Add | Self::Sub => 5,
            Self::Mul | Self::Div | Self::Rem => 6,
        }
    }

    fn from_token(token: &Token) -> Option<Self> {
        Some(match token {
            Token::Plus => Self::Add,
            Token::Minus => Self::Sub,
            Token::Star => Self::Mul,
            Token::Slash => Self::Div,
            Token::Percent => Self::Rem,
            Token::Lt => Self::Lt,
            Token::Le => Self::Le,
            Token::Gt => Self::Gt,
            Token::Ge => Self::Ge,
            Token::Eq => Self::Eq,
            Token::Ne => Self::Ne,
            Token::StrictEq => Self::StrictEq,
            Token::StrictNe => Self::StrictNe,
            Token::And => Self::And,
            Token::Or => Self::Or,
            _ => return None,
        })
    }
}

/// Parsed expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call {
        target: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>, ExprError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        let two = bytes.get(pos..pos + 2).unwrap_or(&[]);
        let three = bytes.get(pos..pos + 3).unwrap_or(&[]);

        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }
        if three == b"===" || three == b"!==" {
            tokens.push(if c == b'=' {
                Token::StrictEq
            } else {
                Token::StrictNe
            });
            pos += 3;
            continue;
        }
        let pair = match two {
            b"==" => Some(Token::Eq),
            b"!=" => Some(Token::Ne),
            b"<=" => Some(Token::Le),
            b">=" => Some(Token::Ge),
            b"&&" => Some(Token::And),
            b"||" => Some(Token::Or),
            _ => None,
        };
        if let Some(token) = pair {
            tokens.push(token);
            pos += 2;
            continue;
        }

        let single = match c {
            b'.' if !bytes.get(pos + 1).is_some_and(u8::is_ascii_digit) => Some(Token::Dot),
            b',' => Some(Token::Comma),
            b'(' => Some(Token::LParen),
            b')' => Some(Token::RParen),
            b'[' => Some(Token::LBracket),
            b']' => Some(Token::RBracket),
            b'!' => Some(Token::Bang),
            b'+' => Some(Token::Plus),
            b'-' => Some(Token::Minus),
            b'*' => Some(Token::Star),
            b'/' => Some(Token::Slash),
            b'%' => Some(Token::Percent),
            b'<' => Some(Token::Lt),
            b'>' => Some(Token::Gt),
            b'?' => Some(Token::Question),
            b':' => Some(Token::Colon),
            _ => None,
        };
        if let Some(token) = single {
            tokens.push(token);
            pos += 1;
            continue;
        }

        if c.is_ascii_digit() || c == b'.' {
            let start = pos;
            while pos < bytes.len() && (bytes[pos].is_ascii_digit() || bytes[pos] == b'.') {
                pos += 1;
            }
            let text = &source[start..pos];
            let value = text.parse::<f64>().map_err(|_| ExprError::Lex {
                expression: source.to_owned(),
                offset: start,
            })?;
            tokens.push(Token::Number(value));
            continue;
        }

        if c == b'"' || c == b'\'' {
            let quote = c;
            let start = pos;
            pos += 1;
            let mut text = String::new();
            loop {
                match bytes.get(pos) {
                    None => {
                        return Err(ExprError::Lex {
                            expression: source.to_owned(),
                            offset: start,
                        });
                    }
                    Some(&b) if b == quote => {
                        pos += 1;
                        break;
                    }
                    Some(b'\\') if pos + 1 < bytes.len() => {
                        text.push(bytes[pos + 1] as char);
                        pos += 2;
                    }
                    Some(_) => {
                        // Copy one UTF-8 scalar.
                        let ch = source[pos..].chars().next().unwrap_or('\u{fffd}');
                        text.push(ch);
                        pos += ch.len_utf8();
                    }
                }
            }
            tokens.push(Token::Str(text));
            continue;
        }

        if c.is_ascii_alphabetic() || c == b'_' || c == b'$' || c == b'@' {
            let start = pos;
            pos += 1;
            while pos < bytes.len()
                && (bytes[pos].is_ascii_alphanumeric() || bytes[pos] == b'_' || bytes[pos] == b'$')
            {
                pos += 1;
            }
            // `@abilities.str.mod` reads the same as `abilities.str.mod`.
            let name = source[start..pos].trim_start_matches('@');
            tokens.push(Token::Ident(name.to_owned()));
            continue;
        }

        return Err(ExprError::Lex {
            expression: source.to_owned(),
            offset: pos,
        });
    }

    Ok(tokens)
}

pub(crate) struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(source: &'a str) -> Result<Self, ExprError> {
        let tokens = tokenize(source)?;
        if tokens.len() > MAX_TOKENS {
            return Err(ExprError::TooLong {
                tokens: tokens.len(),
                max: MAX_TOKENS,
            });
        }
        Ok(Self {
            source,
            tokens,
            pos: 0,
            depth: 0,
        })
    }

    pub(crate) fn parse(mut self) -> Result<Expr, ExprError> {
        if self.tokens.is_empty() {
            return Err(ExprError::Empty);
        }
        let expr = self.expression()?;
        match self.tokens.get(self.pos) {
            None => Ok(expr),
            Some(token) => Err(self.unexpected(token.clone())),
        }
    }

    fn descend(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::TooDeep);
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<Expr, ExprError> {
        self.descend()?;
        let condition = self.binary(0)?;
        let expr = if self.eat(&Token::Question) {
            let then = self.expression()?;
            self.expect(&Token::Colon)?;
            let otherwise = self.expression()?;
            Expr::Conditional(Box::new(condition), Box::new(then), Box::new(otherwise))
        } else {
            condition
        };
        self.depth -= 1;
        Ok(expr)
    }

    fn binary(&mut self, min_precedence: u8) -> Result<Expr, ExprError> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.tokens.get(self.pos).and_then(BinaryOp::from_token) {
            let precedence = op.precedence();
            if precedence <= min_precedence {
                break;
            }
            self.pos += 1;
            let rhs = self.binary(precedence)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        let op = if self.eat(&Token::Bang) {
            Some(UnaryOp::Not)
        } else if self.eat(&Token::Minus) {
            Some(UnaryOp::Neg)
        } else if self.eat(&Token::Plus) {
            None
        } else {
            return self.postfix();
        };
        self.descend()?;
        let operand = self.unary()?;
        self.depth -= 1;
        Ok(match op {
            Some(op) => Expr::Unary(op, Box::new(operand)),
            None => operand,
        })
    }

    fn postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let name = match self.next() {
                    Some(Token::Ident(name)) => name,
                    Some(token) => return Err(self.unexpected(token)),
                    None => return Err(ExprError::UnexpectedEnd(self.source.to_owned())),
                };
                if self.eat(&Token::LParen) {
                    let args = self.arguments()?;
                    expr = Expr::Call {
                        target: Box::new(expr),
                        method: name,
                        args,
                    };
                } else {
                    expr = Expr::Member(Box::new(expr), name);
                }
            } else if self.eat(&Token::LBracket) {
                let index = self.expression()?;
                self.expect(&Token::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            self.expect(&Token::Comma)?;
        }
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Literal(number(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Ident(name)) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" | "undefined" => Expr::Literal(Value::Null),
                _ => Expr::Ident(name),
            }),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(token) => Err(self.unexpected(token)),
            None => Err(ExprError::UnexpectedEnd(self.source.to_owned())),
        }
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.tokens.get(self.pos) == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ExprError> {
        match self.next() {
            Some(ref token) if token == expected => Ok(()),
            Some(token) => Err(self.unexpected(token)),
            None => Err(ExprError::UnexpectedEnd(self.source.to_owned())),
        }
    }

    fn unexpected(&self, token: Token) -> ExprError {
        ExprError::UnexpectedToken {
            expression: self.source.to_owned(),
            token: format!("{token:?}"),
        }
    }
}

pub(crate) fn number(n: f64) -> Value {
    serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
}
