//! Recursive-descent parser for the condition expression language.
//!
//! The grammar is the whitelist: anything it cannot derive is rejected here,
//! before evaluation. Call forms, lambdas, comprehensions, conditional
//! expressions, and assignments all surface as `UnsupportedConstruct`.

use super::lexer::Token;
use super::ExprError;

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// The null literal
    Null,
    /// A boolean literal
    Bool(bool),
    /// An integer literal
    Int(i64),
    /// A float literal
    Float(f64),
    /// A string literal
    Str(String),
    /// A list or tuple literal
    List(Vec<Expr>),
    /// A dict literal
    Dict(Vec<(Expr, Expr)>),
    /// A bare name; only `context` resolves at evaluation time
    Name(String),
    /// Attribute access, `base.name`
    Attr(Box<Expr>, String),
    /// Subscription, `base[index]`
    Index(Box<Expr>, Box<Expr>),
    /// A unary operation
    Unary(UnaryOp, Box<Expr>),
    /// A binary operation
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// Short-circuit conjunction
    And(Box<Expr>, Box<Expr>),
    /// Short-circuit disjunction
    Or(Box<Expr>, Box<Expr>),
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

/// Parse a token stream into an expression tree
pub fn parse(tokens: &[Token]) -> Result<Expr, ExprError> {
    let mut parser = Parser { tokens, pos: 0 };
    if tokens.is_empty() {
        return Err(ExprError::Parse("empty expression".to_string()));
    }
    let expr = parser.parse_or()?;
    match parser.peek() {
        None => Ok(expr),
        Some(Token::Assign) => Err(ExprError::UnsupportedConstruct(
            "assignment is not allowed in conditions".to_string(),
        )),
        Some(token) => Err(ExprError::Parse(format!(
            "unexpected trailing token {token:?}"
        ))),
    }
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ExprError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(ExprError::Parse(format!(
                "expected {expected:?}, found {:?}",
                self.peek()
            )))
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_not()?;
        while self.eat(&Token::And) {
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Not) {
            let operand = self.parse_not()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        let left = self.parse_additive()?;

        let op = match self.peek() {
            Some(Token::Eq) => Some(BinOp::Eq),
            Some(Token::Ne) => Some(BinOp::Ne),
            Some(Token::Lt) => Some(BinOp::Lt),
            Some(Token::Le) => Some(BinOp::Le),
            Some(Token::Gt) => Some(BinOp::Gt),
            Some(Token::Ge) => Some(BinOp::Ge),
            Some(Token::In) => Some(BinOp::In),
            Some(Token::Is) => Some(BinOp::Is),
            Some(Token::Not) => Some(BinOp::NotIn),
            _ => None,
        };
        let Some(mut op) = op else {
            return Ok(left);
        };
        self.advance();

        // `not in` and `is not` are two-token operators.
        match op {
            BinOp::NotIn => self.expect(&Token::In)?,
            BinOp::Is => {
                if self.eat(&Token::Not) {
                    op = BinOp::IsNot;
                }
            }
            _ => {}
        }

        let right = self.parse_additive()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn parse_additive(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::SlashSlash) => BinOp::FloorDiv,
                Some(Token::Percent) => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Minus) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(operand)));
        }
        if self.eat(&Token::Plus) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Pos, Box::new(operand)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    let name = match self.advance() {
                        Some(Token::Ident(name)) => name.clone(),
                        other => {
                            return Err(ExprError::Parse(format!(
                                "expected attribute name after '.', found {other:?}"
                            )))
                        }
                    };
                    expr = Expr::Attr(Box::new(expr), name);
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let index = self.parse_or()?;
                    self.expect(&Token::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                Some(Token::LParen) => {
                    return Err(ExprError::UnsupportedConstruct(
                        "function calls are not allowed in conditions".to_string(),
                    ));
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let token = self
            .advance()
            .ok_or_else(|| ExprError::Parse("unexpected end of expression".to_string()))?
            .clone();

        match token {
            Token::NoneLit => Ok(Expr::Null),
            Token::TrueLit => Ok(Expr::Bool(true)),
            Token::FalseLit => Ok(Expr::Bool(false)),
            Token::Int(value) => Ok(Expr::Int(value)),
            Token::Float(value) => Ok(Expr::Float(value)),
            Token::Str(value) => Ok(Expr::Str(value)),
            Token::Ident(name) => Ok(Expr::Name(name)),
            Token::Lambda => Err(ExprError::UnsupportedConstruct(
                "lambda expressions are not allowed in conditions".to_string(),
            )),
            Token::If | Token::Else => Err(ExprError::UnsupportedConstruct(
                "conditional expressions are not allowed in conditions".to_string(),
            )),
            Token::LParen => {
                // Parenthesised expression or tuple literal.
                let first = self.parse_or()?;
                if self.eat(&Token::Comma) {
                    let mut items = vec![first];
                    while self.peek() != Some(&Token::RParen) {
                        items.push(self.parse_or()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    self.expect(&Token::RParen)?;
                    Ok(Expr::List(items))
                } else {
                    self.expect(&Token::RParen)?;
                    Ok(first)
                }
            }
            Token::LBracket => {
                let mut items = Vec::new();
                while self.peek() != Some(&Token::RBracket) {
                    items.push(self.parse_or()?);
                    if self.peek() == Some(&Token::For) {
                        return Err(ExprError::UnsupportedConstruct(
                            "comprehensions are not allowed in conditions".to_string(),
                        ));
                    }
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RBracket)?;
                Ok(Expr::List(items))
            }
            Token::LBrace => {
                let mut entries = Vec::new();
                while self.peek() != Some(&Token::RBrace) {
                    let key = self.parse_or()?;
                    self.expect(&Token::Colon)?;
                    let value = self.parse_or()?;
                    if self.peek() == Some(&Token::For) {
                        return Err(ExprError::UnsupportedConstruct(
                            "comprehensions are not allowed in conditions".to_string(),
                        ));
                    }
                    entries.push((key, value));
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RBrace)?;
                Ok(Expr::Dict(entries))
            }
            Token::Assign => Err(ExprError::UnsupportedConstruct(
                "assignment is not allowed in conditions".to_string(),
            )),
            other => Err(ExprError::Parse(format!("unexpected token {other:?}"))),
        }
    }
}
