use crate::ExprError;
use crate::lexer::{Token, lex};

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// Compile a source string into an expression tree.
pub fn compile(src: &str) -> Result<Expr, ExprError> {
    let tokens = lex(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expression(0)?;
    if let Some((tok, at)) = parser.peek_with_pos() {
        return Err(ExprError::Compile(format!(
            "unexpected trailing token {tok:?} (at offset {at})"
        )));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_with_pos(&self) -> Option<(&Token, usize)> {
        self.tokens.get(self.pos).map(|(t, p)| (t, *p))
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, want: &Token, what: &str) -> Result<(), ExprError> {
        match self.next() {
            Some(ref tok) if tok == want => Ok(()),
            Some(tok) => Err(ExprError::Compile(format!(
                "expected {what}, found {tok:?}"
            ))),
            None => Err(ExprError::Compile(format!(
                "expected {what}, found end of expression"
            ))),
        }
    }

    // Precedence climbing; higher binds tighter.
    fn expression(&mut self, min_bp: u8) -> Result<Expr, ExprError> {
        let mut lhs = self.prefix()?;

        loop {
            let op = match self.peek() {
                Some(Token::OrOr) => BinaryOp::Or,
                Some(Token::AndAnd) => BinaryOp::And,
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::Ne,
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => break,
            };
            let bp = binding_power(op);
            if bp < min_bp {
                break;
            }
            self.next();
            let rhs = self.expression(bp + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }

        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr, ExprError> {
        let expr = match self.next() {
            Some(Token::Int(n)) => Expr::Int(n),
            Some(Token::Float(f)) => Expr::Float(f),
            Some(Token::Str(s)) => Expr::Str(s),
            Some(Token::True) => Expr::Bool(true),
            Some(Token::False) => Expr::Bool(false),
            Some(Token::Null) => Expr::Null,
            Some(Token::Bang) => {
                let operand = self.prefix()?;
                Expr::Unary(UnaryOp::Not, Box::new(operand))
            }
            Some(Token::Minus) => {
                let operand = self.prefix()?;
                Expr::Unary(UnaryOp::Neg, Box::new(operand))
            }
            Some(Token::LParen) => {
                let inner = self.expression(0)?;
                self.expect(&Token::RParen, "')'")?;
                inner
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.next();
                    let args = self.call_args()?;
                    Expr::Call(name, args)
                } else {
                    Expr::Ident(name)
                }
            }
            Some(tok) => {
                return Err(ExprError::Compile(format!(
                    "unexpected token {tok:?} at start of operand"
                )));
            }
            None => {
                return Err(ExprError::Compile(
                    "unexpected end of expression".to_string(),
                ));
            }
        };

        self.postfix(expr)
    }

    fn postfix(&mut self, mut expr: Expr) -> Result<Expr, ExprError> {
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.next();
                    match self.next() {
                        Some(Token::Ident(field)) => {
                            expr = Expr::Member(Box::new(expr), field);
                        }
                        other => {
                            return Err(ExprError::Compile(format!(
                                "expected field name after '.', found {other:?}"
                            )));
                        }
                    }
                }
                Some(Token::LBracket) => {
                    self.next();
                    let index = self.expression(0)?;
                    self.expect(&Token::RBracket, "']'")?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn call_args(&mut self) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.next();
            return Ok(args);
        }
        loop {
            args.push(self.expression(0)?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                other => {
                    return Err(ExprError::Compile(format!(
                        "expected ',' or ')' in argument list, found {other:?}"
                    )));
                }
            }
        }
    }
}

fn binding_power(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Or => 1,
        BinaryOp::And => 2,
        BinaryOp::Eq | BinaryOp::Ne => 3,
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 4,
        BinaryOp::Add | BinaryOp::Sub => 5,
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 6,
    }
}
