use super::lexer::{tokenize, Token};
use crate::buffer::Value;
use crate::error::{EtlError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Column(String),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Column names the expression reads
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Column(name) => out.push(name),
            Expr::Unary { expr, .. } => expr.collect_columns(out),
            Expr::Binary { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::Call { args, .. } => args.iter().for_each(|a| a.collect_columns(out)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `name = expr`: derive or overwrite a column
    Assign { target: String, expr: Expr },
    /// `where expr`: keep rows where the predicate holds
    Where(Expr),
    /// A bare expression
    Expr(Expr),
}

/// Deepest nesting a formula may reach, by call depth and by tree height
const MAX_DEPTH: usize = 256;

fn too_deep() -> EtlError {
    EtlError::Expression("expression nests too deeply".into())
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(EtlError::Expression(format!(
                "expected {expected:?}, found {token:?}"
            ))),
            None => Err(EtlError::Expression(format!(
                "expected {expected:?}, found end of input"
            ))),
        }
    }

    fn statement(&mut self) -> Result<Statement> {
        match (self.peek(), self.peek_at(1)) {
            (Some(Token::Where), _) => {
                self.pos += 1;
                Ok(Statement::Where(self.expr(0)?))
            }
            (Some(Token::Ident(name)), Some(Token::Assign)) => {
                let target = name.clone();
                self.pos += 2;
                Ok(Statement::Assign {
                    target,
                    expr: self.expr(0)?,
                })
            }
            _ => Ok(Statement::Expr(self.expr(0)?)),
        }
    }

    fn infix(token: &Token) -> Option<(BinaryOp, u8, u8)> {
        let op = match token {
            Token::Or => (BinaryOp::Or, 1, 2),
            Token::And => (BinaryOp::And, 3, 4),
            Token::EqEq => (BinaryOp::Eq, 7, 8),
            Token::NotEq => (BinaryOp::NotEq, 7, 8),
            Token::Lt => (BinaryOp::Lt, 7, 8),
            Token::Le => (BinaryOp::Le, 7, 8),
            Token::Gt => (BinaryOp::Gt, 7, 8),
            Token::Ge => (BinaryOp::Ge, 7, 8),
            Token::Plus => (BinaryOp::Add, 9, 10),
            Token::Minus => (BinaryOp::Sub, 9, 10),
            Token::Star => (BinaryOp::Mul, 11, 12),
            Token::Slash => (BinaryOp::Div, 11, 12),
            Token::Percent => (BinaryOp::Mod, 11, 12),
            Token::Power => (BinaryOp::Pow, 15, 14),
            _ => return None,
        };
        Some(op)
    }

    fn expr(&mut self, min_bp: u8) -> Result<Expr> {
        Ok(self.expr_bp(min_bp)?.0)
    }

    /// Parse at binding power `min_bp`, returning the tree and its height
    fn expr_bp(&mut self, min_bp: u8) -> Result<(Expr, usize)> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(too_deep());
        }
        let (mut lhs, mut height) = self.prefix()?;
        while let Some((op, l_bp, r_bp)) = self.peek().and_then(Self::infix) {
            if l_bp < min_bp {
                break;
            }
            self.pos += 1;
            let (rhs, rhs_height) = self.expr_bp(r_bp)?;
            height = height.max(rhs_height) + 1;
            if height > MAX_DEPTH {
                return Err(too_deep());
            }
            lhs = Expr::Binary {
                op,
                left: Box::new(lhs),
                right: Box::new(rhs),
            };
        }
        self.depth -= 1;
        Ok((lhs, height))
    }

    fn prefix(&mut self) -> Result<(Expr, usize)> {
        let token = self
            .next()
            .ok_or_else(|| EtlError::Expression("unexpected end of expression".into()))?;
        match token {
            Token::Int(i) => Ok((Expr::Literal(Value::Int(i)), 1)),
            Token::Float(f) => Ok((Expr::Literal(Value::Float(f)), 1)),
            Token::Str(s) => Ok((Expr::Literal(Value::Str(s)), 1)),
            Token::True => Ok((Expr::Literal(Value::Bool(true)), 1)),
            Token::False => Ok((Expr::Literal(Value::Bool(false)), 1)),
            Token::Null => Ok((Expr::Literal(Value::Null), 1)),
            Token::Minus => {
                let (expr, height) = self.expr_bp(13)?;
                let unary = Expr::Unary {
                    op: UnaryOp::Neg,
                    expr: Box::new(expr),
                };
                Ok((unary, height + 1))
            }
            Token::Plus => self.expr_bp(13),
            Token::Not => {
                let (expr, height) = self.expr_bp(5)?;
                let unary = Expr::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(expr),
                };
                Ok((unary, height + 1))
            }
            Token::LParen => {
                let inner = self.expr_bp(0)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) if self.peek() == Some(&Token::LParen) => {
                self.pos += 1;
                let mut args = Vec::new();
                let mut height = 0;
                if self.peek() != Some(&Token::RParen) {
                    loop {
                        let (arg, arg_height) = self.expr_bp(0)?;
                        height = height.max(arg_height);
                        args.push(arg);
                        if self.peek() == Some(&Token::Comma) {
                            self.pos += 1;
                        } else {
                            break;
                        }
                    }
                }
                self.expect(Token::RParen)?;
                let call = Expr::Call {
                    name: name.to_ascii_lowercase(),
                    args,
                };
                Ok((call, height + 1))
            }
            Token::Ident(name) => Ok((Expr::Column(name), 1)),
            other => Err(EtlError::Expression(format!("unexpected token {other:?}"))),
        }
    }
}

/// Parse a program: statements separated by `;` or newlines
pub fn parse_program(source: &str) -> Result<Vec<Statement>> {
    let tokens = tokenize(source)?;
    let mut statements = Vec::new();
    for chunk in tokens.split(|t| *t == Token::Separator) {
        if chunk.is_empty() {
            continue;
        }
        let mut parser = Parser {
            tokens: chunk.to_vec(),
            pos: 0,
            depth: 0,
        };
        let statement = parser.statement()?;
        if let Some(extra) = parser.peek() {
            return Err(EtlError::Expression(format!(
                "unexpected token {extra:?} after end of statement"
            )));
        }
        statements.push(statement);
    }
    Ok(statements)
}

/// Parse a single statement (formula strings)
pub fn parse_statement(source: &str) -> Result<Statement> {
    let mut statements = parse_program(source)?;
    match statements.len() {
        1 => Ok(statements.remove(0)),
        0 => Err(EtlError::Expression("empty expression".into())),
        n => Err(EtlError::Expression(format!(
            "expected a single statement, found {n}"
        ))),
    }
}
