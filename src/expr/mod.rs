//! Constrained expression language used by calculated columns and script steps.
//!
//! Programs are sequences of `name = expr` and `where expr` statements evaluated
//! row by row against a [`Buffer`](crate::buffer::Buffer). There is no access to
//! anything but the buffer's columns and a fixed set of scalar functions.

pub mod eval;
pub mod lexer;
pub mod parser;

pub use eval::{run_program, truthy, Evaluator};
pub use parser::{parse_program, parse_statement, BinaryOp, Expr, Statement, UnaryOp};
