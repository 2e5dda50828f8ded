use std::cmp::Ordering;

use super::parser::{BinaryOp, Expr, Statement, UnaryOp};
use crate::buffer::{Buffer, Column, Value};
use crate::error::{EtlError, Result};

/// Row-wise evaluator over one buffer
pub struct Evaluator<'a> {
    buffer: &'a Buffer,
}

impl<'a> Evaluator<'a> {
    pub fn new(buffer: &'a Buffer) -> Self {
        Self { buffer }
    }

    /// Fail early when the expression reads a column the buffer lacks
    pub fn check_columns(&self, expr: &Expr) -> Result<()> {
        match expr.columns().into_iter().find(|c| !self.buffer.has_column(c)) {
            Some(missing) => Err(EtlError::Expression(format!("unknown column '{missing}'"))),
            None => Ok(()),
        }
    }

    /// Evaluate into a new column of the buffer's length
    pub fn eval_column(&self, expr: &Expr, name: &str) -> Result<Column> {
        self.check_columns(expr)?;
        let values = (0..self.buffer.row_count())
            .map(|row| self.eval_row(expr, row))
            .collect::<Result<Vec<_>>>()?;
        Ok(Column::from_values(name, values))
    }

    /// Row indices where the predicate is truthy
    pub fn matching_rows(&self, expr: &Expr) -> Result<Vec<usize>> {
        self.check_columns(expr)?;
        let mut rows = Vec::new();
        for row in 0..self.buffer.row_count() {
            if truthy(&self.eval_row(expr, row)?) {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    pub fn eval_row(&self, expr: &Expr, row: usize) -> Result<Value> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Column(name) => self
                .buffer
                .column(name)
                .map(|c| c.get(row))
                .ok_or_else(|| EtlError::Expression(format!("unknown column '{name}'"))),
            Expr::Unary { op, expr } => {
                let value = self.eval_row(expr, row)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                    UnaryOp::Neg => negate(value),
                }
            }
            Expr::Binary { op, left, right } => match op {
                BinaryOp::And => {
                    let l = truthy(&self.eval_row(left, row)?);
                    Ok(Value::Bool(l && truthy(&self.eval_row(right, row)?)))
                }
                BinaryOp::Or => {
                    let l = truthy(&self.eval_row(left, row)?);
                    Ok(Value::Bool(l || truthy(&self.eval_row(right, row)?)))
                }
                _ => binary(*op, self.eval_row(left, row)?, self.eval_row(right, row)?),
            },
            Expr::Call { name, args } => {
                let values = args
                    .iter()
                    .map(|a| self.eval_row(a, row))
                    .collect::<Result<Vec<_>>>()?;
                call(name, values)
            }
        }
    }
}

/// Apply a program to a buffer: assignments derive columns, `where` filters rows
pub fn run_program(buffer: Buffer, program: &[Statement]) -> Result<Buffer> {
    let mut current = buffer;
    for statement in program {
        current = match statement {
            Statement::Assign { target, expr } => {
                let column = Evaluator::new(&current).eval_column(expr, target)?;
                current.with_column(column)?
            }
            Statement::Where(expr) => {
                let rows = Evaluator::new(&current).matching_rows(expr)?;
                current.take(&rows)
            }
            Statement::Expr(_) => {
                return Err(EtlError::Expression(
                    "bare expressions have no effect; use 'name = expr' or 'where expr'".into(),
                ))
            }
        };
    }
    Ok(current)
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Float(f) => *f != 0.0 && !f.is_nan(),
        Value::Str(s) => !s.is_empty(),
        Value::Timestamp(_) => true,
    }
}

fn type_error(op: &str, l: &Value, r: &Value) -> EtlError {
    EtlError::Expression(format!(
        "unsupported operand types for {op}: {} and {}",
        l.data_type(),
        r.data_type()
    ))
}

fn overflow(op: &str) -> EtlError {
    EtlError::Expression(format!("integer overflow in {op}"))
}

fn negate(value: Value) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Int(i) => i.checked_neg().map(Value::Int).ok_or_else(|| overflow("negation")),
        Value::Float(f) => Ok(Value::Float(-f)),
        other => Err(EtlError::Expression(format!(
            "cannot negate a {} value",
            other.data_type()
        ))),
    }
}

fn python_mod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && (r < 0.0) != (b < 0.0) {
        r + b
    } else {
        r
    }
}

fn binary(op: BinaryOp, l: Value, r: Value) -> Result<Value> {
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(l.loose_eq(&r))),
        BinaryOp::NotEq => return Ok(Value::Bool(!l.loose_eq(&r))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let holds = match l.loose_cmp(&r) {
                None => false,
                Some(ord) => match op {
                    BinaryOp::Lt => ord == Ordering::Less,
                    BinaryOp::Le => ord != Ordering::Greater,
                    BinaryOp::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                },
            };
            return Ok(Value::Bool(holds));
        }
        _ => {}
    }

    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }

    match (op, &l, &r) {
        (BinaryOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
        (BinaryOp::Add, Value::Int(a), Value::Int(b)) => {
            a.checked_add(*b).map(Value::Int).ok_or_else(|| overflow("addition"))
        }
        (BinaryOp::Sub, Value::Int(a), Value::Int(b)) => {
            a.checked_sub(*b).map(Value::Int).ok_or_else(|| overflow("subtraction"))
        }
        (BinaryOp::Mul, Value::Int(a), Value::Int(b)) => {
            a.checked_mul(*b).map(Value::Int).ok_or_else(|| overflow("multiplication"))
        }
        (BinaryOp::Mod, Value::Int(a), Value::Int(b)) => Ok(match a.checked_rem(*b) {
            Some(r) if r != 0 && (r < 0) != (*b < 0) => Value::Int(r + b),
            Some(r) => Value::Int(r),
            None => Value::Null,
        }),
        (BinaryOp::Pow, Value::Int(a), Value::Int(b)) if *b >= 0 => match u32::try_from(*b) {
            Ok(exp) => a.checked_pow(exp).map(Value::Int).ok_or_else(|| overflow("power")),
            Err(_) => Err(overflow("power")),
        },
        _ => {
            let (a, b) = match (l.as_f64(), r.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(type_error(op_symbol(op), &l, &r)),
            };
            let out = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div if b == 0.0 => return Ok(Value::Null),
                BinaryOp::Div => a / b,
                BinaryOp::Mod if b == 0.0 => return Ok(Value::Null),
                BinaryOp::Mod => python_mod(a, b),
                BinaryOp::Pow => a.powf(b),
                _ => return Err(type_error(op_symbol(op), &l, &r)),
            };
            Ok(Value::Float(out))
        }
    }
}

fn op_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::Pow => "**",
        BinaryOp::Eq => "==",
        BinaryOp::NotEq => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::And => "and",
        BinaryOp::Or => "or",
    }
}

fn arity(name: &str, args: &[Value], expected: std::ops::RangeInclusive<usize>) -> Result<()> {
    if expected.contains(&args.len()) {
        Ok(())
    } else {
        Err(EtlError::Expression(format!(
            "{name}() takes {} to {} arguments, got {}",
            expected.start(),
            expected.end(),
            args.len()
        )))
    }
}

fn text_fn(name: &str, args: Vec<Value>, f: impl Fn(&str) -> Value) -> Result<Value> {
    arity(name, &args, 1..=1)?;
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::Str(s) => Ok(f(s)),
        other => Ok(other.to_text().map(|s| f(&s)).unwrap_or(Value::Null)),
    }
}

fn call(name: &str, mut args: Vec<Value>) -> Result<Value> {
    match name {
        "abs" => {
            arity(name, &args, 1..=1)?;
            match args.remove(0) {
                Value::Int(i) => i.checked_abs().map(Value::Int).ok_or_else(|| overflow("abs")),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                Value::Null => Ok(Value::Null),
                other => Err(EtlError::Expression(format!(
                    "abs() expects a number, got {}",
                    other.data_type()
                ))),
            }
        }
        "round" => {
            arity(name, &args, 1..=2)?;
            let digits = match args.get(1) {
                Some(Value::Int(d)) => (*d).clamp(-15, 15) as i32,
                None => 0,
                Some(other) => {
                    return Err(EtlError::Expression(format!(
                        "round() digits must be an int, got {}",
                        other.data_type()
                    )))
                }
            };
            match &args[0] {
                Value::Null => Ok(Value::Null),
                Value::Int(i) if digits >= 0 => Ok(Value::Int(*i)),
                v => match v.as_f64() {
                    Some(f) => {
                        let scale = 10f64.powi(digits);
                        Ok(Value::Float((f * scale).round() / scale))
                    }
                    None => Err(EtlError::Expression(format!(
                        "round() expects a number, got {}",
                        v.data_type()
                    ))),
                },
            }
        }
        "upper" => text_fn(name, args, |s| Value::Str(s.to_uppercase())),
        "lower" => text_fn(name, args, |s| Value::Str(s.to_lowercase())),
        "trim" => text_fn(name, args, |s| Value::Str(s.trim().to_string())),
        "len" => text_fn(name, args, |s| Value::Int(s.chars().count() as i64)),
        "str" => text_fn(name, args, |s| Value::Str(s.to_string())),
        "is_null" => {
            arity(name, &args, 1..=1)?;
            Ok(Value::Bool(args[0].is_null()))
        }
        "coalesce" => Ok(args.into_iter().find(|v| !v.is_null()).unwrap_or(Value::Null)),
        "if" => {
            arity(name, &args, 3..=3)?;
            let otherwise = args.remove(2);
            let then = args.remove(1);
            Ok(if truthy(&args[0]) { then } else { otherwise })
        }
        other => Err(EtlError::Expression(format!("unknown function '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse_program;

    fn buffer() -> Buffer {
        Buffer::from_rows(
            vec!["a".into(), "b".into(), "name".into()],
            vec![
                vec![Value::Int(1), Value::Int(3), Value::from("ann")],
                vec![Value::Int(2), Value::Int(4), Value::Null],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_assignment_adds_column() {
        let program = parse_program("c = a + b").unwrap();
        let out = run_program(buffer(), &program).unwrap();
        let c: Vec<Value> = out.column("c").unwrap().values().collect();
        assert_eq!(c, vec![Value::Int(4), Value::Int(6)]);
    }

    #[test]
    fn test_division_is_true_division_and_null_on_zero() {
        let program = parse_program("x = a / 2; y = a / (b - b)").unwrap();
        let out = run_program(buffer(), &program).unwrap();
        assert_eq!(out.column("x").unwrap().get(0), Value::Float(0.5));
        assert_eq!(out.column("y").unwrap().get(0), Value::Null);
    }

    #[test]
    fn test_where_filters_rows() {
        let program = parse_program("where b > 3").unwrap();
        let out = run_program(buffer(), &program).unwrap();
        assert_eq!(out.row_count(), 1);
        assert_eq!(out.column("a").unwrap().get(0), Value::Int(2));
    }

    #[test]
    fn test_nulls_propagate_through_functions() {
        let program = parse_program("u = upper(name); n = coalesce(name, 'unknown')").unwrap();
        let out = run_program(buffer(), &program).unwrap();
        assert_eq!(out.column("u").unwrap().get(0), Value::from("ANN"));
        assert_eq!(out.column("u").unwrap().get(1), Value::Null);
        assert_eq!(out.column("n").unwrap().get(1), Value::from("unknown"));
    }

    #[test]
    fn test_unknown_column_is_an_error() {
        let program = parse_program("c = missing * 2").unwrap();
        let err = run_program(buffer(), &program).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_round_digits_are_clamped() {
        let program = parse_program("r = round(a * 1234.5, -4294967298)").unwrap();
        let out = run_program(buffer(), &program).unwrap();
        assert_eq!(out.column("r").unwrap().get(0), Value::Float(0.0));
    }

    #[test]
    fn test_string_plus_number_is_a_type_error() {
        let program = parse_program("c = name + a").unwrap();
        assert!(run_program(buffer(), &program).is_err());
    }
}
