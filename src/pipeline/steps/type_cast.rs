use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use tracing::debug;

use super::{parse_config, Step, StepContext};
use crate::buffer::value::{parse_bool, parse_timestamp};
use crate::buffer::{Buffer, BufferError, Column, ColumnData, DataType, Value};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CastTarget {
    #[serde(alias = "integer", alias = "int64")]
    Int,
    #[serde(alias = "float64", alias = "double")]
    Float,
    #[serde(alias = "string", alias = "text")]
    Str,
    #[serde(alias = "timestamp", alias = "date")]
    Datetime,
    #[serde(alias = "boolean")]
    Bool,
}

impl CastTarget {
    fn data_type(self) -> DataType {
        match self {
            CastTarget::Int => DataType::Int,
            CastTarget::Float => DataType::Float,
            CastTarget::Str => DataType::Utf8,
            CastTarget::Datetime => DataType::Timestamp,
            CastTarget::Bool => DataType::Bool,
        }
    }
}

/// What to do with a value that does not convert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CastErrors {
    #[default]
    Raise,
    Coerce,
    Ignore,
}

#[derive(Debug, Deserialize)]
struct Cast {
    column: String,
    target_type: CastTarget,
    #[serde(default)]
    errors: CastErrors,
    #[serde(default)]
    format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TypeCastConfig {
    #[serde(default)]
    casts: Vec<Cast>,
}

/// Converts columns to a target type
#[derive(Debug)]
pub struct TypeCastStep {
    casts: Vec<Cast>,
}

impl TypeCastStep {
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let parsed: TypeCastConfig = parse_config("type_cast", config)?;
        Ok(Self { casts: parsed.casts })
    }
}

fn to_int(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Float(f) => float_to_int(*f),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Str(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(float_to_int))
        }
        Value::Null | Value::Timestamp(_) => None,
    }
}

/// Truncates toward zero; NaN and out-of-range values do not convert
fn float_to_int(f: f64) -> Option<i64> {
    let t = f.trunc();
    (t.is_finite() && t >= i64::MIN as f64 && t < i64::MAX as f64).then_some(t as i64)
}

fn to_float(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Str(s) => s.trim().parse().ok(),
        Value::Null | Value::Timestamp(_) => None,
    }
}

fn to_timestamp(value: &Value, format: Option<&str>) -> Option<NaiveDateTime> {
    match (value, format) {
        (Value::Timestamp(ts), _) => Some(*ts),
        (Value::Str(s), Some(fmt)) => NaiveDateTime::parse_from_str(s.trim(), fmt)
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(s.trim(), fmt)
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            }),
        (Value::Str(s), None) => parse_timestamp(s),
        _ => None,
    }
}

fn to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Int(i) => Some(*i != 0),
        Value::Float(f) => Some(*f != 0.0),
        Value::Str(s) => parse_bool(s),
        Value::Null | Value::Timestamp(_) => None,
    }
}

/// Convert every value, noting the first one that fails
fn convert<T>(
    column: &Column,
    mut f: impl FnMut(&Value) -> Option<T>,
) -> (Vec<Option<T>>, Option<Value>) {
    let mut failed = None;
    let converted = column
        .values()
        .map(|v| {
            if v.is_null() {
                return None;
            }
            let out = f(&v);
            if out.is_none() && failed.is_none() {
                failed = Some(v);
            }
            out
        })
        .collect();
    (converted, failed)
}

impl Cast {
    fn apply(&self, column: &Column) -> std::result::Result<Option<Column>, BufferError> {
        let (data, failed) = match self.target_type {
            CastTarget::Int => {
                let (v, f) = convert(column, to_int);
                (ColumnData::Int(v), f)
            }
            CastTarget::Float => {
                let (v, f) = convert(column, to_float);
                (ColumnData::Float(v), f)
            }
            CastTarget::Str => {
                let (v, f) = convert(column, Value::to_text);
                (ColumnData::Utf8(v), f)
            }
            CastTarget::Datetime => {
                let format = self.format.as_deref();
                let (v, f) = convert(column, |v| to_timestamp(v, format));
                (ColumnData::Timestamp(v), f)
            }
            CastTarget::Bool => {
                let (v, f) = convert(column, to_bool);
                (ColumnData::Bool(v), f)
            }
        };
        match (failed, self.errors) {
            (None, _) | (Some(_), CastErrors::Coerce) => Ok(Some(Column::new(column.name(), data))),
            (Some(value), CastErrors::Ignore) => {
                debug!(column = %self.column, %value, "cast failed, leaving column unchanged");
                Ok(None)
            }
            (Some(value), CastErrors::Raise) => Err(BufferError::Coercion {
                column: self.column.clone(),
                value: value.to_string(),
                target: self.target_type.data_type(),
            }),
        }
    }
}

#[async_trait]
impl Step for TypeCastStep {
    fn step_type(&self) -> &'static str {
        "type_cast"
    }

    async fn process(&self, buffer: Buffer, _ctx: &StepContext<'_>) -> Result<Buffer> {
        let mut current = buffer;
        for cast in &self.casts {
            let converted = cast.apply(current.require_column(&cast.column)?)?;
            if let Some(column) = converted {
                current = current.with_column(column)?;
            }
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::steps::test_support::{buffer, run, values};
    use serde_json::json;

    fn raw() -> Buffer {
        buffer(
            &["n", "when", "flag"],
            vec![
                vec!["3".into(), "2024-03-01".into(), "yes".into()],
                vec!["x".into(), "01/02/2024".into(), "no".into()],
                vec!["5".into(), Value::Null, "1".into()],
            ],
        )
    }

    fn cast(column: &str, target: &str, errors: &str) -> TypeCastStep {
        TypeCastStep::from_config(&json!({"casts": [
            {"column": column, "target_type": target, "errors": errors}
        ]}))
        .unwrap()
    }

    #[tokio::test]
    async fn test_coerce_turns_failures_into_nulls() {
        let out = run(&cast("n", "int", "coerce"), raw()).await.unwrap();
        assert_eq!(values(&out, "n"), vec![Value::Int(3), Value::Null, Value::Int(5)]);
    }

    #[tokio::test]
    async fn test_raise_is_the_default() {
        let step = TypeCastStep::from_config(&json!({"casts": [
            {"column": "n", "target_type": "int"}
        ]}))
        .unwrap();
        let err = run(&step, raw()).await.unwrap_err();
        assert!(err.to_string().contains("'x'"));
    }

    #[tokio::test]
    async fn test_ignore_keeps_original_column() {
        let out = run(&cast("n", "float", "ignore"), raw()).await.unwrap();
        assert_eq!(out.column("n").unwrap().data_type(), DataType::Utf8);
    }

    #[tokio::test]
    async fn test_datetime_with_format() {
        let step = TypeCastStep::from_config(&json!({"casts": [
            {"column": "when", "target_type": "datetime", "format": "%m/%d/%Y", "errors": "coerce"}
        ]}))
        .unwrap();
        let out = run(&step, raw()).await.unwrap();
        let expected = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap().and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(
            values(&out, "when"),
            vec![Value::Null, Value::Timestamp(expected), Value::Null]
        );
    }

    #[tokio::test]
    async fn test_bool_and_str_casts() {
        let out = run(&cast("flag", "bool", "raise"), raw()).await.unwrap();
        assert_eq!(
            values(&out, "flag"),
            vec![Value::Bool(true), Value::Bool(false), Value::Bool(true)]
        );

        let ints = buffer(&["n"], vec![vec![Value::Int(7)], vec![Value::Null]]);
        let out = run(&cast("n", "str", "raise"), ints).await.unwrap();
        assert_eq!(values(&out, "n"), vec![Value::from("7"), Value::Null]);
    }

    #[test]
    fn test_float_to_int_truncates() {
        assert_eq!(to_int(&Value::Float(-2.7)), Some(-2));
        assert_eq!(to_int(&Value::Float(f64::NAN)), None);
        assert_eq!(to_int(&Value::from("4.9")), Some(4));
    }
}
