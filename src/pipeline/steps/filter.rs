use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use super::{parse_config, Step, StepContext};
use crate::buffer::{Buffer, Value};
use crate::error::{EtlError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[serde(alias = "==")]
    Eq,
    #[serde(alias = "!=")]
    Ne,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = ">=")]
    Gte,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = "<=")]
    Lte,
    In,
    NotIn,
    Contains,
    IsNull,
    IsNotNull,
    Matches,
}

#[derive(Debug, Deserialize)]
struct ConditionConfig {
    column: String,
    operator: Operator,
    #[serde(default)]
    value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct FilterConfig {
    #[serde(default)]
    conditions: Vec<ConditionConfig>,
}

#[derive(Debug)]
enum Predicate {
    Compare(Operator, Value),
    OneOf { values: Vec<Value>, negate: bool },
    Contains(String),
    IsNull,
    IsNotNull,
    Matches(Regex),
}

impl Predicate {
    fn build(operator: Operator, raw: &serde_json::Value) -> Result<Self> {
        Ok(match operator {
            Operator::In | Operator::NotIn => {
                let values = match raw {
                    serde_json::Value::Array(items) => items.iter().map(Value::from_json).collect(),
                    serde_json::Value::Null => Vec::new(),
                    scalar => vec![Value::from_json(scalar)],
                };
                Predicate::OneOf {
                    values,
                    negate: operator == Operator::NotIn,
                }
            }
            Operator::Contains => {
                Predicate::Contains(Value::from_json(raw).to_text().unwrap_or_default())
            }
            Operator::Matches => {
                let pattern = raw
                    .as_str()
                    .ok_or_else(|| EtlError::config("'matches' needs a string pattern"))?;
                let regex = Regex::new(pattern)
                    .map_err(|e| EtlError::config(format!("invalid pattern '{pattern}': {e}")))?;
                Predicate::Matches(regex)
            }
            Operator::IsNull => Predicate::IsNull,
            Operator::IsNotNull => Predicate::IsNotNull,
            op => Predicate::Compare(op, Value::from_json(raw)),
        })
    }

    fn holds(&self, value: &Value) -> bool {
        match self {
            Predicate::Compare(op, expected) => {
                let ord = value.loose_cmp(expected);
                match op {
                    Operator::Eq => value.loose_eq(expected),
                    Operator::Ne => !value.loose_eq(expected),
                    Operator::Gt => ord.is_some_and(|o| o.is_gt()),
                    Operator::Gte => ord.is_some_and(|o| o.is_ge()),
                    Operator::Lt => ord.is_some_and(|o| o.is_lt()),
                    Operator::Lte => ord.is_some_and(|o| o.is_le()),
                    _ => false,
                }
            }
            Predicate::OneOf { values, negate } => {
                let found = values.iter().any(|v| value.loose_eq(v));
                found != *negate
            }
            Predicate::Contains(needle) => value
                .to_text()
                .is_some_and(|s| s.contains(needle.as_str())),
            Predicate::IsNull => value.is_null(),
            Predicate::IsNotNull => !value.is_null(),
            Predicate::Matches(regex) => value.to_text().is_some_and(|s| regex.is_match(&s)),
        }
    }
}

#[derive(Debug)]
struct Condition {
    column: String,
    predicate: Predicate,
}

/// Keeps rows satisfying every condition
#[derive(Debug)]
pub struct FilterStep {
    conditions: Vec<Condition>,
}

impl FilterStep {
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let parsed: FilterConfig = parse_config("filter", config)?;
        let conditions = parsed
            .conditions
            .into_iter()
            .map(|c| {
                Ok(Condition {
                    predicate: Predicate::build(c.operator, &c.value)?,
                    column: c.column,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { conditions })
    }
}

#[async_trait]
impl Step for FilterStep {
    fn step_type(&self) -> &'static str {
        "filter"
    }

    async fn process(&self, buffer: Buffer, _ctx: &StepContext<'_>) -> Result<Buffer> {
        let mut keep = vec![true; buffer.row_count()];
        for condition in &self.conditions {
            let Some(column) = buffer.column(&condition.column) else {
                warn!(column = %condition.column, "filter column not found, skipping condition");
                continue;
            };
            for (row, slot) in keep.iter_mut().enumerate() {
                if *slot && !condition.predicate.holds(&column.get(row)) {
                    *slot = false;
                }
            }
        }
        let rows: Vec<usize> = keep
            .iter()
            .enumerate()
            .filter_map(|(i, k)| k.then_some(i))
            .collect();
        Ok(buffer.take(&rows))
    }
}
