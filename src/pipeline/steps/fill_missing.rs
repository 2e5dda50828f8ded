use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

use super::aggregate::{mean, median};
use super::{parse_config, Step, StepContext};
use crate::buffer::{Buffer, Column, Value};
use crate::error::{EtlError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillStrategy {
    Value,
    Mean,
    Median,
    Mode,
    #[serde(alias = "ffill")]
    ForwardFill,
    #[serde(alias = "bfill")]
    BackwardFill,
}

#[derive(Debug, Deserialize)]
struct FillConfig {
    column: String,
    strategy: FillStrategy,
    #[serde(default)]
    value: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct FillMissingConfig {
    #[serde(default)]
    fills: Vec<FillConfig>,
}

#[derive(Debug)]
struct Fill {
    column: String,
    strategy: FillStrategy,
    value: Value,
}

/// Replaces nulls per column using a constant or a statistic of the column
#[derive(Debug)]
pub struct FillMissingStep {
    fills: Vec<Fill>,
}

impl FillMissingStep {
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let parsed: FillMissingConfig = parse_config("fill_missing", config)?;
        let fills = parsed
            .fills
            .into_iter()
            .map(|f| {
                let value = match (f.strategy, f.value) {
                    (FillStrategy::Value, None) => {
                        return Err(EtlError::config(format!(
                            "fill for '{}' uses strategy 'value' without a value",
                            f.column
                        )))
                    }
                    (_, value) => value.as_ref().map(Value::from_json).unwrap_or(Value::Null),
                };
                Ok(Fill {
                    column: f.column,
                    strategy: f.strategy,
                    value,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { fills })
    }
}

fn numeric(column: &Column, strategy: &str) -> Result<Vec<f64>> {
    if !column.data_type().is_numeric() && column.data_type() != crate::buffer::DataType::Null {
        return Err(EtlError::Expression(format!(
            "{strategy} fill needs a numeric column, '{}' is {}",
            column.name(),
            column.data_type()
        )));
    }
    Ok(column.values().filter_map(|v| v.as_f64()).collect())
}

/// Most frequent non-null value; ties go to the smallest
fn mode(column: &Column) -> Value {
    let mut counts: HashMap<Value, usize> = HashMap::new();
    for value in column.values().filter(|v| !v.is_null()) {
        *counts.entry(value).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|(a, ca), (b, cb)| ca.cmp(cb).then_with(|| b.total_cmp(a)))
        .map(|(value, _)| value)
        .unwrap_or(Value::Null)
}

fn fill_column(column: &Column, fill: &Fill) -> Result<Vec<Value>> {
    let values: Vec<Value> = column.values().collect();
    let constant = match fill.strategy {
        FillStrategy::Value => fill.value.clone(),
        FillStrategy::Mean => mean(&numeric(column, "mean")?)
            .map(Value::Float)
            .unwrap_or(Value::Null),
        FillStrategy::Median => median(numeric(column, "median")?)
            .map(Value::Float)
            .unwrap_or(Value::Null),
        FillStrategy::Mode => mode(column),
        FillStrategy::ForwardFill => {
            let mut last = Value::Null;
            return Ok(values
                .into_iter()
                .map(|v| {
                    if v.is_null() {
                        last.clone()
                    } else {
                        last = v.clone();
                        v
                    }
                })
                .collect());
        }
        FillStrategy::BackwardFill => {
            let mut next = Value::Null;
            let mut filled: Vec<Value> = values
                .into_iter()
                .rev()
                .map(|v| {
                    if v.is_null() {
                        next.clone()
                    } else {
                        next = v.clone();
                        v
                    }
                })
                .collect();
            filled.reverse();
            return Ok(filled);
        }
    };
    Ok(values
        .into_iter()
        .map(|v| if v.is_null() { constant.clone() } else { v })
        .collect())
}

#[async_trait]
impl Step for FillMissingStep {
    fn step_type(&self) -> &'static str {
        "fill_missing"
    }

    async fn process(&self, buffer: Buffer, _ctx: &StepContext<'_>) -> Result<Buffer> {
        let mut current = buffer;
        for fill in &self.fills {
            let column = current.require_column(&fill.column)?;
            if column.null_count() == 0 {
                continue;
            }
            let filled = Column::from_values(fill.column.clone(), fill_column(column, fill)?);
            current = current.with_column(filled)?;
        }
        Ok(current)
    }
}
