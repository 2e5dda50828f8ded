use async_trait::async_trait;
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use super::{parse_config, OneOrMany, Step, StepContext};
use crate::buffer::{Buffer, Column, DataType, Value};
use crate::error::{EtlError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFunction {
    Sum,
    #[serde(alias = "avg")]
    Mean,
    Median,
    Min,
    Max,
    Count,
    Nunique,
    First,
    Last,
    Std,
    Var,
}

impl fmt::Display for AggFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggFunction::Sum => "sum",
            AggFunction::Mean => "mean",
            AggFunction::Median => "median",
            AggFunction::Min => "min",
            AggFunction::Max => "max",
            AggFunction::Count => "count",
            AggFunction::Nunique => "nunique",
            AggFunction::First => "first",
            AggFunction::Last => "last",
            AggFunction::Std => "std",
            AggFunction::Var => "var",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Deserialize)]
struct AggregateConfig {
    #[serde(default)]
    group_by: OneOrMany<String>,
    #[serde(default)]
    aggregations: BTreeMap<String, OneOrMany<AggFunction>>,
}

#[derive(Debug)]
struct Aggregation {
    column: String,
    function: AggFunction,
    output: String,
}

/// Group-by with per-column reductions; groups come out sorted by key
#[derive(Debug)]
pub struct AggregateStep {
    group_by: Vec<String>,
    aggregations: Vec<Aggregation>,
}

impl AggregateStep {
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let parsed: AggregateConfig = parse_config("aggregate", config)?;
        let mut aggregations = Vec::new();
        for (column, functions) in parsed.aggregations {
            match functions {
                OneOrMany::One(function) => aggregations.push(Aggregation {
                    output: column.clone(),
                    column,
                    function,
                }),
                OneOrMany::Many(functions) => {
                    for function in functions {
                        aggregations.push(Aggregation {
                            output: format!("{column}_{function}"),
                            column: column.clone(),
                            function,
                        });
                    }
                }
            }
        }
        Ok(Self {
            group_by: parsed.group_by.into_vec(),
            aggregations,
        })
    }
}

pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

pub(crate) fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

/// Sample variance (n - 1 denominator)
fn variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let squares: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some(squares / (values.len() - 1) as f64)
}

fn numbers(column: &Column, values: &[Value], function: AggFunction) -> Result<Vec<f64>> {
    match column.data_type() {
        DataType::Int | DataType::Float | DataType::Null => {
            Ok(values.iter().filter_map(Value::as_f64).collect())
        }
        DataType::Bool => Ok(values
            .iter()
            .filter_map(|v| match v {
                Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
                _ => None,
            })
            .collect()),
        other => Err(EtlError::Expression(format!(
            "{function} needs a numeric column, '{}' is {other}",
            column.name()
        ))),
    }
}

/// Reduce one group's non-null values; nulls never count
fn reduce(column: &Column, rows: &[usize], function: AggFunction) -> Result<Value> {
    let present: Vec<Value> = rows
        .iter()
        .map(|&r| column.get(r))
        .filter(|v| !v.is_null())
        .collect();
    Ok(match function {
        AggFunction::Count => Value::Int(present.len() as i64),
        AggFunction::Nunique => Value::Int(present.iter().collect::<HashSet<_>>().len() as i64),
        AggFunction::First => present.first().cloned().unwrap_or(Value::Null),
        AggFunction::Last => present.last().cloned().unwrap_or(Value::Null),
        AggFunction::Min => present
            .iter()
            .min_by(|a, b| a.total_cmp(b))
            .cloned()
            .unwrap_or(Value::Null),
        AggFunction::Max => present
            .iter()
            .max_by(|a, b| a.total_cmp(b))
            .cloned()
            .unwrap_or(Value::Null),
        AggFunction::Sum => match column.data_type() {
            DataType::Int | DataType::Bool => {
                let total: i128 = present
                    .iter()
                    .map(|v| match v {
                        Value::Int(i) => i128::from(*i),
                        Value::Bool(b) => i128::from(*b),
                        _ => 0,
                    })
                    .sum();
                i64::try_from(total)
                    .map(Value::Int)
                    .unwrap_or(Value::Float(total as f64))
            }
            _ => Value::Float(numbers(column, &present, function)?.iter().sum()),
        },
        AggFunction::Mean => Value::from(mean(&numbers(column, &present, function)?)),
        AggFunction::Median => Value::from(median(numbers(column, &present, function)?)),
        AggFunction::Var => Value::from(variance(&numbers(column, &present, function)?)),
        AggFunction::Std => {
            Value::from(variance(&numbers(column, &present, function)?).map(f64::sqrt))
        }
    })
}

#[async_trait]
impl Step for AggregateStep {
    fn step_type(&self) -> &'static str {
        "aggregate"
    }

    async fn process(&self, buffer: Buffer, _ctx: &StepContext<'_>) -> Result<Buffer> {
        if self.group_by.is_empty() || self.aggregations.is_empty() {
            return Ok(buffer);
        }
        let keys = self
            .group_by
            .iter()
            .map(|n| buffer.require_column(n))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut groups: Vec<(Vec<Value>, Vec<usize>)> = Vec::new();
        let mut positions: HashMap<Vec<Value>, usize> = HashMap::new();
        for row in 0..buffer.row_count() {
            let key: Vec<Value> = keys.iter().map(|c| c.get(row)).collect();
            if key.iter().any(Value::is_null) {
                continue;
            }
            match positions.get(&key) {
                Some(&i) => groups[i].1.push(row),
                None => {
                    positions.insert(key.clone(), groups.len());
                    groups.push((key, vec![row]));
                }
            }
        }
        groups.sort_by(|(a, _), (b, _)| {
            a.iter()
                .zip(b)
                .map(|(x, y)| x.total_cmp(y))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        });

        let mut columns: Vec<Column> = self
            .group_by
            .iter()
            .enumerate()
            .map(|(i, name)| {
                Column::from_values(
                    name.clone(),
                    groups.iter().map(|(k, _)| k[i].clone()).collect(),
                )
            })
            .collect();
        for agg in &self.aggregations {
            let source = buffer.require_column(&agg.column)?;
            let values = groups
                .iter()
                .map(|(_, rows)| reduce(source, rows, agg.function))
                .collect::<Result<Vec<_>>>()?;
            columns.push(Column::from_values(agg.output.clone(), values));
        }
        Ok(Buffer::new(columns)?)
    }
}
