use async_trait::async_trait;
use serde::Deserialize;

use super::{parse_config, Step, StepContext};
use crate::buffer::value::parse_timestamp;
use crate::buffer::{Buffer, Column, ColumnData, Value};
use crate::error::{EtlError, Result};
use crate::expr::{parse_program, Evaluator, Expr, Statement};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateUnit {
    #[default]
    Days,
    Hours,
    Minutes,
    Seconds,
}

impl DateUnit {
    fn seconds(self) -> f64 {
        match self {
            DateUnit::Days => 86_400.0,
            DateUnit::Hours => 3_600.0,
            DateUnit::Minutes => 60.0,
            DateUnit::Seconds => 1.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CalculationConfig {
    Formula {
        #[serde(default)]
        target_column: Option<String>,
        #[serde(alias = "expression")]
        formula: String,
    },
    Concat {
        target_column: String,
        columns: Vec<String>,
        #[serde(default)]
        separator: String,
    },
    DateDiff {
        target_column: String,
        #[serde(alias = "column1")]
        start_column: String,
        #[serde(alias = "column2")]
        end_column: String,
        #[serde(default)]
        unit: DateUnit,
    },
}

#[derive(Debug, Deserialize)]
struct CalculateConfig {
    #[serde(default)]
    calculations: Vec<CalculationConfig>,
}

#[derive(Debug)]
enum Calculation {
    Formula {
        target: String,
        expr: Expr,
    },
    Concat {
        target: String,
        columns: Vec<String>,
        separator: String,
    },
    DateDiff {
        target: String,
        start: String,
        end: String,
        unit: DateUnit,
    },
}

impl Calculation {
    fn build(config: CalculationConfig) -> Result<Self> {
        Ok(match config {
            CalculationConfig::Formula {
                target_column,
                formula,
            } => {
                let mut program = parse_program(&formula)?;
                if program.len() != 1 {
                    return Err(EtlError::Expression(format!(
                        "formula must be a single expression or assignment: {formula}"
                    )));
                }
                match program.remove(0) {
                    Statement::Assign { target, expr } => Calculation::Formula { target, expr },
                    Statement::Expr(expr) => Calculation::Formula {
                        target: target_column.ok_or_else(|| {
                            EtlError::config(format!("formula '{formula}' needs a target_column"))
                        })?,
                        expr,
                    },
                    Statement::Where(_) => {
                        return Err(EtlError::Expression(
                            "'where' is not allowed in a formula; use a filter step".into(),
                        ))
                    }
                }
            }
            CalculationConfig::Concat {
                target_column,
                columns,
                separator,
            } => Calculation::Concat {
                target: target_column,
                columns,
                separator,
            },
            CalculationConfig::DateDiff {
                target_column,
                start_column,
                end_column,
                unit,
            } => Calculation::DateDiff {
                target: target_column,
                start: start_column,
                end: end_column,
                unit,
            },
        })
    }

    fn apply(&self, buffer: Buffer) -> Result<Buffer> {
        let column = match self {
            Calculation::Formula { target, expr } => {
                Evaluator::new(&buffer).eval_column(expr, target)?
            }
            Calculation::Concat {
                target,
                columns,
                separator,
            } => {
                let sources = columns
                    .iter()
                    .map(|n| buffer.require_column(n))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                let joined = (0..buffer.row_count())
                    .map(|row| {
                        let parts: Vec<String> = sources
                            .iter()
                            .map(|c| c.get(row).to_text().unwrap_or_default())
                            .collect();
                        Some(parts.join(separator))
                    })
                    .collect();
                Column::new(target.clone(), ColumnData::Utf8(joined))
            }
            Calculation::DateDiff {
                target,
                start,
                end,
                unit,
            } => {
                let start = buffer.require_column(start)?;
                let end = buffer.require_column(end)?;
                let diffs = (0..buffer.row_count())
                    .map(|row| match (as_timestamp(start.get(row)), as_timestamp(end.get(row))) {
                        (Some(a), Some(b)) => {
                            let seconds = (b - a).num_milliseconds() as f64 / 1000.0;
                            Some(seconds / unit.seconds())
                        }
                        _ => None,
                    })
                    .collect();
                Column::new(target.clone(), ColumnData::Float(diffs))
            }
        };
        Ok(buffer.with_column(column)?)
    }
}

fn as_timestamp(value: Value) -> Option<chrono::NaiveDateTime> {
    match value {
        Value::Timestamp(ts) => Some(ts),
        Value::Str(s) => parse_timestamp(&s),
        _ => None,
    }
}

/// Derives columns from formulas, string concatenation and date differences
#[derive(Debug)]
pub struct CalculateStep {
    calculations: Vec<Calculation>,
}

impl CalculateStep {
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let parsed: CalculateConfig = parse_config("calculate", config)?;
        let calculations = parsed
            .calculations
            .into_iter()
            .map(Calculation::build)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { calculations })
    }
}

#[async_trait]
impl Step for CalculateStep {
    fn step_type(&self) -> &'static str {
        "calculate"
    }

    async fn process(&self, buffer: Buffer, _ctx: &StepContext<'_>) -> Result<Buffer> {
        self.calculations
            .iter()
            .try_fold(buffer, |current, calculation| calculation.apply(current))
    }
}
