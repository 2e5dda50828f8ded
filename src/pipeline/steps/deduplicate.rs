use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;

use super::{parse_config, OneOrMany, Step, StepContext};
use crate::buffer::{Buffer, Value};
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Keep {
    #[default]
    First,
    Last,
}

#[derive(Debug, Deserialize)]
struct DeduplicateConfig {
    #[serde(default)]
    columns: Option<OneOrMany<String>>,
    #[serde(default)]
    keep: Keep,
}

/// Drops rows whose key columns repeat an earlier (or later) row
#[derive(Debug)]
pub struct DeduplicateStep {
    columns: Option<Vec<String>>,
    keep: Keep,
}

impl DeduplicateStep {
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let parsed: DeduplicateConfig = parse_config("deduplicate", config)?;
        Ok(Self {
            columns: parsed.columns.map(OneOrMany::into_vec).filter(|c| !c.is_empty()),
            keep: parsed.keep,
        })
    }
}

#[async_trait]
impl Step for DeduplicateStep {
    fn step_type(&self) -> &'static str {
        "deduplicate"
    }

    async fn process(&self, buffer: Buffer, _ctx: &StepContext<'_>) -> Result<Buffer> {
        let keys = match &self.columns {
            Some(names) => names
                .iter()
                .map(|n| buffer.require_column(n))
                .collect::<std::result::Result<Vec<_>, _>>()?,
            None => buffer.columns().iter().collect(),
        };
        let key_of = |row: usize| -> Vec<Value> { keys.iter().map(|c| c.get(row)).collect() };

        let mut seen = HashSet::new();
        let mut rows: Vec<usize> = match self.keep {
            Keep::First => (0..buffer.row_count()).filter(|&r| seen.insert(key_of(r))).collect(),
            Keep::Last => (0..buffer.row_count())
                .rev()
                .filter(|&r| seen.insert(key_of(r)))
                .collect(),
        };
        if self.keep == Keep::Last {
            rows.reverse();
        }
        Ok(buffer.take(&rows))
    }
}
