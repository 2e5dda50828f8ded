use async_trait::async_trait;
use serde::Deserialize;

use super::{parse_config, OneOrMany, Step, StepContext};
use crate::buffer::Buffer;
use crate::error::Result;

#[derive(Debug, Deserialize)]
struct ColumnsConfig {
    #[serde(default)]
    columns: OneOrMany<String>,
}

/// Removes the named columns
#[derive(Debug)]
pub struct DropColumnsStep {
    columns: Vec<String>,
}

impl DropColumnsStep {
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let parsed: ColumnsConfig = parse_config("drop_columns", config)?;
        Ok(Self {
            columns: parsed.columns.into_vec(),
        })
    }
}

#[async_trait]
impl Step for DropColumnsStep {
    fn step_type(&self) -> &'static str {
        "drop_columns"
    }

    async fn process(&self, buffer: Buffer, _ctx: &StepContext<'_>) -> Result<Buffer> {
        Ok(buffer.drop_columns(&self.columns))
    }
}

/// Keeps only the named columns, in the listed order
#[derive(Debug)]
pub struct SelectColumnsStep {
    columns: Vec<String>,
}

impl SelectColumnsStep {
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let parsed: ColumnsConfig = parse_config("select_columns", config)?;
        Ok(Self {
            columns: parsed.columns.into_vec(),
        })
    }
}

#[async_trait]
impl Step for SelectColumnsStep {
    fn step_type(&self) -> &'static str {
        "select_columns"
    }

    async fn process(&self, buffer: Buffer, _ctx: &StepContext<'_>) -> Result<Buffer> {
        Ok(buffer.select(&self.columns))
    }
}
