use async_trait::async_trait;
use serde::Deserialize;

use super::{parse_config, Step, StepContext};
use crate::buffer::value::parse_bool;
use crate::buffer::{Buffer, Column, Value};
use crate::error::Result;

#[derive(Debug, Deserialize)]
struct MapValuesConfig {
    column: String,
    mapping: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    default: Option<serde_json::Value>,
}

/// Substitutes column values through a lookup table
#[derive(Debug)]
pub struct MapValuesStep {
    column: String,
    mapping: Vec<(String, Value)>,
    default: Option<Value>,
}

/// Mapping keys arrive as JSON object keys, so they are matched against the value's text form
fn key_matches(value: &Value, key: &str) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => parse_bool(key) == Some(*b),
        Value::Str(s) => s == key,
        other => other.loose_eq(&Value::Str(key.to_string())),
    }
}

impl MapValuesStep {
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let parsed: MapValuesConfig = parse_config("map_values", config)?;
        Ok(Self {
            column: parsed.column,
            mapping: parsed
                .mapping
                .iter()
                .map(|(k, v)| (k.clone(), Value::from_json(v)))
                .collect(),
            default: parsed.default.as_ref().map(Value::from_json),
        })
    }

    fn lookup(&self, value: Value) -> Value {
        match self.mapping.iter().find(|(key, _)| key_matches(&value, key)) {
            Some((_, mapped)) => mapped.clone(),
            None => self.default.clone().unwrap_or(value),
        }
    }
}

#[async_trait]
impl Step for MapValuesStep {
    fn step_type(&self) -> &'static str {
        "map_values"
    }

    async fn process(&self, buffer: Buffer, _ctx: &StepContext<'_>) -> Result<Buffer> {
        let column = buffer.require_column(&self.column)?;
        let mapped = column.values().map(|v| self.lookup(v)).collect();
        let column = Column::from_values(self.column.clone(), mapped);
        Ok(buffer.with_column(column)?)
    }
}
