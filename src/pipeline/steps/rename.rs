use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;

use super::{parse_config, Step, StepContext};
use crate::buffer::Buffer;
use crate::error::Result;

#[derive(Debug, Deserialize)]
struct RenameConfig {
    #[serde(default)]
    mapping: HashMap<String, String>,
}

/// Renames columns; names not in the buffer are ignored
#[derive(Debug)]
pub struct RenameStep {
    mapping: HashMap<String, String>,
}

impl RenameStep {
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let parsed: RenameConfig = parse_config("rename", config)?;
        Ok(Self {
            mapping: parsed.mapping,
        })
    }
}

#[async_trait]
impl Step for RenameStep {
    fn step_type(&self) -> &'static str {
        "rename"
    }

    async fn process(&self, buffer: Buffer, _ctx: &StepContext<'_>) -> Result<Buffer> {
        Ok(buffer.rename(&self.mapping)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Value;
    use crate::pipeline::steps::test_support::{buffer, run};
    use serde_json::json;

    #[tokio::test]
    async fn test_rename_ignores_unknown_names() {
        let input = buffer(&["a", "b"], vec![vec![Value::Int(1), Value::Int(2)]]);
        let step =
            RenameStep::from_config(&json!({"mapping": {"a": "alpha", "zzz": "omega"}})).unwrap();
        let out = run(&step, input).await.unwrap();
        assert_eq!(out.column_names(), vec!["alpha", "b"]);
    }

    #[tokio::test]
    async fn test_swapping_names_is_allowed() {
        let input = buffer(&["a", "b"], vec![vec![Value::Int(1), Value::Int(2)]]);
        let step = RenameStep::from_config(&json!({"mapping": {"a": "b", "b": "a"}})).unwrap();
        let out = run(&step, input).await.unwrap();
        assert_eq!(out.column_names(), vec!["b", "a"]);
        assert_eq!(out.column("a").unwrap().get(0), Value::Int(2));
    }
}
