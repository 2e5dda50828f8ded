use async_trait::async_trait;
use serde::Deserialize;

use super::{parse_config, Step, StepContext};
use crate::buffer::Buffer;
use crate::error::{EtlError, Result};
use crate::expr::{parse_program, run_program, Statement};

#[derive(Debug, Deserialize)]
struct CustomCodeConfig {
    #[serde(default)]
    code: String,
}

/// Runs a multi-statement expression program against the buffer.
///
/// Statements are `name = expr` (derive or overwrite a column) and `where expr`
/// (keep matching rows), applied in order. The buffer that comes out of the last
/// statement is the step's result. Only registered when the engine allows custom
/// code.
#[derive(Debug)]
pub struct CustomCodeStep {
    program: Vec<Statement>,
}

impl CustomCodeStep {
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let parsed: CustomCodeConfig = parse_config("custom_code", config)?;
        if parsed.code.trim().is_empty() {
            return Err(EtlError::config("custom_code requires non-empty 'code'"));
        }
        let program = parse_program(&parsed.code)?;
        Ok(Self { program })
    }
}

#[async_trait]
impl Step for CustomCodeStep {
    fn step_type(&self) -> &'static str {
        "custom_code"
    }

    async fn process(&self, buffer: Buffer, _ctx: &StepContext<'_>) -> Result<Buffer> {
        run_program(buffer, &self.program)
    }
}
