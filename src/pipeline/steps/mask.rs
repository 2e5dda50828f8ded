use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::{parse_config, Step, StepContext};
use crate::buffer::{Buffer, Column, ColumnData};
use crate::error::{EtlError, Result};

fn default_keep() -> usize {
    2
}

fn default_mask_char() -> char {
    '*'
}

fn default_hash_length() -> usize {
    16
}

fn default_replacement() -> String {
    "***".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
enum MaskStrategy {
    Partial {
        #[serde(default = "default_keep")]
        start: usize,
        #[serde(default = "default_keep")]
        end: usize,
        #[serde(default = "default_mask_char")]
        mask_char: char,
    },
    Hash {
        #[serde(default = "default_hash_length")]
        length: usize,
    },
    Replace {
        #[serde(default = "default_replacement", alias = "replacement")]
        value: String,
    },
}

#[derive(Debug, Deserialize)]
struct MaskRule {
    column: String,
    #[serde(flatten)]
    strategy: MaskStrategy,
}

#[derive(Debug, Deserialize)]
struct MaskConfig {
    #[serde(default)]
    masks: Vec<MaskRule>,
}

/// Obscures sensitive column values; nulls stay null except under `replace`
#[derive(Debug)]
pub struct MaskStep {
    masks: Vec<MaskRule>,
}

impl MaskStep {
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let parsed: MaskConfig = parse_config("mask", config)?;
        for rule in &parsed.masks {
            if let MaskStrategy::Hash { length } = rule.strategy {
                if length == 0 || length > 64 {
                    return Err(EtlError::config(format!(
                        "hash length for '{}' must be between 1 and 64",
                        rule.column
                    )));
                }
            }
        }
        Ok(Self { masks: parsed.masks })
    }
}

fn partial(text: &str, start: usize, end: usize, mask_char: char) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= start.saturating_add(end) {
        return std::iter::repeat(mask_char).take(chars.len()).collect();
    }
    let middle = chars.len() - start - end;
    chars[..start]
        .iter()
        .copied()
        .chain(std::iter::repeat(mask_char).take(middle))
        .chain(chars[chars.len() - end..].iter().copied())
        .collect()
}

fn digest(text: &str, length: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let mut hex = hex::encode(hasher.finalize());
    hex.truncate(length);
    hex
}

fn mask_column(column: &Column, strategy: &MaskStrategy) -> Column {
    let masked: Vec<Option<String>> = column
        .values()
        .map(|cell| match (strategy, cell.to_text()) {
            (MaskStrategy::Replace { value }, _) => Some(value.clone()),
            (_, None) => None,
            (MaskStrategy::Partial { start, end, mask_char }, Some(text)) => {
                Some(partial(&text, *start, *end, *mask_char))
            }
            (MaskStrategy::Hash { length }, Some(text)) => Some(digest(&text, *length)),
        })
        .collect();
    Column::new(column.name(), ColumnData::Utf8(masked))
}

#[async_trait]
impl Step for MaskStep {
    fn step_type(&self) -> &'static str {
        "mask"
    }

    async fn process(&self, buffer: Buffer, _ctx: &StepContext<'_>) -> Result<Buffer> {
        let mut current = buffer;
        for rule in &self.masks {
            let masked = mask_column(current.require_column(&rule.column)?, &rule.strategy);
            current = current.with_column(masked)?;
        }
        Ok(current)
    }
}
