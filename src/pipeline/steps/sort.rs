use async_trait::async_trait;
use serde::Deserialize;
use std::cmp::Ordering;

use super::{parse_config, OneOrMany, Step, StepContext};
use crate::buffer::{Buffer, Value};
use crate::error::{EtlError, Result};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Ascending {
    All(bool),
    PerColumn(Vec<bool>),
}

impl Default for Ascending {
    fn default() -> Self {
        Ascending::All(true)
    }
}

#[derive(Debug, Deserialize)]
struct SortConfig {
    #[serde(default)]
    columns: OneOrMany<String>,
    #[serde(default)]
    ascending: Ascending,
}

/// Stable multi-key sort; nulls go last in either direction
#[derive(Debug)]
pub struct SortStep {
    keys: Vec<(String, bool)>,
}

impl SortStep {
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let parsed: SortConfig = parse_config("sort", config)?;
        let columns = parsed.columns.into_vec();
        let directions = match parsed.ascending {
            Ascending::All(asc) => vec![asc; columns.len()],
            Ascending::PerColumn(list) if list.len() == columns.len() => list,
            Ascending::PerColumn(list) => {
                return Err(EtlError::config(format!(
                    "sort has {} columns but {} ascending flags",
                    columns.len(),
                    list.len()
                )))
            }
        };
        Ok(Self {
            keys: columns.into_iter().zip(directions).collect(),
        })
    }
}

fn compare(a: &Value, b: &Value, ascending: bool) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) if ascending => a.total_cmp(b),
        (false, false) => b.total_cmp(a),
    }
}

#[async_trait]
impl Step for SortStep {
    fn step_type(&self) -> &'static str {
        "sort"
    }

    async fn process(&self, buffer: Buffer, _ctx: &StepContext<'_>) -> Result<Buffer> {
        if self.keys.is_empty() {
            return Ok(buffer);
        }
        let keys = self
            .keys
            .iter()
            .map(|(name, asc)| Ok((buffer.require_column(name)?, *asc)))
            .collect::<Result<Vec<_>>>()?;

        let mut order: Vec<usize> = (0..buffer.row_count()).collect();
        order.sort_by(|&x, &y| {
            keys.iter()
                .map(|(column, asc)| compare(&column.get(x), &column.get(y), *asc))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        });
        Ok(buffer.take(&order))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::steps::test_support::{buffer, run, values};
    use serde_json::json;

    fn people() -> Buffer {
        buffer(
            &["team", "score", "name"],
            vec![
                vec!["b".into(), Value::Int(3), "ann".into()],
                vec!["a".into(), Value::Null, "bob".into()],
                vec!["a".into(), Value::Int(7), "cy".into()],
                vec!["b".into(), Value::Int(3), "dee".into()],
                vec!["a".into(), Value::Int(1), "eve".into()],
            ],
        )
    }

    #[tokio::test]
    async fn test_multi_key_with_mixed_directions() {
        let step = SortStep::from_config(&json!({
            "columns": ["team", "score"],
            "ascending": [true, false]
        }))
        .unwrap();
        let out = run(&step, people()).await.unwrap();
        assert_eq!(
            values(&out, "name"),
            vec![Value::from("cy"), "eve".into(), "bob".into(), "ann".into(), "dee".into()]
        );
    }

    #[tokio::test]
    async fn test_nulls_last_when_ascending() {
        let step = SortStep::from_config(&json!({"columns": "score"})).unwrap();
        let out = run(&step, people()).await.unwrap();
        assert_eq!(
            values(&out, "name"),
            vec![Value::from("eve"), "ann".into(), "dee".into(), "cy".into(), "bob".into()]
        );
    }

    #[test]
    fn test_mismatched_flags_rejected() {
        let err = SortStep::from_config(&json!({"columns": ["a", "b"], "ascending": [true]}))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_missing_column_fails() {
        let step = SortStep::from_config(&json!({"columns": ["nope"]})).unwrap();
        assert!(run(&step, people()).await.is_err());
    }
}
