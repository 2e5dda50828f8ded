use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::{parse_config, OneOrMany, Step, StepContext};
use crate::buffer::{Buffer, Column, Value};
use crate::connector::ReadSpec;
use crate::error::{EtlError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    #[default]
    Left,
    Right,
    Inner,
    Outer,
}

#[derive(Debug, Deserialize)]
struct JoinConfig {
    source_id: String,
    #[serde(default)]
    join_table: Option<String>,
    #[serde(default)]
    join_query: Option<String>,
    #[serde(default)]
    schema: Option<String>,
    #[serde(default)]
    join_type: JoinType,
    #[serde(default)]
    on: Option<OneOrMany<String>>,
    #[serde(default)]
    left_on: Option<OneOrMany<String>>,
    #[serde(default)]
    right_on: Option<OneOrMany<String>>,
    #[serde(default)]
    suffixes: Option<(String, String)>,
}

#[derive(Debug)]
enum JoinSide {
    Table { table_name: String, schema: Option<String> },
    Query(String),
}

/// Relational join against a table or query on another data source
#[derive(Debug)]
pub struct JoinStep {
    source_id: String,
    side: JoinSide,
    join_type: JoinType,
    left_on: Vec<String>,
    right_on: Vec<String>,
    suffixes: (String, String),
}

impl JoinStep {
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let parsed: JoinConfig = parse_config("join", config)?;
        let side = match (parsed.join_table, parsed.join_query) {
            (Some(table_name), _) => JoinSide::Table {
                table_name,
                schema: parsed.schema,
            },
            (None, Some(query)) => JoinSide::Query(query),
            (None, None) => {
                return Err(EtlError::config("join requires 'join_table' or 'join_query'"))
            }
        };
        let (left_on, right_on) = match (parsed.on, parsed.left_on, parsed.right_on) {
            (Some(on), _, _) => {
                let keys = on.into_vec();
                (keys.clone(), keys)
            }
            (None, Some(left), Some(right)) => (left.into_vec(), right.into_vec()),
            _ => {
                return Err(EtlError::config(
                    "join requires 'on' or both 'left_on' and 'right_on'",
                ))
            }
        };
        if left_on.is_empty() || left_on.len() != right_on.len() {
            return Err(EtlError::config(format!(
                "join key lists must be non-empty and equal length (left {}, right {})",
                left_on.len(),
                right_on.len()
            )));
        }
        Ok(Self {
            source_id: parsed.source_id,
            side,
            join_type: parsed.join_type,
            left_on,
            right_on,
            suffixes: parsed
                .suffixes
                .unwrap_or_else(|| ("_x".to_string(), "_y".to_string())),
        })
    }

    async fn load_right(&self, ctx: &StepContext<'_>) -> Result<Buffer> {
        let connector = ctx.connectors.source(&self.source_id)?;
        debug!(source_id = %self.source_id, connector = connector.name(), "reading join side");
        match &self.side {
            JoinSide::Table { table_name, schema } => {
                let spec = ReadSpec::Table {
                    table_name: table_name.clone(),
                    schema: schema.clone(),
                };
                connector.read(&spec, ctx.join_row_limit).await
            }
            JoinSide::Query(sql) => {
                let rows = connector.execute_query(sql).await?;
                Ok(match ctx.join_row_limit {
                    Some(limit) => rows.head(limit),
                    None => rows,
                })
            }
        }
    }

    /// Row pairings in output order
    fn pair_rows(
        &self,
        left: &[&Column],
        right: &[&Column],
        left_rows: usize,
        right_rows: usize,
    ) -> Vec<(Option<usize>, Option<usize>)> {
        let key = |columns: &[&Column], row: usize| -> Option<Vec<Value>> {
            let key: Vec<Value> = columns.iter().map(|c| c.get(row).join_key()).collect();
            (!key.iter().any(Value::is_null)).then_some(key)
        };
        let index = |columns: &[&Column], rows: usize| {
            let mut index: HashMap<Vec<Value>, Vec<usize>> = HashMap::new();
            for row in 0..rows {
                if let Some(k) = key(columns, row) {
                    index.entry(k).or_default().push(row);
                }
            }
            index
        };

        let mut pairs = Vec::new();
        if self.join_type == JoinType::Right {
            let left_index = index(left, left_rows);
            for r in 0..right_rows {
                match key(right, r).and_then(|k| left_index.get(&k)) {
                    Some(matches) => pairs.extend(matches.iter().map(|&l| (Some(l), Some(r)))),
                    None => pairs.push((None, Some(r))),
                }
            }
            return pairs;
        }

        let right_index = index(right, right_rows);
        let mut matched_right = HashSet::new();
        for l in 0..left_rows {
            match key(left, l).and_then(|k| right_index.get(&k)) {
                Some(matches) => {
                    matched_right.extend(matches.iter().copied());
                    pairs.extend(matches.iter().map(|&r| (Some(l), Some(r))));
                }
                None if self.join_type != JoinType::Inner => pairs.push((Some(l), None)),
                None => {}
            }
        }
        if self.join_type == JoinType::Outer {
            pairs.extend(
                (0..right_rows)
                    .filter(|r| !matched_right.contains(r))
                    .map(|r| (None, Some(r))),
            );
        }
        pairs
    }
}

#[async_trait]
impl Step for JoinStep {
    fn step_type(&self) -> &'static str {
        "join"
    }

    async fn process(&self, left: Buffer, ctx: &StepContext<'_>) -> Result<Buffer> {
        let right = self.load_right(ctx).await?;
        let left_keys = self
            .left_on
            .iter()
            .map(|n| left.require_column(n))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let right_keys = self
            .right_on
            .iter()
            .map(|n| right.require_column(n))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let pairs = self.pair_rows(&left_keys, &right_keys, left.row_count(), right.row_count());
        let left_idx: Vec<Option<usize>> = pairs.iter().map(|p| p.0).collect();
        let right_idx: Vec<Option<usize>> = pairs.iter().map(|p| p.1).collect();

        // Keys joined under one name collapse into a single column
        let shared: HashMap<&str, &str> = self
            .left_on
            .iter()
            .zip(&self.right_on)
            .filter(|(l, r)| l == r)
            .map(|(l, r)| (l.as_str(), r.as_str()))
            .collect();
        let right_names: HashSet<&str> = right
            .column_names()
            .into_iter()
            .filter(|n| !shared.contains_key(n))
            .collect();
        let left_names: HashSet<&str> = left.column_names().into_iter().collect();

        let mut columns = Vec::new();
        for column in left.columns() {
            let name = column.name();
            if let Some(right_name) = shared.get(name) {
                let other = right.require_column(right_name)?;
                let values = pairs
                    .iter()
                    .map(|(l, r)| match (l, r) {
                        (Some(l), _) => column.get(*l),
                        (None, Some(r)) => other.get(*r),
                        (None, None) => Value::Null,
                    })
                    .collect();
                columns.push(Column::from_values(name, values));
                continue;
            }
            let taken = column.take_optional(&left_idx);
            if right_names.contains(name) {
                columns.push(taken.renamed(format!("{name}{}", self.suffixes.0)));
            } else {
                columns.push(taken);
            }
        }
        for column in right.columns() {
            let name = column.name();
            if shared.contains_key(name) {
                continue;
            }
            let taken = column.take_optional(&right_idx);
            if left_names.contains(name) {
                columns.push(taken.renamed(format!("{name}{}", self.suffixes.1)));
            } else {
                columns.push(taken);
            }
        }

        Ok(Buffer::new(columns)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{InMemoryConnector, InMemoryConnectors};
    use crate::pipeline::steps::test_support::{buffer, values};
    use serde_json::json;

    fn orders() -> Buffer {
        buffer(
            &["customer_id", "amount"],
            vec![
                vec![Value::Int(1), Value::Int(10)],
                vec![Value::Int(2), Value::Int(20)],
                vec![Value::Int(3), Value::Int(30)],
                vec![Value::Null, Value::Int(40)],
            ],
        )
    }

    fn connectors() -> InMemoryConnectors {
        let customers = buffer(
            &["customer_id", "name", "amount"],
            vec![
                vec![Value::Int(1), "ann".into(), Value::Int(100)],
                vec![Value::Int(1), "ann-dup".into(), Value::Int(101)],
                vec![Value::Int(2), "bob".into(), Value::Int(200)],
                vec![Value::Int(9), "zed".into(), Value::Int(900)],
            ],
        );
        InMemoryConnectors::new().with_source(
            "crm",
            InMemoryConnector::new("crm")
                .with_table("customers", customers.clone())
                .with_query("SELECT * FROM customers", customers),
        )
    }

    async fn join(config: serde_json::Value) -> Result<Buffer> {
        let step = JoinStep::from_config(&config)?;
        let connectors = connectors();
        let ctx = StepContext {
            connectors: &connectors,
            join_row_limit: None,
        };
        step.process(orders(), &ctx).await
    }

    #[tokio::test]
    async fn test_left_join_keeps_every_left_row() {
        let out = join(json!({"source_id": "crm", "join_table": "customers", "on": "customer_id"}))
            .await
            .unwrap();
        // customer 1 matches twice
        assert_eq!(out.row_count(), 5);
        assert_eq!(
            out.column_names(),
            vec!["customer_id", "amount_x", "name", "amount_y"]
        );
        assert_eq!(
            values(&out, "name"),
            vec![Value::from("ann"), "ann-dup".into(), "bob".into(), Value::Null, Value::Null]
        );
    }

    #[tokio::test]
    async fn test_inner_join_via_query() {
        let out = join(json!({
            "source_id": "crm",
            "join_query": "SELECT * FROM customers",
            "join_type": "inner",
            "on": ["customer_id"],
            "suffixes": ["", "_customer"]
        }))
        .await
        .unwrap();
        assert_eq!(out.row_count(), 3);
        assert!(out.has_column("amount_customer"));
        assert!(out.has_column("amount"));
    }

    #[tokio::test]
    async fn test_outer_join_appends_unmatched_right_rows() {
        let out = join(json!({
            "source_id": "crm", "join_table": "customers", "join_type": "outer", "on": "customer_id"
        }))
        .await
        .unwrap();
        assert_eq!(out.row_count(), 6);
        assert_eq!(out.column("customer_id").unwrap().get(5), Value::Int(9));
    }

    #[tokio::test]
    async fn test_right_join_follows_right_order() {
        let out = join(json!({
            "source_id": "crm", "join_table": "customers", "join_type": "right", "on": "customer_id"
        }))
        .await
        .unwrap();
        assert_eq!(
            values(&out, "customer_id"),
            vec![Value::Int(1), Value::Int(1), Value::Int(2), Value::Int(9)]
        );
    }

    #[tokio::test]
    async fn test_same_named_left_and_right_keys_collapse() {
        let out = join(json!({
            "source_id": "crm", "join_table": "customers",
            "left_on": "customer_id", "right_on": "customer_id", "join_type": "inner"
        }))
        .await
        .unwrap();
        assert_eq!(out.column_names(), vec!["customer_id", "amount_x", "name", "amount_y"]);
    }

    #[test]
    fn test_missing_keys_is_configuration_error() {
        let err =
            JoinStep::from_config(&json!({"source_id": "crm", "join_table": "t"})).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_unknown_source_fails() {
        let err = join(json!({"source_id": "nope", "join_table": "customers", "on": "customer_id"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Connection);
    }
}
