//! In-memory tabular buffer the pipeline steps operate on.
//!
//! A [`Buffer`] is an ordered set of uniquely named, typed columns that all share one
//! row count. Every operation returns a new buffer, so a step can never observe
//! another step mutating its input.

pub mod column;
pub mod value;

use std::collections::{HashMap, HashSet};
use thiserror::Error;

pub use column::{Column, ColumnData};
pub use value::{DataType, Value};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BufferError {
    #[error("column '{column}' has {actual} rows, expected {expected}")]
    RowCountMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("duplicate column name: {0}")]
    DuplicateColumn(String),

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    #[error("row {row} has {actual} values, expected {expected}")]
    RowWidth {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("cannot convert value '{value}' in column '{column}' to {target}")]
    Coercion {
        column: String,
        value: String,
        target: DataType,
    },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Buffer {
    columns: Vec<Column>,
    rows: usize,
}

impl Buffer {
    /// Assemble a buffer, checking name uniqueness and uniform row counts
    pub fn new(columns: Vec<Column>) -> Result<Self, BufferError> {
        let rows = columns.first().map(Column::len).unwrap_or(0);
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name()) {
                return Err(BufferError::DuplicateColumn(column.name().to_string()));
            }
            if column.len() != rows {
                return Err(BufferError::RowCountMismatch {
                    column: column.name().to_string(),
                    expected: rows,
                    actual: column.len(),
                });
            }
        }
        Ok(Self { columns, rows })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from row-major values; each row must have one value per name
    pub fn from_rows(names: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, BufferError> {
        let width = names.len();
        let mut cells: Vec<Vec<Value>> =
            (0..width).map(|_| Vec::with_capacity(rows.len())).collect();
        let row_count = rows.len();
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != width {
                return Err(BufferError::RowWidth {
                    row: i,
                    expected: width,
                    actual: row.len(),
                });
            }
            for (slot, value) in cells.iter_mut().zip(row) {
                slot.push(value);
            }
        }
        let columns = names
            .into_iter()
            .zip(cells)
            .map(|(name, values)| Column::from_values(name, values))
            .collect();
        let mut buffer = Self::new(columns)?;
        buffer.rows = row_count;
        Ok(buffer)
    }

    /// Build from JSON objects; columns appear in first-seen key order
    pub fn from_json_rows(records: &[serde_json::Value]) -> Result<Self, BufferError> {
        let mut names: Vec<String> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for record in records {
            if let Some(obj) = record.as_object() {
                for key in obj.keys() {
                    if !positions.contains_key(key) {
                        positions.insert(key.clone(), names.len());
                        names.push(key.clone());
                    }
                }
            }
        }
        let rows = records
            .iter()
            .map(|record| {
                names
                    .iter()
                    .map(|name| record.get(name).map(Value::from_json).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Self::from_rows(names, rows)
    }

    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(Column::name).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name() == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name() == name)
    }

    pub fn require_column(&self, name: &str) -> Result<&Column, BufferError> {
        self.column(name)
            .ok_or_else(|| BufferError::ColumnNotFound(name.to_string()))
    }

    pub fn row(&self, index: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c.get(index)).collect()
    }

    /// Gather rows by index into a new buffer
    pub fn take(&self, indices: &[usize]) -> Buffer {
        Buffer {
            columns: self.columns.iter().map(|c| c.take(indices)).collect(),
            rows: indices.len(),
        }
    }

    pub fn head(&self, n: usize) -> Buffer {
        if n >= self.rows {
            return self.clone();
        }
        let indices: Vec<usize> = (0..n).collect();
        self.take(&indices)
    }

    /// Project to the named columns in the given order; unknown names are ignored
    pub fn select(&self, names: &[String]) -> Buffer {
        let mut picked = HashSet::new();
        let columns = names
            .iter()
            .filter(|n| picked.insert(n.as_str()))
            .filter_map(|n| self.column(n).cloned())
            .collect();
        Buffer {
            columns,
            rows: self.rows,
        }
    }

    /// Remove the named columns; unknown names are ignored
    pub fn drop_columns(&self, names: &[String]) -> Buffer {
        let drop: HashSet<&str> = names.iter().map(String::as_str).collect();
        Buffer {
            columns: self
                .columns
                .iter()
                .filter(|c| !drop.contains(c.name()))
                .cloned()
                .collect(),
            rows: self.rows,
        }
    }

    /// Replace a column of the same name in place, or append a new one
    pub fn with_column(mut self, column: Column) -> Result<Buffer, BufferError> {
        let expected = if self.columns.is_empty() { column.len() } else { self.rows };
        if column.len() != expected {
            return Err(BufferError::RowCountMismatch {
                column: column.name().to_string(),
                expected,
                actual: column.len(),
            });
        }
        match self.column_index(column.name()) {
            Some(i) => self.columns[i] = column,
            None => self.columns.push(column),
        }
        self.rows = expected;
        Ok(self)
    }

    /// Rename columns by mapping; names missing from the buffer are ignored
    pub fn rename(self, mapping: &HashMap<String, String>) -> Result<Buffer, BufferError> {
        let rows = self.rows;
        let columns = self
            .columns
            .into_iter()
            .map(|c| match mapping.get(c.name()) {
                Some(new_name) => c.renamed(new_name.clone()),
                None => c,
            })
            .collect();
        let mut renamed = Buffer::new(columns)?;
        renamed.rows = rows;
        Ok(renamed)
    }

    /// Stack `other` under `self`; columns are matched by name and missing ones padded with nulls
    pub fn concat(&self, other: &Buffer) -> Result<Buffer, BufferError> {
        let mut names: Vec<String> = self.column_names().into_iter().map(String::from).collect();
        for name in other.column_names() {
            if !self.has_column(name) {
                names.push(name.to_string());
            }
        }
        let columns = names
            .into_iter()
            .map(|name| {
                let upper = self.column(&name);
                let lower = other.column(&name);
                let values = (0..self.rows)
                    .map(|i| upper.map(|c| c.get(i)).unwrap_or(Value::Null))
                    .chain((0..other.rows).map(|i| lower.map(|c| c.get(i)).unwrap_or(Value::Null)))
                    .collect();
                Column::from_values(name, values)
            })
            .collect();
        let mut stacked = Buffer::new(columns)?;
        stacked.rows = self.rows + other.rows;
        Ok(stacked)
    }

    /// Rows rendered as JSON objects, used for previews and JSON files
    pub fn to_json_rows(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        (0..self.rows)
            .map(|i| {
                self.columns
                    .iter()
                    .map(|c| (c.name().to_string(), c.get(i).to_json()))
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Buffer {
        Buffer::from_rows(
            vec!["id".into(), "name".into()],
            vec![
                vec![Value::Int(1), Value::from("a")],
                vec![Value::Int(2), Value::from("b")],
                vec![Value::Int(3), Value::Null],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_new_rejects_ragged_columns() {
        let err = Buffer::new(vec![
            Column::from_values("a", vec![Value::Int(1)]),
            Column::from_values("b", vec![Value::Int(1), Value::Int(2)]),
        ])
        .unwrap_err();
        assert!(matches!(err, BufferError::RowCountMismatch { .. }));
    }

    #[test]
    fn test_new_rejects_duplicate_names() {
        let err = Buffer::new(vec![
            Column::from_values("a", vec![Value::Int(1)]),
            Column::from_values("a", vec![Value::Int(2)]),
        ])
        .unwrap_err();
        assert_eq!(err, BufferError::DuplicateColumn("a".into()));
    }

    #[test]
    fn test_select_and_drop_ignore_unknown_names() {
        let buffer = sample();
        let selected = buffer.select(&["name".into(), "missing".into()]);
        assert_eq!(selected.column_names(), vec!["name"]);
        assert_eq!(selected.row_count(), 3);

        let dropped = buffer.drop_columns(&["id".into(), "missing".into()]);
        assert_eq!(dropped.column_names(), vec!["name"]);
    }

    #[test]
    fn test_take_keeps_row_count_without_columns() {
        let buffer = sample().select(&[]);
        assert_eq!(buffer.take(&[0, 2]).row_count(), 2);
    }

    #[test]
    fn test_from_json_rows_unions_keys() {
        let buffer = Buffer::from_json_rows(&[json!({"a": 1}), json!({"a": 2, "b": "x"})]).unwrap();
        assert_eq!(buffer.column_names(), vec!["a", "b"]);
        assert_eq!(buffer.row(0), vec![Value::Int(1), Value::Null]);
    }

    #[test]
    fn test_rename_rejects_collisions() {
        let mapping = HashMap::from([("id".to_string(), "name".to_string())]);
        assert!(sample().rename(&mapping).is_err());
    }
}
