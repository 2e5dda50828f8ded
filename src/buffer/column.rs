use chrono::NaiveDateTime;

use super::value::{DataType, Value};

/// Typed storage for one column; every variant holds one slot per row
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Null(usize),
    Int(Vec<Option<i64>>),
    Float(Vec<Option<f64>>),
    Utf8(Vec<Option<String>>),
    Bool(Vec<Option<bool>>),
    Timestamp(Vec<Option<NaiveDateTime>>),
}

macro_rules! map_slots {
    ($data:expr, $v:ident => $body:expr, $n:ident => $null:expr) => {
        match $data {
            ColumnData::Null($n) => ColumnData::Null($null),
            ColumnData::Int($v) => ColumnData::Int($body),
            ColumnData::Float($v) => ColumnData::Float($body),
            ColumnData::Utf8($v) => ColumnData::Utf8($body),
            ColumnData::Bool($v) => ColumnData::Bool($body),
            ColumnData::Timestamp($v) => ColumnData::Timestamp($body),
        }
    };
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Null(n) => *n,
            ColumnData::Int(v) => v.len(),
            ColumnData::Float(v) => v.len(),
            ColumnData::Utf8(v) => v.len(),
            ColumnData::Bool(v) => v.len(),
            ColumnData::Timestamp(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ColumnData::Null(_) => DataType::Null,
            ColumnData::Int(_) => DataType::Int,
            ColumnData::Float(_) => DataType::Float,
            ColumnData::Utf8(_) => DataType::Utf8,
            ColumnData::Bool(_) => DataType::Bool,
            ColumnData::Timestamp(_) => DataType::Timestamp,
        }
    }

    pub fn get(&self, row: usize) -> Value {
        match self {
            ColumnData::Null(_) => Value::Null,
            ColumnData::Int(v) => v.get(row).copied().flatten().into(),
            ColumnData::Float(v) => v.get(row).copied().flatten().into(),
            ColumnData::Utf8(v) => v.get(row).cloned().flatten().into(),
            ColumnData::Bool(v) => v.get(row).copied().flatten().into(),
            ColumnData::Timestamp(v) => v.get(row).copied().flatten().into(),
        }
    }

    /// Gather rows by index; indices may repeat or reorder
    pub fn take(&self, indices: &[usize]) -> ColumnData {
        map_slots!(self,
            v => indices.iter().map(|&i| v[i].clone()).collect(),
            _n => indices.len())
    }

    /// Gather rows where `None` produces a null slot (outer join padding)
    pub fn take_optional(&self, indices: &[Option<usize>]) -> ColumnData {
        map_slots!(self,
            v => indices.iter().map(|i| i.and_then(|i| v[i].clone())).collect(),
            _n => indices.len())
    }

    /// Build typed storage from loose values.
    ///
    /// All-null input stays `Null`; ints mixed with floats widen to `Float`; any other
    /// mix of types falls back to `Utf8` with every value string-cast.
    pub fn from_values(values: Vec<Value>) -> ColumnData {
        let target = values
            .iter()
            .fold(DataType::Null, |acc, v| acc.unify(v.data_type()));
        Self::build(values, target)
    }

    fn build(values: Vec<Value>, target: DataType) -> ColumnData {
        match target {
            DataType::Null => ColumnData::Null(values.len()),
            DataType::Int => ColumnData::Int(
                values
                    .into_iter()
                    .map(|v| match v {
                        Value::Int(i) => Some(i),
                        _ => None,
                    })
                    .collect(),
            ),
            DataType::Float => ColumnData::Float(values.iter().map(Value::as_f64).collect()),
            DataType::Utf8 => ColumnData::Utf8(
                values
                    .into_iter()
                    .map(|v| match v {
                        Value::Str(s) => Some(s),
                        other => other.to_text(),
                    })
                    .collect(),
            ),
            DataType::Bool => ColumnData::Bool(
                values
                    .into_iter()
                    .map(|v| match v {
                        Value::Bool(b) => Some(b),
                        _ => None,
                    })
                    .collect(),
            ),
            DataType::Timestamp => ColumnData::Timestamp(
                values
                    .into_iter()
                    .map(|v| match v {
                        Value::Timestamp(ts) => Some(ts),
                        _ => None,
                    })
                    .collect(),
            ),
        }
    }
}

/// A named column of a [`Buffer`](super::Buffer)
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn from_values(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(name, ColumnData::from_values(values))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    pub fn into_data(self) -> ColumnData {
        self.data
    }

    pub fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, row: usize) -> Value {
        self.data.get(row)
    }

    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        (0..self.len()).map(move |i| self.data.get(i))
    }

    pub fn null_count(&self) -> usize {
        self.values().filter(Value::is_null).count()
    }

    pub fn renamed(self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: self.data,
        }
    }

    pub fn take(&self, indices: &[usize]) -> Self {
        Self::new(self.name.clone(), self.data.take(indices))
    }

    pub fn take_optional(&self, indices: &[Option<usize>]) -> Self {
        Self::new(self.name.clone(), self.data.take_optional(indices))
    }
}
