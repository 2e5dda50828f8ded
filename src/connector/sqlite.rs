use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{Connector, IfExists, ReadSpec, WriteSpec};
use crate::buffer::value::format_timestamp;
use crate::buffer::{Buffer, DataType, Value};
use crate::error::{EtlError, Result};

/// Connector over a SQLite database file; each call opens its own connection
pub struct SqliteConnector {
    name: String,
    path: PathBuf,
}

impl SqliteConnector {
    pub fn new(name: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            path: path.as_ref().to_path_buf(),
        }
    }

    fn connect(path: &Path) -> Result<Connection> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Connection::open(path).map_err(|e| {
            EtlError::connection(format!(
                "failed to open SQLite database '{}': {e}",
                path.display()
            ))
        })
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Connection) -> Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || work(Self::connect(&path)?))
            .await
            .map_err(|e| EtlError::connection(format!("SQLite worker failed: {e}")))?
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn qualified(schema: Option<&str>, table: &str) -> String {
    match schema {
        Some(schema) if !schema.is_empty() => {
            format!("{}.{}", quote_ident(schema), quote_ident(table))
        }
        _ => quote_ident(table),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) => Value::Str(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Str(hex::encode(bytes)),
    }
}

fn to_sql(value: Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Int(i) => SqlValue::Integer(i),
        Value::Float(f) => SqlValue::Real(f),
        Value::Str(s) => SqlValue::Text(s),
        Value::Bool(b) => SqlValue::Integer(i64::from(b)),
        Value::Timestamp(ts) => SqlValue::Text(format_timestamp(&ts)),
    }
}

fn sql_type(data_type: DataType) -> &'static str {
    match data_type {
        DataType::Int | DataType::Bool => "INTEGER",
        DataType::Float => "REAL",
        DataType::Utf8 | DataType::Timestamp | DataType::Null => "TEXT",
    }
}

fn query_buffer(conn: &Connection, sql: &str) -> Result<Buffer> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = names.len();
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(from_sql(row.get_ref(i)?));
        }
        out.push(values);
    }
    Ok(Buffer::from_rows(names, out)?)
}

fn write_table(
    conn: &mut Connection,
    buffer: &Buffer,
    table: &str,
    if_exists: IfExists,
) -> Result<()> {
    let tx = conn.transaction()?;
    let columns: Vec<String> = buffer
        .columns()
        .iter()
        .map(|c| format!("{} {}", quote_ident(c.name()), sql_type(c.data_type())))
        .collect();
    if if_exists == IfExists::Replace {
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {table}"))?;
    }
    tx.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} ({})",
        columns.join(", ")
    ))?;
    if buffer.column_count() > 0 {
        let names: Vec<String> = buffer.column_names().into_iter().map(quote_ident).collect();
        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders})",
            names.join(", ")
        );
        let mut stmt = tx.prepare(&sql)?;
        for row in 0..buffer.row_count() {
            stmt.execute(params_from_iter(buffer.row(row).into_iter().map(to_sql)))?;
        }
        stmt.finalize()?;
    }
    tx.commit()?;
    Ok(())
}

#[async_trait]
impl Connector for SqliteConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self, spec: &ReadSpec, limit: Option<usize>) -> Result<Buffer> {
        let base = match spec {
            ReadSpec::Table { table_name, schema } => {
                format!("SELECT * FROM {}", qualified(schema.as_deref(), table_name))
            }
            ReadSpec::Query(sql) => sql.trim().trim_end_matches(';').to_string(),
            ReadSpec::File(_) => {
                return Err(EtlError::config(format!(
                    "connector '{}' cannot read files",
                    self.name
                )))
            }
        };
        let sql = match (spec, limit) {
            (_, None) => base,
            (ReadSpec::Query(_), Some(n)) => format!("SELECT * FROM ({base}) LIMIT {n}"),
            (_, Some(n)) => format!("{base} LIMIT {n}"),
        };
        debug!(connector = %self.name, %sql, "reading from SQLite");
        self.blocking(move |conn| query_buffer(&conn, &sql)).await
    }

    async fn write(&self, buffer: &Buffer, spec: &WriteSpec) -> Result<()> {
        let (table, if_exists) = match spec {
            WriteSpec::Table {
                table_name,
                schema,
                if_exists,
            } => (qualified(schema.as_deref(), table_name), *if_exists),
            WriteSpec::File { .. } => {
                return Err(EtlError::config(format!(
                    "connector '{}' cannot write files",
                    self.name
                )))
            }
        };
        debug!(
            connector = %self.name,
            %table,
            rows = buffer.row_count(),
            ?if_exists,
            "writing to SQLite"
        );
        let buffer = buffer.clone();
        self.blocking(move |mut conn| write_table(&mut conn, &buffer, &table, if_exists))
            .await
    }

    async fn execute_query(&self, sql: &str) -> Result<Buffer> {
        let sql = sql.to_string();
        self.blocking(move |conn| query_buffer(&conn, &sql)).await
    }
}
