//! I/O abstraction for reading and writing named data sources.
//!
//! The executor never talks to a database or file directly: it asks a
//! [`ConnectorProvider`] for a [`Connector`] and hands it a [`ReadSpec`] or
//! [`WriteSpec`]. Each call opens its own connection, so concurrent runs share nothing.

pub mod file;
pub mod in_memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::buffer::Buffer;
use crate::config::EngineConfig;
use crate::error::{EtlError, Result};

pub use file::FileConnector;
pub use in_memory::{InMemoryConnector, InMemoryConnectors, WriteRecord};
pub use sqlite::SqliteConnector;

/// Behaviour when a write target already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IfExists {
    #[default]
    Append,
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Csv,
    Json,
    Parquet,
    Excel,
}

impl FileFormat {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "csv" | "tsv" | "txt" => Ok(FileFormat::Csv),
            "json" | "jsonl" | "ndjson" => Ok(FileFormat::Json),
            "parquet" => Ok(FileFormat::Parquet),
            "excel" | "xlsx" | "xls" => Ok(FileFormat::Excel),
            other => Err(EtlError::config(format!("unknown file format '{other}'"))),
        }
    }

    /// Guess the format from the file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| {
                EtlError::config(format!(
                    "cannot infer file format for '{}'; set 'format'",
                    path.display()
                ))
            })?;
        Self::parse(ext)
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileFormat::Csv => "csv",
            FileFormat::Json => "json",
            FileFormat::Parquet => "parquet",
            FileFormat::Excel => "excel",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileSpec {
    pub path: PathBuf,
    pub format: FileFormat,
    pub delimiter: u8,
}

impl FileSpec {
    pub fn new(path: impl Into<PathBuf>, format: FileFormat) -> Self {
        Self {
            path: path.into(),
            format,
            delimiter: b',',
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadSpec {
    Table {
        table_name: String,
        schema: Option<String>,
    },
    Query(String),
    File(FileSpec),
}

impl ReadSpec {
    pub fn table(name: impl Into<String>) -> Self {
        ReadSpec::Table {
            table_name: name.into(),
            schema: None,
        }
    }
}

impl fmt::Display for ReadSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadSpec::Table { table_name, schema } => {
                write!(f, "table {}", qualified_name(schema.as_deref(), table_name))
            }
            ReadSpec::Query(sql) => write!(f, "query `{sql}`"),
            ReadSpec::File(spec) => write!(f, "{} file {}", spec.format, spec.path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteSpec {
    Table {
        table_name: String,
        schema: Option<String>,
        if_exists: IfExists,
    },
    File {
        file: FileSpec,
        if_exists: IfExists,
    },
}

impl fmt::Display for WriteSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteSpec::Table {
                table_name, schema, ..
            } => write!(f, "table {}", qualified_name(schema.as_deref(), table_name)),
            WriteSpec::File { file, .. } => {
                write!(f, "{} file {}", file.format, file.path.display())
            }
        }
    }
}

/// `schema.table`, or just `table`
pub fn qualified_name(schema: Option<&str>, table: &str) -> String {
    match schema {
        Some(schema) if !schema.is_empty() => format!("{schema}.{table}"),
        _ => table.to_string(),
    }
}

/// Reads rows from and writes rows to one data source
#[async_trait]
pub trait Connector: Send + Sync {
    /// Human-readable name for logs
    fn name(&self) -> &str;

    /// Read a table, query or file, optionally capped at `limit` rows
    async fn read(&self, spec: &ReadSpec, limit: Option<usize>) -> Result<Buffer>;

    /// Write the buffer, honouring the spec's `if_exists` behaviour
    async fn write(&self, buffer: &Buffer, spec: &WriteSpec) -> Result<()>;

    /// Run raw SQL and return its rows
    async fn execute_query(&self, sql: &str) -> Result<Buffer>;
}

/// Resolves the connectors a pipeline run needs
pub trait ConnectorProvider: Send + Sync {
    /// Connector for a registered data source; unknown ids are connection errors
    fn source(&self, source_id: &str) -> Result<Arc<dyn Connector>>;

    /// Connector table targets are written to by default
    fn warehouse(&self) -> Result<Arc<dyn Connector>>;

    /// Connector for file sources and targets
    fn files(&self) -> Arc<dyn Connector>;
}

/// Provider backed by SQLite files named in the engine configuration
pub struct ConfiguredConnectors {
    sources: HashMap<String, PathBuf>,
    warehouse: PathBuf,
    files: Arc<FileConnector>,
}

impl ConfiguredConnectors {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            sources: config
                .sources
                .iter()
                .map(|(id, source)| (id.clone(), source.path.clone()))
                .collect(),
            warehouse: config.warehouse.path.clone(),
            files: Arc::new(FileConnector::new()),
        }
    }
}

impl ConnectorProvider for ConfiguredConnectors {
    fn source(&self, source_id: &str) -> Result<Arc<dyn Connector>> {
        let path = self
            .sources
            .get(source_id)
            .ok_or_else(|| EtlError::connection(format!("unknown data source '{source_id}'")))?;
        Ok(Arc::new(SqliteConnector::new(source_id, path)))
    }

    fn warehouse(&self) -> Result<Arc<dyn Connector>> {
        Ok(Arc::new(SqliteConnector::new("warehouse", &self.warehouse)))
    }

    fn files(&self) -> Arc<dyn Connector> {
        self.files.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_format_from_extension() {
        assert_eq!(FileFormat::from_path(Path::new("out/data.csv")).unwrap(), FileFormat::Csv);
        assert_eq!(FileFormat::from_path(Path::new("x.xlsx")).unwrap(), FileFormat::Excel);
        assert!(FileFormat::from_path(Path::new("noext")).is_err());
    }

    #[test]
    fn test_configured_connectors_reject_unknown_source() {
        let connectors = ConfiguredConnectors::from_config(&EngineConfig::default());
        let err = connectors.source("nope").err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Connection);
    }
}
