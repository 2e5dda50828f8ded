use async_trait::async_trait;
use csv::{ReaderBuilder, WriterBuilder};
use std::fs::{self, OpenOptions};
use std::path::Path;
use tracing::debug;

use super::{Connector, FileFormat, FileSpec, IfExists, ReadSpec, WriteSpec};
use crate::buffer::value::{parse_bool, parse_timestamp};
use crate::buffer::{Buffer, Column, ColumnData};
use crate::error::{EtlError, Result};

/// Connector for delimited and JSON files on the local filesystem
#[derive(Debug, Default)]
pub struct FileConnector;

impl FileConnector {
    pub fn new() -> Self {
        Self
    }
}

fn unsupported(format: FileFormat) -> EtlError {
    EtlError::config(format!("file format '{format}' is not supported"))
}

/// Infer a column type from CSV text cells: int, then float, bool, timestamp, text
fn infer_column(name: String, cells: Vec<Option<String>>) -> Column {
    let present = || cells.iter().flatten();
    let data = if present().next().is_none() {
        ColumnData::Null(cells.len())
    } else if present().all(|c| c.trim().parse::<i64>().is_ok()) {
        ColumnData::Int(
            cells
                .iter()
                .map(|c| c.as_ref().and_then(|s| s.trim().parse().ok()))
                .collect(),
        )
    } else if present().all(|c| c.trim().parse::<f64>().is_ok()) {
        ColumnData::Float(
            cells
                .iter()
                .map(|c| c.as_ref().and_then(|s| s.trim().parse().ok()))
                .collect(),
        )
    } else if present().all(|c| parse_bool(c).is_some()) {
        ColumnData::Bool(cells.iter().map(|c| c.as_deref().and_then(parse_bool)).collect())
    } else if present().all(|c| parse_timestamp(c).is_some()) {
        ColumnData::Timestamp(
            cells
                .iter()
                .map(|c| c.as_deref().and_then(parse_timestamp))
                .collect(),
        )
    } else {
        ColumnData::Utf8(cells)
    };
    Column::new(name, data)
}

fn read_csv(spec: &FileSpec, limit: Option<usize>) -> Result<Buffer> {
    let mut reader = ReaderBuilder::new()
        .delimiter(spec.delimiter)
        .has_headers(true)
        .flexible(false)
        .from_path(&spec.path)?;
    let names: Vec<String> = reader.headers()?.iter().map(String::from).collect();
    let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); names.len()];
    for (i, record) in reader.records().enumerate() {
        if limit.is_some_and(|n| i >= n) {
            break;
        }
        let record = record?;
        for (slot, field) in cells.iter_mut().zip(record.iter()) {
            slot.push(if field.is_empty() { None } else { Some(field.to_string()) });
        }
    }
    let columns = names
        .into_iter()
        .zip(cells)
        .map(|(name, values)| infer_column(name, values))
        .collect();
    Ok(Buffer::new(columns)?)
}

fn read_json_records(path: &Path) -> Result<Vec<serde_json::Value>> {
    let text = fs::read_to_string(path)?;
    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    trimmed
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(EtlError::from))
        .collect()
}

fn read_json(spec: &FileSpec, limit: Option<usize>) -> Result<Buffer> {
    let mut records = read_json_records(&spec.path)?;
    if let Some(n) = limit {
        records.truncate(n);
    }
    Ok(Buffer::from_json_rows(&records)?)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn write_csv(buffer: &Buffer, spec: &FileSpec, if_exists: IfExists) -> Result<()> {
    ensure_parent(&spec.path)?;
    let appending = if_exists == IfExists::Append
        && fs::metadata(&spec.path).map(|m| m.len() > 0).unwrap_or(false);
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(appending)
        .truncate(!appending)
        .open(&spec.path)?;
    let mut writer = WriterBuilder::new().delimiter(spec.delimiter).from_writer(file);
    if !appending {
        writer.write_record(buffer.column_names())?;
    }
    for row in 0..buffer.row_count() {
        let fields: Vec<String> = buffer
            .row(row)
            .iter()
            .map(|v| v.to_text().unwrap_or_default())
            .collect();
        writer.write_record(&fields)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_json(buffer: &Buffer, spec: &FileSpec, if_exists: IfExists) -> Result<()> {
    ensure_parent(&spec.path)?;
    let appending = if_exists == IfExists::Append && spec.path.exists();
    let mut records: Vec<serde_json::Value> = if appending {
        read_json_records(&spec.path)?
    } else {
        Vec::new()
    };
    records.extend(buffer.to_json_rows().into_iter().map(serde_json::Value::Object));
    fs::write(&spec.path, serde_json::to_string_pretty(&records)?)?;
    Ok(())
}

#[async_trait]
impl Connector for FileConnector {
    fn name(&self) -> &str {
        "files"
    }

    async fn read(&self, spec: &ReadSpec, limit: Option<usize>) -> Result<Buffer> {
        let ReadSpec::File(file) = spec else {
            return Err(EtlError::config(format!("file connector cannot read {spec}")));
        };
        if !file.path.exists() {
            return Err(EtlError::connection(format!(
                "file not found: {}",
                file.path.display()
            )));
        }
        debug!(path = %file.path.display(), format = %file.format, "reading file");
        let file = file.clone();
        tokio::task::spawn_blocking(move || match file.format {
            FileFormat::Csv => read_csv(&file, limit),
            FileFormat::Json => read_json(&file, limit),
            other => Err(unsupported(other)),
        })
        .await
        .map_err(|e| EtlError::connection(format!("file reader failed: {e}")))?
    }

    async fn write(&self, buffer: &Buffer, spec: &WriteSpec) -> Result<()> {
        let WriteSpec::File { file, if_exists } = spec else {
            return Err(EtlError::config(format!("file connector cannot write {spec}")));
        };
        debug!(
            path = %file.path.display(),
            format = %file.format,
            rows = buffer.row_count(),
            "writing file"
        );
        let (buffer, file, if_exists) = (buffer.clone(), file.clone(), *if_exists);
        tokio::task::spawn_blocking(move || match file.format {
            FileFormat::Csv => write_csv(&buffer, &file, if_exists),
            FileFormat::Json => write_json(&buffer, &file, if_exists),
            other => Err(unsupported(other)),
        })
        .await
        .map_err(|e| EtlError::connection(format!("file writer failed: {e}")))?
    }

    async fn execute_query(&self, _sql: &str) -> Result<Buffer> {
        Err(EtlError::config("file connector does not execute queries"))
    }
}
