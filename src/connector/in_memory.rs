use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::{qualified_name, Connector, ConnectorProvider, IfExists, ReadSpec, WriteSpec};
use crate::buffer::Buffer;
use crate::error::{EtlError, Result};

/// A write the in-memory connector received
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub target: String,
    pub rows: usize,
    pub if_exists: IfExists,
}

/// In-memory connector for development and tests.
///
/// Tables are keyed by `schema.table` (or the bare name); queries only resolve when
/// registered verbatim with [`InMemoryConnector::with_query`].
pub struct InMemoryConnector {
    name: String,
    tables: Mutex<HashMap<String, Buffer>>,
    queries: Mutex<HashMap<String, Buffer>>,
    writes: Mutex<Vec<WriteRecord>>,
    reads: AtomicUsize,
}

impl InMemoryConnector {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: Mutex::new(HashMap::new()),
            queries: Mutex::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
        }
    }

    fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> Result<MutexGuard<'a, T>> {
        mutex.lock().map_err(|_| {
            EtlError::connection(format!("connector '{}' state is poisoned", self.name))
        })
    }

    pub fn with_table(self, name: impl Into<String>, buffer: Buffer) -> Self {
        if let Ok(mut tables) = self.tables.lock() {
            tables.insert(name.into(), buffer);
        }
        self
    }

    pub fn with_query(self, sql: impl Into<String>, buffer: Buffer) -> Self {
        if let Ok(mut queries) = self.queries.lock() {
            queries.insert(sql.into(), buffer);
        }
        self
    }

    pub fn table(&self, name: &str) -> Option<Buffer> {
        self.tables.lock().ok()?.get(name).cloned()
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn lookup_query(&self, sql: &str) -> Result<Buffer> {
        self.lock(&self.queries)?
            .get(sql.trim())
            .cloned()
            .ok_or_else(|| {
                EtlError::connection(format!("query not registered on '{}': {sql}", self.name))
            })
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self, spec: &ReadSpec, limit: Option<usize>) -> Result<Buffer> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let buffer = match spec {
            ReadSpec::Table { table_name, schema } => {
                let key = qualified_name(schema.as_deref(), table_name);
                self.lock(&self.tables)?
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| {
                        EtlError::connection(format!(
                            "table '{key}' not found on '{}'",
                            self.name
                        ))
                    })?
            }
            ReadSpec::Query(sql) => self.lookup_query(sql)?,
            ReadSpec::File(file) => {
                let key = file.path.display().to_string();
                self.lock(&self.tables)?
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| EtlError::connection(format!("file not found: {key}")))?
            }
        };
        Ok(match limit {
            Some(n) => buffer.head(n),
            None => buffer,
        })
    }

    async fn write(&self, buffer: &Buffer, spec: &WriteSpec) -> Result<()> {
        let (target, if_exists) = match spec {
            WriteSpec::Table {
                table_name,
                schema,
                if_exists,
            } => (qualified_name(schema.as_deref(), table_name), *if_exists),
            WriteSpec::File { file, if_exists } => (file.path.display().to_string(), *if_exists),
        };
        debug!(connector = %self.name, %target, rows = buffer.row_count(), "in-memory write");
        {
            let mut tables = self.lock(&self.tables)?;
            let stored = match (if_exists, tables.get(&target)) {
                (IfExists::Append, Some(existing)) => existing.concat(buffer)?,
                _ => buffer.clone(),
            };
            tables.insert(target.clone(), stored);
        }
        self.lock(&self.writes)?.push(WriteRecord {
            target,
            rows: buffer.row_count(),
            if_exists,
        });
        Ok(())
    }

    async fn execute_query(&self, sql: &str) -> Result<Buffer> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.lookup_query(sql)
    }
}

/// Provider over in-memory connectors
pub struct InMemoryConnectors {
    sources: HashMap<String, Arc<InMemoryConnector>>,
    warehouse: Arc<InMemoryConnector>,
    files: Arc<InMemoryConnector>,
}

impl Default for InMemoryConnectors {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryConnectors {
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
            warehouse: Arc::new(InMemoryConnector::new("warehouse")),
            files: Arc::new(InMemoryConnector::new("files")),
        }
    }

    pub fn with_source(
        mut self,
        source_id: impl Into<String>,
        connector: InMemoryConnector,
    ) -> Self {
        self.sources.insert(source_id.into(), Arc::new(connector));
        self
    }

    pub fn with_warehouse(mut self, connector: InMemoryConnector) -> Self {
        self.warehouse = Arc::new(connector);
        self
    }

    pub fn with_files(mut self, connector: InMemoryConnector) -> Self {
        self.files = Arc::new(connector);
        self
    }

    pub fn source_connector(&self, source_id: &str) -> Option<Arc<InMemoryConnector>> {
        self.sources.get(source_id).cloned()
    }

    pub fn warehouse_connector(&self) -> Arc<InMemoryConnector> {
        self.warehouse.clone()
    }

    pub fn file_connector(&self) -> Arc<InMemoryConnector> {
        self.files.clone()
    }

    /// Every write any connector received
    pub fn all_writes(&self) -> Vec<WriteRecord> {
        let mut writes = self.warehouse.writes();
        writes.extend(self.files.writes());
        for source in self.sources.values() {
            writes.extend(source.writes());
        }
        writes
    }
}

impl ConnectorProvider for InMemoryConnectors {
    fn source(&self, source_id: &str) -> Result<Arc<dyn Connector>> {
        self.sources
            .get(source_id)
            .map(|c| c.clone() as Arc<dyn Connector>)
            .ok_or_else(|| EtlError::connection(format!("unknown data source '{source_id}'")))
    }

    fn warehouse(&self) -> Result<Arc<dyn Connector>> {
        Ok(self.warehouse.clone())
    }

    fn files(&self) -> Arc<dyn Connector> {
        self.files.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Value;

    fn rows(n: i64) -> Buffer {
        Buffer::from_rows(vec!["n".into()], (0..n).map(|i| vec![Value::Int(i)]).collect()).unwrap()
    }

    #[tokio::test]
    async fn test_read_respects_limit() {
        let connector = InMemoryConnector::new("src").with_table("t", rows(5));
        let buffer = connector.read(&ReadSpec::table("t"), Some(2)).await.unwrap();
        assert_eq!(buffer.row_count(), 2);
        assert_eq!(connector.read_count(), 1);
    }

    #[tokio::test]
    async fn test_append_and_replace_writes() {
        let connector = InMemoryConnector::new("wh");
        let spec = |if_exists| WriteSpec::Table {
            table_name: "t".into(),
            schema: None,
            if_exists,
        };
        connector.write(&rows(2), &spec(IfExists::Append)).await.unwrap();
        connector.write(&rows(2), &spec(IfExists::Append)).await.unwrap();
        assert_eq!(connector.table("t").unwrap().row_count(), 4);

        connector.write(&rows(3), &spec(IfExists::Replace)).await.unwrap();
        assert_eq!(connector.table("t").unwrap().row_count(), 3);
        assert_eq!(connector.writes().len(), 3);
    }
}
