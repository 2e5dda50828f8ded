use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::connector::qualified_name;
use crate::error::{EtlError, Result};
use crate::pipeline::hooks::{
    AssetCataloger, CatalogAction, CatalogEntry, CatalogRequest, LineageUpdate, LineageUpdater,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub asset_id: String,
    pub qualified_name: String,
    pub row_count: usize,
    pub columns: Vec<String>,
    /// Pipeline that last wrote the asset, if any
    pub produced_by: Option<String>,
}

#[derive(Default)]
struct CatalogState {
    assets: HashMap<String, Asset>,
    edges: BTreeSet<(String, String)>,
}

/// Process-local asset catalog and lineage graph
#[derive(Default)]
pub struct InMemoryCatalog {
    state: Mutex<CatalogState>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, CatalogState>> {
        self.state
            .lock()
            .map_err(|_| EtlError::connection("catalog state lock poisoned"))
    }

    /// Register an existing table as an asset; returns its id
    pub fn register_asset(&self, qualified_name: &str) -> Result<String> {
        let mut state = self.lock()?;
        let asset = state
            .assets
            .entry(qualified_name.to_string())
            .or_insert_with(|| Asset {
                asset_id: Uuid::new_v4().to_string(),
                qualified_name: qualified_name.to_string(),
                row_count: 0,
                columns: Vec::new(),
                produced_by: None,
            });
        Ok(asset.asset_id.clone())
    }

    pub fn asset(&self, qualified_name: &str) -> Option<Asset> {
        self.lock().ok()?.assets.get(qualified_name).cloned()
    }

    /// Upstream -> downstream pairs in sorted order
    pub fn edges(&self) -> Vec<(String, String)> {
        self.lock()
            .map(|state| state.edges.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LineageUpdater for InMemoryCatalog {
    async fn update(&self, source_table: &str, target_table: &str) -> Result<LineageUpdate> {
        let mut state = self.lock()?;
        let linked =
            state.assets.contains_key(source_table) && state.assets.contains_key(target_table);
        let created = linked
            && state
                .edges
                .insert((source_table.to_string(), target_table.to_string()));
        debug!(source_table, target_table, linked, created, "lineage upsert");
        Ok(LineageUpdate {
            upstream: source_table.to_string(),
            downstream: target_table.to_string(),
            linked,
            created,
        })
    }
}

#[async_trait]
impl AssetCataloger for InMemoryCatalog {
    async fn catalog(&self, request: CatalogRequest<'_>) -> Result<CatalogEntry> {
        let name = qualified_name(request.target_schema, request.target_table);
        let columns: Vec<String> = request
            .buffer
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();
        let row_count = request.buffer.row_count();
        let mut state = self.lock()?;
        let action = if state.assets.contains_key(&name) {
            CatalogAction::Updated
        } else {
            CatalogAction::Created
        };
        let asset = state.assets.entry(name.clone()).or_insert_with(|| Asset {
            asset_id: Uuid::new_v4().to_string(),
            qualified_name: name.clone(),
            row_count: 0,
            columns: Vec::new(),
            produced_by: None,
        });
        asset.row_count = row_count;
        asset.columns = columns.clone();
        asset.produced_by = Some(request.pipeline_name.to_string());
        Ok(CatalogEntry {
            action,
            asset_id: asset.asset_id.clone(),
            qualified_name: name,
            row_count,
            columns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Buffer, Value};

    #[tokio::test]
    async fn test_lineage_needs_both_assets() {
        let catalog = InMemoryCatalog::new();
        catalog.register_asset("raw.orders").unwrap();
        let update = catalog.update("raw.orders", "clean.orders").await.unwrap();
        assert!(!update.linked);
        assert!(catalog.edges().is_empty());

        catalog.register_asset("clean.orders").unwrap();
        assert!(catalog.update("raw.orders", "clean.orders").await.unwrap().created);
        let again = catalog.update("raw.orders", "clean.orders").await.unwrap();
        assert!(again.linked && !again.created);
        assert_eq!(catalog.edges().len(), 1);
    }

    #[tokio::test]
    async fn test_catalog_creates_then_updates() {
        let catalog = InMemoryCatalog::new();
        let buffer = Buffer::from_rows(vec!["id".into()], vec![vec![Value::Int(1)]]).unwrap();
        let request = || CatalogRequest {
            pipeline_name: "nightly",
            target_table: "orders",
            target_schema: Some("clean"),
            buffer: &buffer,
            source_table: None,
        };
        let first = catalog.catalog(request()).await.unwrap();
        assert_eq!(first.action, CatalogAction::Created);
        assert_eq!(first.qualified_name, "clean.orders");
        let second = catalog.catalog(request()).await.unwrap();
        assert_eq!(second.action, CatalogAction::Updated);
        assert_eq!(first.asset_id, second.asset_id);
        assert_eq!(catalog.asset("clean.orders").unwrap().produced_by.as_deref(), Some("nightly"));
    }
}
