//! Post-processing collaborators invoked after a successful write.
//!
//! Each hook is optional and best-effort: [`attempt`] turns its error into a
//! [`HookOutcome::Failed`] so the run's status never depends on it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

use super::result::HookOutcome;
use crate::buffer::Buffer;
use crate::error::{EtlError, Result};
use crate::metrics::ExecutorMetrics;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageUpdate {
    pub upstream: String,
    pub downstream: String,
    /// False when either side is not a registered asset
    pub linked: bool,
    /// False when the edge already existed
    pub created: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogAction {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub action: CatalogAction,
    pub asset_id: String,
    pub qualified_name: String,
    pub row_count: usize,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiSyncResult {
    pub dataset_id: String,
    pub url: String,
}

/// What the cataloger needs to know about a freshly written table
pub struct CatalogRequest<'a> {
    pub pipeline_name: &'a str,
    pub target_table: &'a str,
    pub target_schema: Option<&'a str>,
    pub buffer: &'a Buffer,
    pub source_table: Option<&'a str>,
}

#[async_trait]
pub trait LineageUpdater: Send + Sync {
    /// Upsert an upstream -> downstream edge; idempotent
    async fn update(&self, source_table: &str, target_table: &str) -> Result<LineageUpdate>;
}

#[async_trait]
pub trait AssetCataloger: Send + Sync {
    async fn catalog(&self, request: CatalogRequest<'_>) -> Result<CatalogEntry>;
}

#[async_trait]
pub trait BiSyncer: Send + Sync {
    async fn sync(&self, table_name: &str, schema: Option<&str>) -> Result<BiSyncResult>;
}

#[derive(Clone, Default)]
pub struct PostProcessors {
    pub lineage: Option<Arc<dyn LineageUpdater>>,
    pub cataloger: Option<Arc<dyn AssetCataloger>>,
    pub bi_syncer: Option<Arc<dyn BiSyncer>>,
}

impl PostProcessors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lineage(mut self, lineage: Arc<dyn LineageUpdater>) -> Self {
        self.lineage = Some(lineage);
        self
    }

    pub fn with_cataloger(mut self, cataloger: Arc<dyn AssetCataloger>) -> Self {
        self.cataloger = Some(cataloger);
        self
    }

    pub fn with_bi_syncer(mut self, bi_syncer: Arc<dyn BiSyncer>) -> Self {
        self.bi_syncer = Some(bi_syncer);
        self
    }
}

/// Await a hook, capturing its failure instead of propagating it
pub async fn attempt<T, F>(hook: &str, fut: F) -> HookOutcome<T>
where
    F: Future<Output = Result<T>>,
{
    match fut.await {
        Ok(value) => HookOutcome::Done(value),
        Err(e) => {
            let err = EtlError::PostProcessing {
                hook: hook.to_string(),
                message: e.to_string(),
            };
            warn!(hook, error = %e, "⚠️ post-processing hook failed");
            ExecutorMetrics::record_hook_failure(hook);
            HookOutcome::Failed {
                error: err.to_string(),
            }
        }
    }
}
