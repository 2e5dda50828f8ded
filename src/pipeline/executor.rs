use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use super::definition::{ConnectorRef, PipelineDefinition, SourcePlan, StepDefinition, TargetPlan};
use super::hooks::{attempt, CatalogRequest, PostProcessors};
use super::registry::StepRegistry;
use super::result::{ExecutionResult, ExecutionStatus, HookOutcome, StepMetric};
use super::steps::StepContext;
use crate::buffer::Buffer;
use crate::config::{EngineConfig, EngineSettings};
use crate::connector::{qualified_name, ConfiguredConnectors, Connector, ConnectorProvider};
use crate::error::{EtlError, Result};
use crate::metrics::ExecutorMetrics;

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Loading,
    Transforming(usize),
    Writing,
    PostProcessing,
    Completed,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Loading => f.write_str("Loading"),
            Phase::Transforming(i) => write!(f, "Transforming({i})"),
            Phase::Writing => f.write_str("Writing"),
            Phase::PostProcessing => f.write_str("PostProcessing"),
            Phase::Completed => f.write_str("Completed"),
            Phase::Failed => f.write_str("Failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Read at most `preview_rows`, skip writing and hooks, return head rows
    pub preview_mode: bool,
    /// Overrides the engine's configured preview size
    pub preview_rows: Option<usize>,
}

impl RunOptions {
    pub fn preview() -> Self {
        Self {
            preview_mode: true,
            preview_rows: None,
        }
    }
}

/// Runs pipeline definitions against a set of connectors.
///
/// Holds no per-run state, so one executor can serve concurrent runs.
#[derive(Clone)]
pub struct PipelineExecutor {
    connectors: Arc<dyn ConnectorProvider>,
    registry: Arc<StepRegistry>,
    hooks: PostProcessors,
    settings: EngineSettings,
}

impl PipelineExecutor {
    pub fn new(connectors: Arc<dyn ConnectorProvider>, registry: StepRegistry) -> Self {
        Self {
            connectors,
            registry: Arc::new(registry),
            hooks: PostProcessors::default(),
            settings: EngineSettings::default(),
        }
    }

    /// SQLite sources, the configured warehouse, and the step set the settings allow
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            Arc::new(ConfiguredConnectors::from_config(config)),
            StepRegistry::for_settings(&config.engine),
        )
        .with_settings(config.engine.clone())
    }

    pub fn with_hooks(mut self, hooks: PostProcessors) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    fn connector(&self, reference: &ConnectorRef) -> Result<Arc<dyn Connector>> {
        match reference {
            ConnectorRef::Source(id) => self.connectors.source(id),
            ConnectorRef::Warehouse => self.connectors.warehouse(),
            ConnectorRef::Files => Ok(self.connectors.files()),
        }
    }

    /// Resolve source, target and every enabled step without touching data
    pub fn validate<'d>(
        &self,
        definition: &'d PipelineDefinition,
    ) -> Result<Vec<&'d StepDefinition>> {
        let source = definition.source()?;
        self.connector(&source.connector)?;
        let target = definition.target()?;
        self.connector(&target.connector)?;
        let plan = definition.execution_plan();
        for step in &plan {
            self.registry
                .build(&step.step_type, &step.config)
                .map_err(|e| e.in_step(&step.id, step.display_name()))?;
        }
        Ok(plan)
    }

    /// Run a pipeline end to end. Failures are reported in the result, never returned.
    pub async fn execute_pipeline(
        &self,
        definition: &PipelineDefinition,
        options: RunOptions,
    ) -> ExecutionResult {
        let clock = Instant::now();
        let mut result = ExecutionResult::new(Uuid::new_v4(), definition.name.clone(), Utc::now());

        if let Err(e) = self.run(definition, options, &mut result).await {
            error!(
                run_id = %result.run_id,
                phase = %Phase::Failed,
                failed_step = ?result.failed_step,
                error = %e,
                "❌ pipeline '{}' failed",
                definition.name
            );
            result.status = ExecutionStatus::Failed;
            result.error_kind = Some(e.kind());
            result.error_message = Some(e.to_string());
        } else {
            info!(
                run_id = %result.run_id,
                phase = %Phase::Completed,
                rows_input = result.rows_input,
                rows_output = result.rows_output,
                "✅ pipeline '{}' completed",
                definition.name
            );
        }

        let elapsed = clock.elapsed();
        result.duration_ms = elapsed.as_secs_f64() * 1000.0;
        let status = match result.status {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
        };
        ExecutorMetrics::record_run(
            status,
            result.rows_input,
            result.rows_output,
            elapsed.as_secs_f64(),
        );
        result
    }

    #[instrument(skip_all, fields(pipeline = %definition.name, run_id = %result.run_id))]
    async fn run(
        &self,
        definition: &PipelineDefinition,
        options: RunOptions,
        result: &mut ExecutionResult,
    ) -> Result<()> {
        let preview_rows = options.preview_rows.unwrap_or(self.settings.preview_rows);

        info!(phase = %Phase::Loading, "📥 loading source");
        let source = definition.source()?;
        let limit = options.preview_mode.then_some(preview_rows);
        let buffer = self
            .connector(&source.connector)?
            .read(&source.read, limit)
            .await
            .map_err(EtlError::at_connector)?;
        result.rows_input = buffer.row_count();
        info!(rows = buffer.row_count(), columns = buffer.column_count(), "loaded {}", source.read);

        let buffer = self.transform(definition, buffer, result).await?;
        result.rows_output = buffer.row_count();

        if options.preview_mode {
            let head = buffer.head(preview_rows);
            result.preview_columns =
                Some(head.column_names().into_iter().map(String::from).collect());
            result.preview_data = Some(head.to_json_rows());
            info!(
                rows = head.row_count(),
                "👀 preview ready, skipping write and post-processing"
            );
            return Ok(());
        }

        info!(phase = %Phase::Writing, "💾 writing target");
        let target = definition.target()?;
        self.connector(&target.connector)?
            .write(&buffer, &target.write)
            .await
            .map_err(EtlError::at_connector)?;
        info!(rows = buffer.row_count(), "wrote {}", target.write);

        info!(phase = %Phase::PostProcessing, "🔗 running post-processing hooks");
        self.post_process(definition, &source, &target, &buffer, result).await;
        Ok(())
    }

    async fn transform(
        &self,
        definition: &PipelineDefinition,
        input: Buffer,
        result: &mut ExecutionResult,
    ) -> Result<Buffer> {
        let ctx = StepContext {
            connectors: self.connectors.as_ref(),
            join_row_limit: self.settings.join_row_limit,
        };
        let mut buffer = input;
        for (position, step_def) in definition.execution_plan().into_iter().enumerate() {
            info!(
                phase = %Phase::Transforming(position),
                step_id = %step_def.id,
                step_type = %step_def.step_type,
                "🔧 {}",
                step_def.display_name()
            );
            let clock = Instant::now();
            let outcome = match self.registry.build(&step_def.step_type, &step_def.config) {
                Ok(step) => step.process(buffer, &ctx).await,
                Err(e) => Err(e),
            };
            buffer = match outcome {
                Ok(out) => out,
                Err(e) => {
                    ExecutorMetrics::record_step_failure(&step_def.step_type);
                    result.failed_step = Some(step_def.id.clone());
                    return Err(e.in_step(&step_def.id, step_def.display_name()));
                }
            };
            let elapsed = clock.elapsed();
            ExecutorMetrics::record_step(&step_def.step_type, elapsed.as_secs_f64());
            debug!(
                step_id = %step_def.id,
                rows_out = buffer.row_count(),
                duration_ms = elapsed.as_secs_f64() * 1000.0,
                "step finished"
            );
            result.step_metrics.insert(
                step_def.id.clone(),
                StepMetric {
                    name: step_def.display_name().to_string(),
                    step_type: step_def.step_type.clone(),
                    rows_out: buffer.row_count(),
                    duration_ms: elapsed.as_secs_f64() * 1000.0,
                    position,
                },
            );
        }
        Ok(buffer)
    }

    /// Lineage for table to table runs, cataloging for table targets, BI sync when
    /// the target opts in. Outcomes land on the result; none of them fail the run.
    async fn post_process(
        &self,
        definition: &PipelineDefinition,
        source: &SourcePlan,
        target: &TargetPlan,
        buffer: &Buffer,
        result: &mut ExecutionResult,
    ) {
        let Some((table, schema)) = target.table() else {
            debug!("file target, no post-processing");
            return;
        };
        let target_name = qualified_name(schema, table);
        let source_name = source.table_name();

        if let (Some(lineage), Some(source_name)) = (&self.hooks.lineage, &source_name) {
            let update = lineage.update(source_name, &target_name);
            result.lineage = Some(attempt("lineage", update).await);
        }

        if let Some(cataloger) = &self.hooks.cataloger {
            let request = CatalogRequest {
                pipeline_name: &definition.name,
                target_table: table,
                target_schema: schema,
                buffer,
                source_table: source_name.as_deref(),
            };
            result.asset_catalog = Some(attempt("asset_catalog", cataloger.catalog(request)).await);
        }

        if target.sync_to_bi {
            result.bi_sync = Some(match &self.hooks.bi_syncer {
                Some(syncer) => attempt("bi_sync", syncer.sync(table, schema)).await,
                None => HookOutcome::Failed {
                    error: "no BI syncer configured".to_string(),
                },
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Value;
    use crate::connector::{InMemoryConnector, InMemoryConnectors};
    use crate::pipeline::definition::StepDefinition;
    use serde_json::json;

    fn orders() -> Buffer {
        Buffer::from_rows(
            vec!["id".into(), "status".into()],
            vec![
                vec![Value::Int(1), "open".into()],
                vec![Value::Int(2), "closed".into()],
                vec![Value::Int(3), "open".into()],
            ],
        )
        .unwrap()
    }

    fn executor() -> (PipelineExecutor, Arc<InMemoryConnectors>) {
        let connectors = Arc::new(
            InMemoryConnectors::new().with_source(
                "crm",
                InMemoryConnector::new("crm").with_table("orders", orders()),
            ),
        );
        let executor = PipelineExecutor::new(connectors.clone(), StepRegistry::builtin());
        (executor, connectors)
    }

    fn pipeline(steps: Vec<StepDefinition>) -> PipelineDefinition {
        PipelineDefinition {
            name: "open_orders".into(),
            source_type: "table".into(),
            source_config: json!({"source_id": "crm", "table_name": "orders"}),
            target_type: "table".into(),
            target_config: json!({"table_name": "open_orders", "if_exists": "replace"}),
            steps,
        }
    }

    #[tokio::test]
    async fn test_run_writes_filtered_rows() {
        let (executor, connectors) = executor();
        let def = pipeline(vec![StepDefinition::new(
            "1",
            "filter",
            json!({"conditions": [{"column": "status", "operator": "eq", "value": "open"}]}),
        )]);
        let result = executor.execute_pipeline(&def, RunOptions::default()).await;
        assert!(result.is_success(), "{:?}", result.error_message);
        assert_eq!(result.rows_input, 3);
        assert_eq!(result.rows_output, 2);
        assert_eq!(result.step_metrics["1"].rows_out, 2);
        let written = connectors.warehouse_connector().table("open_orders").unwrap();
        assert_eq!(written.row_count(), 2);
    }

    #[tokio::test]
    async fn test_step_failure_records_failed_step() {
        let (executor, _) = executor();
        let def = pipeline(vec![
            StepDefinition::new("a", "rename", json!({"mapping": {"status": "state"}})),
            StepDefinition::new("b", "sort", json!({"columns": ["status"]})).with_order(1),
        ]);
        let result = executor.execute_pipeline(&def, RunOptions::default()).await;
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.failed_step.as_deref(), Some("b"));
        assert_eq!(result.executed_steps(), vec!["a"]);
        assert_eq!(result.error_kind, Some(crate::error::ErrorKind::StepExecution));
    }

    #[tokio::test]
    async fn test_unknown_source_id_is_connection_failure() {
        let (executor, _) = executor();
        let mut def = pipeline(vec![]);
        def.source_config = json!({"source_id": "nowhere", "table_name": "orders"});
        let result = executor.execute_pipeline(&def, RunOptions::default()).await;
        assert_eq!(result.error_kind, Some(crate::error::ErrorKind::Connection));
    }

    #[tokio::test]
    async fn test_unset_bi_syncer_is_reported() {
        let (executor, _) = executor();
        let mut def = pipeline(vec![]);
        def.target_config = json!({"table_name": "orders_copy", "sync_to_bi": true});
        let result = executor.execute_pipeline(&def, RunOptions::default()).await;
        assert!(result.is_success());
        assert!(result.bi_sync.unwrap().is_failed());
        assert!(result.lineage.is_none());
    }

    #[test]
    fn test_validate_reports_unknown_step() {
        let (executor, _) = executor();
        let def = pipeline(vec![StepDefinition::new("x", "explode", json!({}))]);
        let err = executor.validate(&def).unwrap_err();
        assert!(err.to_string().contains("Unknown step type"));
    }
}
