use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

use catalog_etl::buffer::{Buffer, Value};
use catalog_etl::catalog::InMemoryCatalog;
use catalog_etl::config::{EngineConfig, SourceConfig};
use catalog_etl::connector::{
    Connector, IfExists, InMemoryConnector, InMemoryConnectors, SqliteConnector, WriteSpec,
};
use catalog_etl::error::{EtlError, ErrorKind};
use catalog_etl::pipeline::{
    BiSyncResult, BiSyncer, ExecutionStatus, HookOutcome, PipelineDefinition, PipelineExecutor,
    PostProcessors, RunOptions, StepDefinition, StepRegistry,
};

fn rows(names: &[&str], rows: Vec<Vec<Value>>) -> Buffer {
    Buffer::from_rows(names.iter().map(|n| n.to_string()).collect(), rows).unwrap()
}

fn customers() -> Buffer {
    rows(
        &["id", "name", "region"],
        vec![
            vec![Value::Int(1), "ann".into(), "west".into()],
            vec![Value::Int(2), "bob".into(), "east".into()],
            vec![Value::Int(3), "cy".into(), "west".into()],
            vec![Value::Int(4), "dee".into(), Value::Null],
        ],
    )
}

fn pipeline(steps: Vec<StepDefinition>) -> PipelineDefinition {
    PipelineDefinition {
        name: "customers".into(),
        source_type: "table".into(),
        source_config: json!({"source_id": "crm", "table_name": "customers"}),
        target_type: "table".into(),
        target_config: json!({"table_name": "customers_out", "if_exists": "replace"}),
        steps,
    }
}

fn in_memory(input: Buffer) -> Arc<InMemoryConnectors> {
    Arc::new(
        InMemoryConnectors::new()
            .with_source("crm", InMemoryConnector::new("crm").with_table("customers", input)),
    )
}

async fn run_in_memory(
    input: Buffer,
    steps: Vec<StepDefinition>,
) -> (Arc<InMemoryConnectors>, catalog_etl::ExecutionResult) {
    let connectors = in_memory(input);
    let executor = PipelineExecutor::new(connectors.clone(), StepRegistry::builtin());
    let result = executor
        .execute_pipeline(&pipeline(steps), RunOptions::default())
        .await;
    (connectors, result)
}

fn written(connectors: &InMemoryConnectors) -> Buffer {
    connectors.warehouse_connector().table("customers_out").unwrap()
}

#[tokio::test]
async fn test_empty_step_list_is_identity() {
    let (connectors, result) = run_in_memory(customers(), vec![]).await;
    assert_eq!(result.status, ExecutionStatus::Success);
    assert!(result.step_metrics.is_empty());
    assert_eq!(written(&connectors), customers());
}

#[tokio::test]
async fn test_steps_run_in_stable_order_of_enabled_steps() {
    let steps = vec![
        StepDefinition::new("late", "select_columns", json!({"columns": ["id", "label"]}))
            .with_order(10),
        StepDefinition::new("skip", "drop_columns", json!({"columns": ["id"]}))
            .with_order(0)
            .disabled(),
        StepDefinition::new("first", "calculate", json!({"calculations": [
            {"target_column": "label", "type": "formula", "formula": "upper(name)"}
        ]}))
        .with_order(1),
        StepDefinition::new("second", "filter", json!({"conditions": [
            {"column": "label", "operator": "ne", "value": "BOB"}
        ]}))
        .with_order(1),
    ];
    let (connectors, result) = run_in_memory(customers(), steps).await;
    assert!(result.is_success(), "{:?}", result.error_message);
    assert_eq!(result.executed_steps(), vec!["first", "second", "late"]);
    assert!(!result.step_metrics.contains_key("skip"));

    let out = written(&connectors);
    assert_eq!(out.column_names(), vec!["id", "label"]);
    assert_eq!(out.row_count(), 3);
}

#[tokio::test]
async fn test_filter_eq_keeps_only_matching_rows() {
    let steps = vec![StepDefinition::new(
        "f",
        "filter",
        json!({"conditions": [{"column": "region", "operator": "eq", "value": "west"}]}),
    )];
    let (connectors, result) = run_in_memory(customers(), steps).await;
    assert!(result.rows_output <= result.rows_input);
    let out = written(&connectors);
    assert!(out
        .column("region")
        .unwrap()
        .values()
        .all(|v| v == Value::from("west")));
    assert_eq!(out.row_count(), 2);
}

#[tokio::test]
async fn test_deduplicate_keeps_first_occurrence() {
    let input = rows(
        &["k", "v"],
        vec![
            vec![Value::Int(1), "x".into()],
            vec![Value::Int(1), "x".into()],
            vec![Value::Int(2), "y".into()],
        ],
    );
    let steps = vec![StepDefinition::new("d", "deduplicate", json!({"keep": "first"}))];
    let (connectors, result) = run_in_memory(input, steps).await;
    assert_eq!(result.rows_output, 2);
    assert_eq!(written(&connectors).row(0), vec![Value::Int(1), Value::from("x")]);
}

#[tokio::test]
async fn test_formula_adds_columns() {
    let input = rows(
        &["a", "b"],
        vec![
            vec![Value::Int(1), Value::Int(3)],
            vec![Value::Int(2), Value::Int(4)],
        ],
    );
    let steps = vec![StepDefinition::new(
        "c",
        "calculate",
        json!({"calculations": [{"type": "formula", "formula": "c = a + b"}]}),
    )];
    let (connectors, _) = run_in_memory(input, steps).await;
    let c: Vec<Value> = written(&connectors).column("c").unwrap().values().collect();
    assert_eq!(c, vec![Value::Int(4), Value::Int(6)]);
}

#[tokio::test]
async fn test_deeply_nested_formula_fails_the_step() {
    let formula = format!("x = {}1{}", "(".repeat(2000), ")".repeat(2000));
    let steps = vec![StepDefinition::new(
        "deep",
        "calculate",
        json!({"calculations": [{"type": "formula", "formula": formula}]}),
    )];
    let (connectors, result) = run_in_memory(customers(), steps).await;
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.error_kind, Some(ErrorKind::StepExecution));
    assert_eq!(result.failed_step.as_deref(), Some("deep"));
    assert!(result.error_message.unwrap().contains("nests too deeply"));
    assert!(connectors.all_writes().is_empty());
}

#[tokio::test]
async fn test_coercing_cast_never_raises() {
    let input = rows(&["n"], vec![vec!["3".into()], vec!["x".into()], vec!["5".into()]]);
    let steps = vec![StepDefinition::new(
        "t",
        "type_cast",
        json!({"casts": [{"column": "n", "target_type": "int", "errors": "coerce"}]}),
    )];
    let (connectors, result) = run_in_memory(input, steps).await;
    assert!(result.is_success());
    let n: Vec<Value> = written(&connectors).column("n").unwrap().values().collect();
    assert_eq!(n, vec![Value::Int(3), Value::Null, Value::Int(5)]);
}

#[tokio::test]
async fn test_left_join_keeps_every_left_row() {
    let orders = rows(
        &["customer_id", "total"],
        vec![
            vec![Value::Int(1), Value::Int(10)],
            vec![Value::Int(1), Value::Int(15)],
            vec![Value::Int(3), Value::Int(7)],
        ],
    );
    let connectors = Arc::new(
        InMemoryConnectors::new()
            .with_source("crm", InMemoryConnector::new("crm").with_table("customers", customers()))
            .with_source("billing", InMemoryConnector::new("billing").with_table("orders", orders)),
    );
    let executor = PipelineExecutor::new(connectors.clone(), StepRegistry::builtin());
    let def = pipeline(vec![StepDefinition::new(
        "j",
        "join",
        json!({
            "source_id": "billing",
            "join_table": "orders",
            "join_type": "left",
            "left_on": "id",
            "right_on": "customer_id"
        }),
    )]);
    let result = executor.execute_pipeline(&def, RunOptions::default()).await;
    assert!(result.is_success(), "{:?}", result.error_message);
    // ann matches twice, bob and dee match nothing
    assert_eq!(result.rows_output, 5);
    assert!(result.rows_output >= result.rows_input);
}

#[tokio::test]
async fn test_unknown_step_type_fails_with_partial_metrics() {
    let steps = vec![
        StepDefinition::new("ok", "rename", json!({"mapping": {"name": "full_name"}})),
        StepDefinition::new("bad", "levitate", json!({})).with_order(1),
        StepDefinition::new("never", "sort", json!({"columns": "id"})).with_order(2),
    ];
    let (connectors, result) = run_in_memory(customers(), steps).await;
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.error_kind, Some(ErrorKind::Configuration));
    assert_eq!(result.executed_steps(), vec!["ok"]);
    assert_eq!(result.failed_step.as_deref(), Some("bad"));
    assert!(result.error_message.unwrap().contains("levitate"));
    assert!(connectors.all_writes().is_empty());
}

struct CountingSyncer(AtomicUsize);

#[async_trait]
impl BiSyncer for CountingSyncer {
    async fn sync(
        &self,
        table_name: &str,
        _schema: Option<&str>,
    ) -> catalog_etl::Result<BiSyncResult> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(BiSyncResult {
            dataset_id: format!("ds-{table_name}"),
            url: format!("https://bi.example/{table_name}"),
        })
    }
}

#[tokio::test]
async fn test_preview_never_writes_or_runs_hooks() {
    let connectors = in_memory(customers());
    let catalog = Arc::new(InMemoryCatalog::new());
    let syncer = Arc::new(CountingSyncer(AtomicUsize::new(0)));
    let executor = PipelineExecutor::new(connectors.clone(), StepRegistry::builtin()).with_hooks(
        PostProcessors::new()
            .with_lineage(catalog.clone())
            .with_cataloger(catalog.clone())
            .with_bi_syncer(syncer.clone()),
    );
    let mut def = pipeline(vec![]);
    def.target_config = json!({"table_name": "customers_out", "sync_to_bi": true});

    let options = RunOptions {
        preview_mode: true,
        preview_rows: Some(2),
    };
    let result = executor.execute_pipeline(&def, options).await;
    assert!(result.is_success());
    assert_eq!(result.rows_input, 2);
    assert_eq!(result.preview_data.as_ref().map(Vec::len), Some(2));
    assert_eq!(
        result.preview_columns,
        Some(vec!["id".to_string(), "name".to_string(), "region".to_string()])
    );
    assert!(connectors.all_writes().is_empty());
    assert_eq!(syncer.0.load(Ordering::SeqCst), 0);
    assert!(catalog.asset("customers_out").is_none());
    assert!(result.lineage.is_none() && result.asset_catalog.is_none() && result.bi_sync.is_none());
}

struct BrokenSyncer;

#[async_trait]
impl BiSyncer for BrokenSyncer {
    async fn sync(
        &self,
        _table_name: &str,
        _schema: Option<&str>,
    ) -> catalog_etl::Result<BiSyncResult> {
        Err(EtlError::connection("BI service unavailable"))
    }
}

#[tokio::test]
async fn test_hook_failures_do_not_fail_the_run() -> Result<()> {
    let connectors = in_memory(customers());
    let catalog = Arc::new(InMemoryCatalog::new());
    catalog.register_asset("customers")?;
    let executor = PipelineExecutor::new(connectors.clone(), StepRegistry::builtin()).with_hooks(
        PostProcessors::new()
            .with_lineage(catalog.clone())
            .with_cataloger(catalog.clone())
            .with_bi_syncer(Arc::new(BrokenSyncer)),
    );
    let mut def = pipeline(vec![]);
    def.target_config = json!({"table_name": "customers_out", "sync_to_bi": true});

    let result = executor.execute_pipeline(&def, RunOptions::default()).await;
    assert_eq!(result.status, ExecutionStatus::Success);
    match result.bi_sync {
        Some(HookOutcome::Failed { error }) => assert!(error.contains("BI service unavailable")),
        other => panic!("expected a failed BI sync, got {other:?}"),
    }
    // target was not yet an asset when lineage ran
    assert!(!result.lineage.unwrap().value().unwrap().linked);
    assert!(result.asset_catalog.unwrap().value().is_some());
    assert_eq!(connectors.all_writes().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_replace_reruns_are_idempotent() -> Result<()> {
    let dir = tempdir()?;
    let source_db = dir.path().join("crm.db");
    SqliteConnector::new("seed", &source_db)
        .write(
            &customers(),
            &WriteSpec::Table {
                table_name: "customers".into(),
                schema: None,
                if_exists: IfExists::Replace,
            },
        )
        .await?;

    let mut config = EngineConfig::default();
    config.warehouse.path = dir.path().join("warehouse.db");
    config
        .sources
        .insert("crm".into(), SourceConfig { path: source_db });
    let executor = PipelineExecutor::from_config(&config);

    let out_csv = dir.path().join("out").join("customers.csv");
    let mut def = pipeline(vec![StepDefinition::new(
        "s",
        "sort",
        json!({"columns": "id", "ascending": false}),
    )]);
    def.target_type = "file".into();
    def.target_config = json!({"file_path": out_csv, "if_exists": "replace"});

    let first = executor.execute_pipeline(&def, RunOptions::default()).await;
    assert!(first.is_success(), "{:?}", first.error_message);
    let first_bytes = std::fs::read(&out_csv)?;
    let second = executor.execute_pipeline(&def, RunOptions::default()).await;
    assert!(second.is_success(), "{:?}", second.error_message);
    assert_eq!(first_bytes, std::fs::read(&out_csv)?);

    let mut table_def = pipeline(vec![]);
    table_def.target_config = json!({"table_name": "customers_out", "if_exists": "replace"});
    for _ in 0..2 {
        let result = executor.execute_pipeline(&table_def, RunOptions::default()).await;
        assert!(result.is_success(), "{:?}", result.error_message);
    }
    let warehouse = SqliteConnector::new("check", dir.path().join("warehouse.db"));
    let stored = warehouse
        .read(&catalog_etl::connector::ReadSpec::table("customers_out"), None)
        .await?;
    assert_eq!(stored.row_count(), 4);
    Ok(())
}

#[tokio::test]
async fn test_unbufferable_source_rows_are_connection_failures() -> Result<()> {
    let dir = tempdir()?;
    let source_db = dir.path().join("crm.db");
    SqliteConnector::new("seed", &source_db)
        .write(
            &customers(),
            &WriteSpec::Table {
                table_name: "customers".into(),
                schema: None,
                if_exists: IfExists::Replace,
            },
        )
        .await?;

    let mut config = EngineConfig::default();
    config.warehouse.path = dir.path().join("warehouse.db");
    config
        .sources
        .insert("crm".into(), SourceConfig { path: source_db });
    let executor = PipelineExecutor::from_config(&config);

    let mut def = pipeline(vec![]);
    def.source_type = "query".into();
    def.source_config = json!({"source_id": "crm", "query": "SELECT id, id FROM customers"});
    let result = executor.execute_pipeline(&def, RunOptions::default()).await;
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.error_kind, Some(ErrorKind::Connection));
    assert!(result.failed_step.is_none());
    assert!(result.error_message.unwrap().contains("duplicate column"));
    Ok(())
}
