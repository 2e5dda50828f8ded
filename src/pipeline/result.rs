use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::hooks::{BiSyncResult, CatalogEntry, LineageUpdate};
use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

/// Timing and size of one completed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepMetric {
    pub name: String,
    #[serde(rename = "type")]
    pub step_type: String,
    pub rows_out: usize,
    pub duration_ms: f64,
    /// Position in the execution plan
    pub position: usize,
}

/// Result of a best-effort post-processing hook: its value, or why it failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HookOutcome<T> {
    Failed { error: String },
    Done(T),
}

impl<T> HookOutcome<T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, HookOutcome::Failed { .. })
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            HookOutcome::Done(value) => Some(value),
            HookOutcome::Failed { .. } => None,
        }
    }
}

/// Everything a caller learns about one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub run_id: Uuid,
    pub pipeline_name: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub rows_input: usize,
    pub rows_output: usize,
    /// Completed steps keyed by step id
    pub step_metrics: BTreeMap<String, StepMetric>,
    pub duration_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_columns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_data: Option<Vec<serde_json::Map<String, serde_json::Value>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineage: Option<HookOutcome<LineageUpdate>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_catalog: Option<HookOutcome<CatalogEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bi_sync: Option<HookOutcome<BiSyncResult>>,
}

impl ExecutionResult {
    pub fn new(run_id: Uuid, pipeline_name: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            pipeline_name: pipeline_name.into(),
            status: ExecutionStatus::Success,
            started_at,
            rows_input: 0,
            rows_output: 0,
            step_metrics: BTreeMap::new(),
            duration_ms: 0.0,
            error_message: None,
            error_kind: None,
            failed_step: None,
            preview_columns: None,
            preview_data: None,
            lineage: None,
            asset_catalog: None,
            bi_sync: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    /// Step ids in the order they ran
    pub fn executed_steps(&self) -> Vec<&str> {
        let mut steps: Vec<(&String, &StepMetric)> = self.step_metrics.iter().collect();
        steps.sort_by_key(|(_, metric)| metric.position);
        steps.into_iter().map(|(id, _)| id.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hook_outcome_serializes_flat() {
        let failed: HookOutcome<BiSyncResult> = HookOutcome::Failed {
            error: "no BI syncer configured".into(),
        };
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({"error": "no BI syncer configured"})
        );

        let done = HookOutcome::Done(BiSyncResult {
            dataset_id: "ds-1".into(),
            url: "http://bi/ds-1".into(),
        });
        assert_eq!(
            serde_json::to_value(&done).unwrap(),
            json!({"dataset_id": "ds-1", "url": "http://bi/ds-1"})
        );
    }

    #[test]
    fn test_failed_result_serializes_kind() {
        let mut result = ExecutionResult::new(Uuid::new_v4(), "p", Utc::now());
        result.status = ExecutionStatus::Failed;
        result.error_kind = Some(ErrorKind::StepExecution);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["error_kind"], "step_execution");
        assert!(value.get("preview_data").is_none());
    }
}
