use crate::metrics::phase_metric;

/// Metrics emitted by the pipeline executor
pub struct ExecutorMetrics;

impl ExecutorMetrics {
    /// Attach help text to every executor metric
    pub fn describe() {
        ::metrics::describe_counter!(
            phase_metric!(counter, "pipeline", "runs"),
            "Pipeline runs by final status"
        );
        ::metrics::describe_histogram!(
            phase_metric!(histogram, "pipeline", "duration_seconds"),
            "Wall-clock duration of a pipeline run"
        );
        ::metrics::describe_counter!(
            phase_metric!(counter, "pipeline", "rows_input"),
            "Rows loaded from pipeline sources"
        );
        ::metrics::describe_counter!(
            phase_metric!(counter, "pipeline", "rows_output"),
            "Rows produced by the last step of a run"
        );
        ::metrics::describe_histogram!(
            phase_metric!(histogram, "step", "duration_seconds"),
            "Duration of one transformation step"
        );
        ::metrics::describe_counter!(
            phase_metric!(counter, "step", "failures"),
            "Steps that raised and aborted their run"
        );
        ::metrics::describe_counter!(
            phase_metric!(counter, "hook", "failures"),
            "Post-processing hooks that failed"
        );
    }

    pub fn record_run(status: &str, rows_input: usize, rows_output: usize, duration_secs: f64) {
        ::metrics::counter!(
            phase_metric!(counter, "pipeline", "runs"),
            "status" => status.to_string()
        )
        .increment(1);
        ::metrics::histogram!(phase_metric!(histogram, "pipeline", "duration_seconds"))
            .record(duration_secs);
        ::metrics::counter!(phase_metric!(counter, "pipeline", "rows_input"))
            .increment(rows_input as u64);
        ::metrics::counter!(phase_metric!(counter, "pipeline", "rows_output"))
            .increment(rows_output as u64);
    }

    pub fn record_step(step_type: &str, duration_secs: f64) {
        ::metrics::histogram!(
            phase_metric!(histogram, "step", "duration_seconds"),
            "step_type" => step_type.to_string()
        )
        .record(duration_secs);
    }

    pub fn record_step_failure(step_type: &str) {
        ::metrics::counter!(
            phase_metric!(counter, "step", "failures"),
            "step_type" => step_type.to_string()
        )
        .increment(1);
    }

    pub fn record_hook_failure(hook: &str) {
        ::metrics::counter!(phase_metric!(counter, "hook", "failures"), "hook" => hook.to_string())
            .increment(1);
    }
}
