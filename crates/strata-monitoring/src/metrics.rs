//! Engine metric definitions.
//!
//! Counters carry the `_total` suffix, durations are recorded in milliseconds.

use metrics::{counter, describe_counter, describe_histogram, histogram};

pub const STEPS_TOTAL: &str = "strata_steps_total";
pub const STEP_DURATION_MS: &str = "strata_step_duration_ms";
pub const JOBS_TOTAL: &str = "strata_jobs_total";
pub const NESTED_JOB_POLLS_TOTAL: &str = "strata_nested_job_polls_total";

/// Metric recording for the job runner and nested job waiter
pub struct EngineMetrics;

impl EngineMetrics {
    /// Register metric descriptions with the installed recorder
    pub fn register() {
        describe_counter!(STEPS_TOTAL, "Steps executed (by step kind, outcome)");
        describe_histogram!(STEP_DURATION_MS, "Step execution time (by step kind)");
        describe_counter!(JOBS_TOTAL, "Jobs finished (by workflow kind, outcome)");
        describe_counter!(NESTED_JOB_POLLS_TOTAL, "Backend job status polls");
    }

    /// Record a finished step
    pub fn record_step(step_kind: &str, duration_ms: f64, success: bool) {
        let outcome = outcome_label(success);
        counter!(STEPS_TOTAL, 1, "step" => step_kind.to_string(), "outcome" => outcome);
        histogram!(STEP_DURATION_MS, duration_ms, "step" => step_kind.to_string());
    }

    /// Record a finished job
    pub fn record_job(workflow_kind: &str, success: bool) {
        let outcome = outcome_label(success);
        counter!(JOBS_TOTAL, 1, "workflow" => workflow_kind.to_string(), "outcome" => outcome);
    }

    /// Record one poll of a backend job
    pub fn record_nested_poll() {
        counter!(NESTED_JOB_POLLS_TOTAL, 1);
    }
}

fn outcome_label(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}
