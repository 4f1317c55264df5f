//! Conversion metrics.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding binary installs a recorder.

use std::time::Duration;

use metrics::{counter, histogram};

use slpvid_models::{ExitCode, PipelineState, Stage};

/// Metric name constants for consistency.
pub mod names {
    /// Finished pipelines by terminal state.
    pub const PIPELINES_TOTAL: &str = "slpvid_pipelines_total";

    /// Wall-clock pipeline duration in seconds by terminal state.
    pub const PIPELINE_DURATION_SECONDS: &str = "slpvid_pipeline_duration_seconds";

    /// Stage exits by stage and exit code.
    pub const STAGE_EXITS_TOTAL: &str = "slpvid_stage_exits_total";

    /// Stages that could not be spawned.
    pub const STAGE_LAUNCH_FAILURES_TOTAL: &str = "slpvid_stage_launch_failures_total";
}

fn code_label(code: ExitCode) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

/// Record a finished pipeline.
pub fn record_pipeline(state: PipelineState, elapsed: Duration) {
    counter!(names::PIPELINES_TOTAL, "state" => state.as_str()).increment(1);
    histogram!(names::PIPELINE_DURATION_SECONDS, "state" => state.as_str())
        .record(elapsed.as_secs_f64());
}

/// Record a stage exit.
pub fn record_stage_exit(stage: Stage, code: ExitCode) {
    counter!(
        names::STAGE_EXITS_TOTAL,
        "stage" => stage.as_str(),
        "code" => code_label(code)
    )
    .increment(1);
}

/// Record a stage spawn failure.
pub fn record_launch_failure(stage: Stage) {
    counter!(names::STAGE_LAUNCH_FAILURES_TOTAL, "stage" => stage.as_str()).increment(1);
}
