//! Metrics aggregation over persisted runs.
//!
//! Everything here reads artifacts written by the runner and never writes to
//! a run directory, except the optional scorer output under `scorer_eval/`.

pub mod compare;
pub mod metrics;
pub mod report;
pub mod usage;
pub mod verify;

use std::path::Path;

use tracing::info;

pub use compare::{compare_modes, order_modes, percent_delta, ModeDelta, CALLS_FLOOR, COST_FLOOR};
pub use metrics::{compute_metrics, MetricsSource, RunMetrics};
pub use report::{
    render_comparison, render_matrix, render_metrics, render_results, render_tool_usage, OutputFormat,
};
pub use usage::{tool_usage, ToolUsage};
pub use verify::{Scorer, VerifyError};

use crate::identity::ModeSet;
use crate::store::load_run_artifacts;

/// Optional scorer pass applied while summarizing.
pub struct Verification<'a> {
    pub scorer: &'a Scorer,
    pub dataset: &'a str,
}

/// Loads every run under `results_dir` and computes its metrics, naming runs
/// against `modes`.
pub async fn summarize_results(
    results_dir: &Path,
    modes: &ModeSet,
    verification: Option<Verification<'_>>,
) -> Vec<RunMetrics> {
    let runs = load_run_artifacts(results_dir).await;
    info!(results_dir = %results_dir.display(), runs = runs.len(), "Loaded runs");

    let mut all = Vec::with_capacity(runs.len());
    for artifacts in &runs {
        let mut metrics = compute_metrics(artifacts).with_identity(modes.parse(&artifacts.run_id));
        if let Some(v) = &verification {
            if let Some(resolved) = v
                .scorer
                .resolved_count(&artifacts.dir, &artifacts.run_id, v.dataset)
                .await
            {
                metrics = metrics.with_resolved(resolved);
            }
        }
        all.push(metrics);
    }
    all
}
