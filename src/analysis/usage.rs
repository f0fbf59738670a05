//! Per-tool call totals of a run.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::metrics::{usage_records, MetricsSource};
use crate::store::RunArtifacts;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolUsage {
    pub run_id: String,
    pub source: MetricsSource,
    /// Calls per tool name.
    pub tool_calls: BTreeMap<String, u64>,
    pub total_tool_calls: u64,
    pub augmentation_hits: u64,
}

impl ToolUsage {
    pub fn is_empty(&self) -> bool {
        self.total_tool_calls == 0 && self.tool_calls.is_empty()
    }
}

/// Sums tool counters with the same source preference as
/// [`compute_metrics`](super::compute_metrics).
pub fn tool_usage(artifacts: &RunArtifacts) -> ToolUsage {
    let (source, records) = usage_records(artifacts);
    let mut usage = ToolUsage {
        run_id: artifacts.run_id.clone(),
        source,
        ..Default::default()
    };

    for metrics in records.iter().filter_map(|r| r.metrics) {
        usage.total_tool_calls += metrics.total_tool_calls;
        usage.augmentation_hits += metrics.augmentation_hits;
        for (tool, count) in &metrics.tool_calls {
            *usage.tool_calls.entry(tool.clone()).or_insert(0) += count;
        }
    }
    usage
}
