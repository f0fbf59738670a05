//! Per-run metrics computed from persisted artifacts.

use serde::{Deserialize, Serialize};

use crate::agent::AugmentationMetrics;
use crate::identity::{ModeSet, RunIdentity};
use crate::store::RunArtifacts;

/// Where cost and augmentation numbers were read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsSource {
    Trajectories,
    Summary,
    #[default]
    None,
}

/// Aggregated metrics of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub run_id: String,
    pub model: String,
    pub mode: String,
    pub n_instances: usize,
    pub n_with_patch: usize,
    pub patch_rate: f64,
    pub total_cost: f64,
    pub avg_cost: f64,
    pub total_api_calls: u64,
    pub avg_api_calls: f64,
    pub total_tool_calls: u64,
    pub avg_tool_calls: f64,
    pub total_augment_hits: u64,
    pub total_augment_calls: u64,
    pub augment_hit_rate: f64,
    pub source: MetricsSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolve_rate: Option<f64>,
}

impl RunMetrics {
    pub fn with_identity(mut self, identity: RunIdentity) -> Self {
        self.model = identity.model;
        self.mode = identity.mode;
        self
    }

    /// Adds the scorer's resolved count.
    pub fn with_resolved(mut self, resolved: u64) -> Self {
        self.resolved = Some(resolved);
        self.resolve_rate = Some(resolved as f64 / self.n_instances.max(1) as f64);
        self
    }
}

/// Cost, call count and optional metrics of one instance, whichever source
/// they came from.
pub(crate) struct UsageRecord<'a> {
    pub cost: f64,
    pub api_calls: u64,
    pub metrics: Option<&'a AugmentationMetrics>,
}

/// Usage records of a run: trajectories when any exist, otherwise the run
/// summary's results. The two sources are never combined.
pub(crate) fn usage_records(artifacts: &RunArtifacts) -> (MetricsSource, Vec<UsageRecord<'_>>) {
    if !artifacts.trajectories.is_empty() {
        let records = artifacts
            .trajectories
            .values()
            .map(|t| UsageRecord {
                cost: t.info.model_stats.instance_cost,
                api_calls: t.info.model_stats.api_calls,
                metrics: t.info.augmentation.metrics.as_ref(),
            })
            .collect();
        return (MetricsSource::Trajectories, records);
    }

    match &artifacts.summary {
        Some(summary) => {
            let records = summary
                .results
                .iter()
                .map(|r| UsageRecord {
                    cost: r.cost,
                    api_calls: r.n_calls,
                    metrics: r.metrics.as_ref(),
                })
                .collect();
            (MetricsSource::Summary, records)
        }
        None => (MetricsSource::None, Vec::new()),
    }
}

/// Computes the metrics of one run.
///
/// Identity comes from the run summary when there is one, otherwise from the
/// directory name against the default mode set. Missing sources give zeros.
pub fn compute_metrics(artifacts: &RunArtifacts) -> RunMetrics {
    let identity = match &artifacts.summary {
        Some(s) if !s.model.is_empty() && !s.mode.is_empty() => {
            RunIdentity::new(s.model.as_str(), s.mode.as_str())
        }
        _ => ModeSet::default().parse(&artifacts.run_id),
    };

    let (n_instances, n_with_patch) = match (&artifacts.predictions, &artifacts.summary) {
        (Some(preds), _) => (preds.len(), preds.values().filter(|p| p.has_patch()).count()),
        (None, Some(summary)) => (
            summary.results.len(),
            summary
                .results
                .iter()
                .filter(|r| !r.submission.trim().is_empty())
                .count(),
        ),
        (None, None) => (0, 0),
    };

    let (source, records) = usage_records(artifacts);
    let total_cost: f64 = records.iter().map(|r| r.cost).sum();
    let total_api_calls: u64 = records.iter().map(|r| r.api_calls).sum();

    let with_metrics: Vec<&AugmentationMetrics> = records.iter().filter_map(|r| r.metrics).collect();
    let total_tool_calls: u64 = with_metrics.iter().map(|m| m.total_tool_calls).sum();
    let total_augment_hits: u64 = with_metrics.iter().map(|m| m.augmentation_hits).sum();
    let total_augment_calls: u64 = with_metrics.iter().map(|m| m.augmentation_calls).sum();

    let n = n_instances.max(1) as f64;
    let augment_hit_rate = if with_metrics.is_empty() {
        0.0
    } else {
        total_augment_hits as f64 / total_augment_calls.max(1) as f64
    };

    RunMetrics {
        run_id: artifacts.run_id.clone(),
        model: identity.model,
        mode: identity.mode,
        n_instances,
        n_with_patch,
        patch_rate: n_with_patch as f64 / n,
        total_cost,
        avg_cost: total_cost / n,
        total_api_calls,
        avg_api_calls: total_api_calls as f64 / n,
        total_tool_calls,
        avg_tool_calls: total_tool_calls as f64 / with_metrics.len().max(1) as f64,
        total_augment_hits,
        total_augment_calls,
        augment_hit_rate,
        source,
        resolved: None,
        resolve_rate: None,
    }
}
