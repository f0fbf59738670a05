//! Per-instance results and run-level summaries.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::AugmentationMetrics;
use crate::config::RunConfiguration;
use crate::identity::RunIdentity;

/// Terminal status of one instance attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// The agent ran to its own exit condition.
    Completed,
    /// Building collaborators or running the agent failed.
    #[default]
    Error,
}

/// Which stage of an attempt a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Execution,
    /// Trajectory or prediction persistence; the result itself still stands.
    SideChannel,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "configuration"),
            ErrorKind::Execution => write!(f, "execution"),
            ErrorKind::SideChannel => write!(f, "side_channel"),
        }
    }
}

/// A captured failure with its cause chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: ErrorKind,
    pub category: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
}

impl FailureRecord {
    pub fn new(kind: ErrorKind, category: impl Into<String>, error: &anyhow::Error) -> Self {
        Self {
            kind,
            category: category.into(),
            message: error.to_string(),
            causes: error.chain().skip(1).map(|c| c.to_string()).collect(),
        }
    }
}

/// Outcome of one supervisor invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceResult {
    pub instance_id: String,
    pub model: String,
    pub mode: String,
    pub run_id: String,
    pub status: InstanceStatus,
    /// Raw exit status: the agent's exit condition, or the error category.
    pub exit_status: Option<String>,
    pub submission: String,
    pub cost: f64,
    pub n_calls: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<AugmentationMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub degraded: Vec<FailureRecord>,
    pub duration_secs: f64,
}

impl InstanceResult {
    /// A fresh result in the error state, before anything has run.
    pub fn new(instance_id: impl Into<String>, identity: &RunIdentity) -> Self {
        Self {
            instance_id: instance_id.into(),
            model: identity.model.clone(),
            mode: identity.mode.clone(),
            run_id: identity.token(),
            ..Default::default()
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == InstanceStatus::Completed
    }

    /// Marks the attempt as failed.
    pub fn fail(&mut self, record: FailureRecord) {
        self.status = InstanceStatus::Error;
        self.exit_status = Some(record.category.clone());
        self.failure = Some(record);
    }

    /// Notes a side-channel failure without changing the status.
    pub fn degrade(&mut self, record: FailureRecord) {
        self.degraded.push(record);
    }
}

/// Written once per scheduling pass to `<run>/summary.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSummary {
    pub run_id: String,
    pub model: String,
    pub mode: String,
    pub config: Value,
    pub total_instances: usize,
    pub completed: usize,
    pub total_cost: f64,
    pub total_api_calls: u64,
    pub results: Vec<InstanceResult>,
    pub created_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn new(config: &RunConfiguration, results: Vec<InstanceResult>) -> Self {
        Self {
            run_id: config.run_id(),
            model: config.identity.model.clone(),
            mode: config.identity.mode.clone(),
            config: config.raw.clone(),
            total_instances: results.len(),
            completed: results.iter().filter(|r| r.is_completed()).count(),
            total_cost: results.iter().map(|r| r.cost).sum(),
            total_api_calls: results.iter().map(|r| r.n_calls).sum(),
            results,
            created_at: Utc::now(),
        }
    }
}

/// Per-run totals inside the matrix summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTotals {
    pub total: usize,
    pub cost: f64,
    pub api_calls: u64,
}

impl RunTotals {
    pub fn from_results(results: &[InstanceResult]) -> Self {
        Self {
            total: results.len(),
            cost: results.iter().map(|r| r.cost).sum(),
            api_calls: results.iter().map(|r| r.n_calls).sum(),
        }
    }
}

/// Written once per matrix invocation to `<out>/matrix_summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixSummary {
    pub timestamp: DateTime<Utc>,
    pub models: Vec<String>,
    pub modes: Vec<String>,
    pub subset: String,
    pub n_instances: usize,
    pub runs: BTreeMap<String, RunTotals>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(id: &str, completed: bool, cost: f64, calls: u64) -> InstanceResult {
        let mut r = InstanceResult::new(id, &RunIdentity::new("m", "baseline"));
        if completed {
            r.status = InstanceStatus::Completed;
            r.exit_status = Some("Submitted".to_string());
        }
        r.cost = cost;
        r.n_calls = calls;
        r
    }

    #[test]
    fn test_new_result_carries_identity() {
        let r = InstanceResult::new("a__b-1", &RunIdentity::new("claude", "augment"));
        assert_eq!(r.run_id, "claude_augment");
        assert_eq!(r.status, InstanceStatus::Error);
        assert!(r.exit_status.is_none());
    }

    #[test]
    fn test_fail_sets_exit_status_to_category() {
        let mut r = result("a", true, 0.0, 0);
        let err = anyhow::anyhow!("socket closed").context("docker exec failed");
        r.fail(FailureRecord::new(ErrorKind::Execution, "ContainerError", &err));

        assert_eq!(r.status, InstanceStatus::Error);
        assert_eq!(r.exit_status.as_deref(), Some("ContainerError"));
        let failure = r.failure.unwrap();
        assert_eq!(failure.message, "docker exec failed");
        assert_eq!(failure.causes, vec!["socket closed".to_string()]);
    }

    #[test]
    fn test_run_totals() {
        let results = vec![result("a", true, 0.5, 3), result("b", false, 0.25, 1)];
        let totals = RunTotals::from_results(&results);
        assert_eq!(totals.total, 2);
        assert_eq!(totals.cost, 0.75);
        assert_eq!(totals.api_calls, 4);
    }

    #[test]
    fn test_result_serialization_omits_empty_side_records() {
        let value = serde_json::to_value(result("a", true, 0.0, 0)).unwrap();
        assert!(value.get("failure").is_none());
        assert!(value.get("degraded").is_none());
        assert_eq!(value["status"], json!("completed"));
    }

    #[test]
    fn test_summary_loads_leniently() {
        let summary: RunSummary = serde_json::from_value(json!({
            "run_id": "m_baseline",
            "results": [{"instance_id": "a", "cost": 0.1, "n_calls": 2}]
        }))
        .unwrap();
        assert_eq!(summary.results[0].n_calls, 2);
        assert_eq!(summary.results[0].status, InstanceStatus::Error);
    }
}
