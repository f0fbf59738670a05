//! Trajectory record written for each attempted instance.
//!
//! Layout on disk:
//!
//! ```json
//! {
//!   "instance_id": "...",
//!   "run_id": "...",
//!   "info": {
//!     "exit_status": "Submitted",
//!     "submission": "diff --git ...",
//!     "model_stats": {"instance_cost": 0.12, "api_calls": 14},
//!     "augmentation": {"metrics": {"total_tool_calls": 9, ...}}
//!   },
//!   "messages": [...]
//! }
//! ```
//!
//! Every field defaults when missing so trajectories produced by other tools
//! still load.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::AgentUsage;

/// Tool and augmentation counters reported by an agent for one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationMetrics {
    pub total_tool_calls: u64,
    /// Lookups that returned usable supplementary context.
    pub augmentation_hits: u64,
    /// Lookups attempted.
    pub augmentation_calls: u64,
    /// Calls per tool name.
    pub tool_calls: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelStats {
    pub instance_cost: f64,
    pub api_calls: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<AugmentationMetrics>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrajectoryInfo {
    pub exit_status: Option<String>,
    pub submission: String,
    pub model_stats: ModelStats,
    pub augmentation: AugmentationInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Trajectory {
    pub instance_id: String,
    pub run_id: String,
    pub info: TrajectoryInfo,
    pub messages: Vec<Value>,
}

impl Trajectory {
    pub fn new(instance_id: impl Into<String>, messages: Vec<Value>) -> Self {
        Self {
            instance_id: instance_id.into(),
            messages,
            ..Default::default()
        }
    }

    /// Stamps the final outcome of the attempt onto the record.
    pub fn record_outcome(
        &mut self,
        run_id: &str,
        exit_status: Option<&str>,
        submission: &str,
        usage: &AgentUsage,
    ) {
        self.run_id = run_id.to_string();
        self.info.exit_status = exit_status.map(str::to_string);
        self.info.submission = submission.to_string();
        self.info.model_stats = ModelStats {
            instance_cost: usage.cost,
            api_calls: usage.n_calls,
        };
        self.info.augmentation.metrics = usage.metrics.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_partial_trajectory_loads_with_defaults() {
        let trajectory: Trajectory = serde_json::from_value(json!({
            "info": {"model_stats": {"instance_cost": 0.5}}
        }))
        .unwrap();

        assert_eq!(trajectory.info.model_stats.instance_cost, 0.5);
        assert_eq!(trajectory.info.model_stats.api_calls, 0);
        assert!(trajectory.info.augmentation.metrics.is_none());
        assert!(trajectory.messages.is_empty());
    }

    #[test]
    fn test_record_outcome() {
        let mut trajectory = Trajectory::new("a__b-1", vec![json!({"role": "user"})]);
        let usage = AgentUsage {
            cost: 0.25,
            n_calls: 3,
            metrics: Some(AugmentationMetrics {
                total_tool_calls: 2,
                ..Default::default()
            }),
        };
        trajectory.record_outcome("m_augment", Some("Submitted"), "diff", &usage);

        let value = serde_json::to_value(&trajectory).unwrap();
        assert_eq!(value["run_id"], "m_augment");
        assert_eq!(value["info"]["exit_status"], "Submitted");
        assert_eq!(value["info"]["model_stats"]["api_calls"], 3);
        assert_eq!(value["info"]["augmentation"]["metrics"]["total_tool_calls"], 2);
    }
}
