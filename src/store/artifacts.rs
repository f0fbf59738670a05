//! Read-only loading of persisted runs for analysis.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{read_predictions, PredictionsMap, PREDICTIONS_FILE, SUMMARY_FILE, TRAJECTORY_SUFFIX};
use crate::agent::Trajectory;
use crate::runner::RunSummary;

/// Everything persisted for one run directory.
#[derive(Debug, Clone, Default)]
pub struct RunArtifacts {
    pub run_id: String,
    pub dir: PathBuf,
    pub summary: Option<RunSummary>,
    pub predictions: Option<PredictionsMap>,
    /// Trajectories keyed by instance id.
    pub trajectories: BTreeMap<String, Trajectory>,
}

impl RunArtifacts {
    /// Loads one run directory. Unreadable pieces are skipped.
    pub async fn load(dir: &Path) -> Self {
        let run_id = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let summary = read_summary(&dir.join(SUMMARY_FILE)).await;

        let preds_path = dir.join(PREDICTIONS_FILE);
        let predictions = if preds_path.is_file() {
            match read_predictions(&preds_path).await {
                Ok(preds) => Some(preds),
                Err(e) => {
                    warn!(path = %preds_path.display(), error = %e, "Skipping unreadable predictions");
                    None
                }
            }
        } else {
            None
        };

        Self {
            run_id,
            dir: dir.to_path_buf(),
            summary,
            predictions,
            trajectories: read_trajectories(dir).await,
        }
    }
}

/// Loads every run under `results_dir`: each subdirectory holding a
/// predictions map or a run summary, sorted by name.
pub async fn load_run_artifacts(results_dir: &Path) -> Vec<RunArtifacts> {
    let mut run_dirs: Vec<PathBuf> = WalkDir::new(results_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .filter(|dir| dir.join(PREDICTIONS_FILE).is_file() || dir.join(SUMMARY_FILE).is_file())
        .collect();
    run_dirs.sort();

    let mut runs = Vec::with_capacity(run_dirs.len());
    for dir in run_dirs {
        runs.push(RunArtifacts::load(&dir).await);
    }
    runs
}

async fn read_summary(path: &Path) -> Option<RunSummary> {
    let bytes = tokio::fs::read(path).await.ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(summary) => Some(summary),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Skipping unreadable run summary");
            None
        }
    }
}

/// Reads `<dir>/*/*.traj.json`.
async fn read_trajectories(dir: &Path) -> BTreeMap<String, Trajectory> {
    let paths: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(TRAJECTORY_SUFFIX))
        .map(|entry| entry.into_path())
        .collect();

    let mut trajectories = BTreeMap::new();
    for path in paths {
        let parsed = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Trajectory>(&bytes).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match parsed {
            Ok(trajectory) => {
                let instance_id = if trajectory.instance_id.is_empty() {
                    instance_id_from_path(&path)
                } else {
                    trajectory.instance_id.clone()
                };
                trajectories.insert(instance_id, trajectory);
            }
            Err(e) => debug!(path = %path.display(), error = %e, "Skipping unreadable trajectory"),
        }
    }
    trajectories
}

fn instance_id_from_path(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
        .trim_end_matches(TRAJECTORY_SUFFIX)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(path: &Path, value: serde_json::Value) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, serde_json::to_vec(&value).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_load_run_artifacts() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();

        write(
            &root.join("m_baseline/preds.json"),
            json!({"a": {"model_name_or_path": "m_baseline", "instance_id": "a", "model_patch": "diff"}}),
        );
        write(
            &root.join("m_baseline/a/a.traj.json"),
            json!({"info": {"model_stats": {"instance_cost": 0.3, "api_calls": 5}}}),
        );
        std::fs::write(root.join("m_baseline/a/b.traj.json"), "garbage").unwrap();
        write(&root.join("m_mcp/summary.json"), json!({"run_id": "m_mcp", "results": []}));
        std::fs::create_dir_all(root.join("unrelated")).unwrap();

        let runs = load_run_artifacts(root).await;
        assert_eq!(runs.len(), 2);

        assert_eq!(runs[0].run_id, "m_baseline");
        assert_eq!(runs[0].predictions.as_ref().unwrap().len(), 1);
        assert!(runs[0].summary.is_none());
        assert_eq!(runs[0].trajectories.len(), 1);
        assert_eq!(runs[0].trajectories["a"].info.model_stats.api_calls, 5);

        assert_eq!(runs[1].run_id, "m_mcp");
        assert!(runs[1].predictions.is_none());
        assert!(runs[1].summary.is_some());
    }

    #[tokio::test]
    async fn test_missing_results_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(load_run_artifacts(&dir.path().join("nope")).await.is_empty());
    }
}
