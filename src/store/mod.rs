//! File-based result store.
//!
//! Layout under an output directory:
//!
//! ```text
//! <out>/matrix_summary.json
//! <out>/<run_id>/preds.json
//! <out>/<run_id>/summary.json
//! <out>/<run_id>/<instance_id>/<instance_id>.traj.json
//! ```
//!
//! Every JSON file is written to a temporary sibling, synced, then renamed
//! into place, so readers only ever see complete snapshots. Updates of a
//! predictions map are read-merge-write cycles serialized by one lock shared
//! by the whole process.

pub mod artifacts;
pub mod predictions;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

pub use artifacts::{load_run_artifacts, RunArtifacts};
pub use predictions::{read_predictions, Prediction, PredictionsMap};

use crate::agent::Trajectory;
use crate::error::StoreError;
use crate::runner::{MatrixSummary, RunSummary};

pub const PREDICTIONS_FILE: &str = "preds.json";
pub const SUMMARY_FILE: &str = "summary.json";
pub const MATRIX_SUMMARY_FILE: &str = "matrix_summary.json";
pub const TRAJECTORY_SUFFIX: &str = ".traj.json";

fn predictions_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// Reads and writes run artifacts under one output directory.
#[derive(Debug, Clone)]
pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    pub fn predictions_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join(PREDICTIONS_FILE)
    }

    pub fn summary_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join(SUMMARY_FILE)
    }

    pub fn trajectory_path(&self, run_id: &str, instance_id: &str) -> PathBuf {
        self.run_dir(run_id)
            .join(instance_id)
            .join(format!("{}{}", instance_id, TRAJECTORY_SUFFIX))
    }

    pub fn matrix_summary_path(&self) -> PathBuf {
        self.root.join(MATRIX_SUMMARY_FILE)
    }

    pub async fn load_predictions(&self, run_id: &str) -> Result<PredictionsMap, StoreError> {
        read_predictions(&self.predictions_path(run_id)).await
    }

    /// Instance ids already recorded for a run.
    pub async fn completed_instances(&self, run_id: &str) -> Result<BTreeSet<String>, StoreError> {
        Ok(self.load_predictions(run_id).await?.into_keys().collect())
    }

    /// Adds or replaces one prediction, preserving every other entry.
    pub async fn record_prediction(
        &self,
        run_id: &str,
        instance_id: &str,
        model_patch: &str,
    ) -> Result<(), StoreError> {
        let path = self.predictions_path(run_id);
        let _guard = predictions_lock().lock().await;

        let mut preds = read_predictions(&path).await?;
        preds.insert(
            instance_id.to_string(),
            Prediction::new(run_id, instance_id, model_patch),
        );
        write_json_atomic(&path, &preds).await?;

        debug!(run_id, instance_id, total = preds.len(), "Recorded prediction");
        Ok(())
    }

    pub async fn write_trajectory(
        &self,
        run_id: &str,
        trajectory: &Trajectory,
    ) -> Result<PathBuf, StoreError> {
        let path = self.trajectory_path(run_id, &trajectory.instance_id);
        write_json_atomic(&path, trajectory).await?;
        Ok(path)
    }

    pub async fn write_summary(&self, summary: &RunSummary) -> Result<PathBuf, StoreError> {
        let path = self.summary_path(&summary.run_id);
        write_json_atomic(&path, summary).await?;
        Ok(path)
    }

    pub async fn write_matrix_summary(&self, summary: &MatrixSummary) -> Result<PathBuf, StoreError> {
        let path = self.matrix_summary_path();
        write_json_atomic(&path, summary).await?;
        Ok(path)
    }
}

/// Writes pretty JSON through a synced temporary file and an atomic rename.
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let data = serde_json::to_vec_pretty(value)?;

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .map_err(|e| StoreError::io(parent, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    let written = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = written {
        fs::remove_file(&tmp).await.ok();
        return Err(StoreError::io(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_layout() {
        let store = ResultStore::new("/out");
        assert_eq!(store.predictions_path("m_mcp"), PathBuf::from("/out/m_mcp/preds.json"));
        assert_eq!(
            store.trajectory_path("m_mcp", "a__b-1"),
            PathBuf::from("/out/m_mcp/a__b-1/a__b-1.traj.json")
        );
        assert_eq!(store.matrix_summary_path(), PathBuf::from("/out/matrix_summary.json"));
    }

    #[tokio::test]
    async fn test_record_prediction_merges_entries() {
        let dir = TempDir::new().unwrap();
        let store = ResultStore::new(dir.path());

        store.record_prediction("m_baseline", "a", "diff a").await.unwrap();
        store.record_prediction("m_baseline", "b", "").await.unwrap();
        store.record_prediction("m_baseline", "a", "diff a2").await.unwrap();

        let preds = store.load_predictions("m_baseline").await.unwrap();
        assert_eq!(preds.len(), 2);
        assert_eq!(preds["a"].model_patch, "diff a2");
        assert_eq!(preds["b"].model_name_or_path, "m_baseline");

        let done = store.completed_instances("m_baseline").await.unwrap();
        assert_eq!(done.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_concurrent_records_are_all_kept() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ResultStore::new(dir.path()));

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .record_prediction("m_full", &format!("inst-{}", i), "diff")
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let preds = store.load_predictions("m_full").await.unwrap();
        assert_eq!(preds.len(), 32);
    }

    #[tokio::test]
    async fn test_atomic_write_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/out.json");
        write_json_atomic(&path, &serde_json::json!({"ok": true})).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["out.json".to_string()]);
    }
}
