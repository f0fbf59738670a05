//! Optional verification through the external SWE-bench scorer.
//!
//! The scorer is a separate program run on a run's predictions map. It writes
//! a report whose `resolved` field is either a count or the list of resolved
//! instance ids. Any failure here is reported and turned into "no resolved
//! count"; it never fails the analysis.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::agent::command::tail;
use crate::store::PREDICTIONS_FILE;

/// Directory under the run directory receiving scorer output.
pub const SCORER_OUTPUT_DIR: &str = "scorer_eval";
/// Report file written by the scorer under `<output_dir>/<run_id>/`.
pub const SCORER_REPORT_FILE: &str = "results.json";

pub const DEFAULT_SCORER_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_SCORER_WORKERS: usize = 4;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("No predictions at {0}")]
    MissingPredictions(PathBuf),

    #[error("Failed to start scorer: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Scorer timed out after {0:?}")]
    Timeout(Duration),

    #[error("Scorer exited with code {code}: {stderr}")]
    Failed { code: i32, stderr: String },

    #[error("Scorer report not found at {0}")]
    MissingReport(PathBuf),

    #[error("Unreadable scorer report {path}: {reason}")]
    BadReport { path: PathBuf, reason: String },
}

impl VerifyError {
    pub fn category(&self) -> &'static str {
        match self {
            VerifyError::MissingPredictions(_) => "MissingPredictions",
            VerifyError::Spawn(_) => "ScorerSpawnError",
            VerifyError::Timeout(_) => "ScorerTimeout",
            VerifyError::Failed { .. } => "ScorerFailed",
            VerifyError::MissingReport(_) => "MissingReport",
            VerifyError::BadReport { .. } => "BadReport",
        }
    }
}

/// Invocation settings of the scorer.
#[derive(Debug, Clone)]
pub struct Scorer {
    program: String,
    base_args: Vec<String>,
    max_workers: usize,
    timeout: Duration,
}

impl Default for Scorer {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            base_args: vec!["-m".to_string(), "swebench.harness.run_evaluation".to_string()],
            max_workers: DEFAULT_SCORER_WORKERS,
            timeout: DEFAULT_SCORER_TIMEOUT,
        }
    }
}

impl Scorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the program and the arguments preceding the scorer options.
    pub fn with_command(mut self, program: impl Into<String>, base_args: Vec<String>) -> Self {
        self.program = program.into();
        self.base_args = base_args;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Scores the predictions map of `run_dir` against `dataset` and returns
    /// the resolved count.
    pub async fn evaluate(&self, run_dir: &Path, run_id: &str, dataset: &str) -> Result<u64, VerifyError> {
        let preds = run_dir.join(PREDICTIONS_FILE);
        if !preds.is_file() {
            return Err(VerifyError::MissingPredictions(preds));
        }
        let output_dir = run_dir.join(SCORER_OUTPUT_DIR);

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .arg("--dataset_name")
            .arg(dataset)
            .arg("--predictions_path")
            .arg(&preds)
            .arg("--max_workers")
            .arg(self.max_workers.to_string())
            .arg("--run_id")
            .arg(run_id)
            .arg("--output_dir")
            .arg(&output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(run_id, dataset, program = %self.program, "Running scorer");
        let child = cmd.spawn().map_err(VerifyError::Spawn)?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| VerifyError::Timeout(self.timeout))?
            .map_err(VerifyError::Spawn)?;

        if !output.status.success() {
            return Err(VerifyError::Failed {
                code: output.status.code().unwrap_or(-1),
                stderr: tail(&String::from_utf8_lossy(&output.stderr), 500),
            });
        }

        let report = output_dir.join(run_id).join(SCORER_REPORT_FILE);
        let resolved = read_resolved(&report).await?;
        debug!(run_id, resolved, report = %report.display(), "Scorer report read");
        Ok(resolved)
    }

    /// Like [`evaluate`](Self::evaluate), but logs any failure and returns `None`.
    pub async fn resolved_count(&self, run_dir: &Path, run_id: &str, dataset: &str) -> Option<u64> {
        match self.evaluate(run_dir, run_id, dataset).await {
            Ok(resolved) => Some(resolved),
            Err(e) => {
                warn!(run_id, category = e.category(), error = %e, "Verification unavailable");
                None
            }
        }
    }
}

async fn read_resolved(path: &Path) -> Result<u64, VerifyError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|_| VerifyError::MissingReport(path.to_path_buf()))?;
    let bad = |reason: String| VerifyError::BadReport {
        path: path.to_path_buf(),
        reason,
    };
    let report: Value = serde_json::from_slice(&bytes).map_err(|e| bad(e.to_string()))?;

    match report.get("resolved") {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f.max(0.0) as u64))
            .ok_or_else(|| bad(format!("invalid resolved count {}", n))),
        Some(Value::Array(ids)) => Ok(ids.len() as u64),
        Some(other) => Err(bad(format!("unexpected resolved value {}", other))),
        None => Err(bad("missing `resolved` field".to_string())),
    }
}
