//! The predictions map: `preds.json`, keyed by instance id.
//!
//! It is the resume ledger. An instance id is present exactly when its
//! attempt has returned, whatever the outcome.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// One entry in the format the external scorer consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Prediction {
    pub model_name_or_path: String,
    pub instance_id: String,
    pub model_patch: String,
}

impl Prediction {
    pub fn new(
        run_id: impl Into<String>,
        instance_id: impl Into<String>,
        model_patch: impl Into<String>,
    ) -> Self {
        Self {
            model_name_or_path: run_id.into(),
            instance_id: instance_id.into(),
            model_patch: model_patch.into(),
        }
    }

    pub fn has_patch(&self) -> bool {
        !self.model_patch.trim().is_empty()
    }
}

pub type PredictionsMap = BTreeMap<String, Prediction>;

/// Reads a predictions file; a missing file is an empty map.
pub async fn read_predictions(path: &Path) -> Result<PredictionsMap, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PredictionsMap::new()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let preds = read_predictions(&dir.path().join("preds.json")).await.unwrap();
        assert!(preds.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("preds.json");
        std::fs::write(&path, "{\"a\": ").unwrap();

        let err = read_predictions(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn test_has_patch_ignores_whitespace() {
        assert!(!Prediction::new("r", "a", "  \n").has_patch());
        assert!(Prediction::new("r", "a", "diff").has_patch());
    }
}
