//! Problem instances and where they come from.

pub mod selection;
pub mod source;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use selection::{select_instances, InstanceFilter, SliceSpec};
pub use source::{dataset_for_subset, FileSource, HubSource, InstanceSource};

/// Registry prefix of the prebuilt per-instance evaluation images.
pub const IMAGE_REGISTRY_PREFIX: &str = "docker.io/swebench/sweb.eval.x86_64.";

/// One benchmark task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemInstance {
    pub instance_id: String,
    #[serde(default)]
    pub problem_statement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
    /// Reference solution, used by the oracle agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    /// Remaining dataset columns (repo, base_commit, tests, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProblemInstance {
    pub fn new(instance_id: impl Into<String>, problem_statement: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            problem_statement: problem_statement.into(),
            image_name: None,
            patch: None,
            extra: Map::new(),
        }
    }

    pub fn with_image_name(mut self, image: impl Into<String>) -> Self {
        self.image_name = Some(image.into());
        self
    }

    pub fn with_patch(mut self, patch: impl Into<String>) -> Self {
        self.patch = Some(patch.into());
        self
    }

    /// Container image for this instance.
    ///
    /// An explicit `image_name` wins. Otherwise the prebuilt evaluation image
    /// is derived from the instance id, with `__` encoded as `_1776_` and the
    /// whole reference lowercased.
    pub fn image_reference(&self) -> String {
        match self.image_name.as_deref() {
            Some(image) if !image.is_empty() => image.to_string(),
            _ => {
                let encoded = self.instance_id.replace("__", "_1776_");
                format!("{}{}:latest", IMAGE_REGISTRY_PREFIX, encoded).to_lowercase()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_image_reference_derived_from_id() {
        let instance = ProblemInstance::new("Django__django-11099", "fix it");
        assert_eq!(
            instance.image_reference(),
            "docker.io/swebench/sweb.eval.x86_64.django_1776_django-11099:latest"
        );
    }

    #[test]
    fn test_explicit_image_name_wins() {
        let instance = ProblemInstance::new("a__b-1", "").with_image_name("custom/Image:1");
        assert_eq!(instance.image_reference(), "custom/Image:1");
    }

    #[test]
    fn test_extra_columns_survive_deserialization() {
        let instance: ProblemInstance = serde_json::from_value(json!({
            "instance_id": "astropy__astropy-12907",
            "problem_statement": "Modeling's separability_matrix ...",
            "repo": "astropy/astropy",
            "patch": "diff --git a/x b/x"
        }))
        .unwrap();

        assert_eq!(instance.patch.as_deref(), Some("diff --git a/x b/x"));
        assert_eq!(instance.extra.get("repo"), Some(&json!("astropy/astropy")));
        assert!(instance.image_name.is_none());
    }
}
