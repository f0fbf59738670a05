//! Model and mode configuration.
//!
//! A run configuration is the deep merge of one mode definition and one model
//! definition, both YAML files found under a config directory:
//!
//! ```text
//! <config-dir>/models/<model>.yaml
//! <config-dir>/modes/<mode>.yaml
//! ```

pub mod merge;
pub mod registry;
pub mod resolver;

pub use merge::{merge_all, merge_maps, merge_values};
pub use registry::ConfigRegistry;
pub use resolver::{AgentSpec, ConfigResolver, EnvironmentSpec, RunConfiguration, KIND_KEY};

use serde::Serialize;
use serde_json::Value;

/// Mode reported for definitions that do not declare `agent.augmentation_mode`.
pub const DEFAULT_AUGMENTATION_MODE: &str = "baseline";

/// One line of the configuration listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DefinitionSummary {
    pub name: String,
    /// `model.model_name` for models, `agent.augmentation_mode` for modes.
    pub detail: String,
}

/// Lists registered models with their backend model names.
pub fn list_models(registry: &ConfigRegistry) -> Vec<DefinitionSummary> {
    registry
        .model_names()
        .into_iter()
        .map(|name| {
            let detail = match registry.load_model(&name) {
                Ok(value) => value
                    .pointer("/model/model_name")
                    .and_then(Value::as_str)
                    .unwrap_or("?")
                    .to_string(),
                Err(e) => format!("<{}>", e),
            };
            DefinitionSummary { name, detail }
        })
        .collect()
}

/// Lists registered modes with their augmentation mode.
pub fn list_modes(registry: &ConfigRegistry) -> Vec<DefinitionSummary> {
    registry
        .mode_names()
        .into_iter()
        .map(|name| {
            let detail = match registry.load_mode(&name) {
                Ok(value) => value
                    .pointer("/agent/augmentation_mode")
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_AUGMENTATION_MODE)
                    .to_string(),
                Err(e) => format!("<{}>", e),
            };
            DefinitionSummary { name, detail }
        })
        .collect()
}
