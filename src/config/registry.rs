//! Registry of available model and mode definitions.
//!
//! The registry is built once at startup, either by scanning a config
//! directory (`models/*.yaml`, `modes/*.yaml`) or from in-memory definitions,
//! and then handed to the resolver and the CLI.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ConfigError, DefinitionKind};
use crate::identity::ModeSet;

/// Where a definition's content comes from.
#[derive(Debug, Clone)]
enum Definition {
    File(PathBuf),
    Inline(Value),
}

/// Named model and mode definitions.
#[derive(Debug, Clone, Default)]
pub struct ConfigRegistry {
    models: BTreeMap<String, Definition>,
    modes: BTreeMap<String, Definition>,
}

impl ConfigRegistry {
    /// Scans `root/models` and `root/modes` for `*.yaml` / `*.yml` files.
    ///
    /// Files are only listed here; their content is read on each lookup so
    /// a malformed definition surfaces when a configuration using it is
    /// resolved.
    pub fn discover(root: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(ConfigError::DirectoryNotFound(root.to_path_buf()));
        }

        let registry = Self {
            models: scan_definitions(&root.join("models"))?,
            modes: scan_definitions(&root.join("modes"))?,
        };

        debug!(
            root = %root.display(),
            models = registry.models.len(),
            modes = registry.modes.len(),
            "Discovered config definitions"
        );

        Ok(registry)
    }

    /// Builds a registry from in-memory definitions.
    pub fn from_definitions(
        models: impl IntoIterator<Item = (String, Value)>,
        modes: impl IntoIterator<Item = (String, Value)>,
    ) -> Self {
        Self {
            models: models
                .into_iter()
                .map(|(name, value)| (name, Definition::Inline(value)))
                .collect(),
            modes: modes
                .into_iter()
                .map(|(name, value)| (name, Definition::Inline(value)))
                .collect(),
        }
    }

    /// Sorted model names.
    pub fn model_names(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    /// Sorted mode names.
    pub fn mode_names(&self) -> Vec<String> {
        self.modes.keys().cloned().collect()
    }

    /// Mode set for identity parsing: the registered modes plus the defaults.
    pub fn mode_set(&self) -> ModeSet {
        ModeSet::default().with_modes(self.modes.keys().cloned())
    }

    pub fn load_model(&self, name: &str) -> Result<Value, ConfigError> {
        load_definition(&self.models, DefinitionKind::Model, name)
    }

    pub fn load_mode(&self, name: &str) -> Result<Value, ConfigError> {
        load_definition(&self.modes, DefinitionKind::Mode, name)
    }
}

fn scan_definitions(dir: &Path) -> Result<BTreeMap<String, Definition>, ConfigError> {
    let mut found = BTreeMap::new();
    if !dir.is_dir() {
        return Ok(found);
    }

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if !path.is_file() || !is_yaml {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            found.insert(stem.to_string(), Definition::File(path.clone()));
        }
    }

    Ok(found)
}

fn load_definition(
    definitions: &BTreeMap<String, Definition>,
    kind: DefinitionKind,
    name: &str,
) -> Result<Value, ConfigError> {
    let definition = definitions.get(name).ok_or_else(|| ConfigError::NotFound {
        kind,
        name: name.to_string(),
    })?;

    let value = match definition {
        Definition::Inline(value) => value.clone(),
        Definition::File(path) => {
            let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ConfigError::NotFound {
                    kind,
                    name: name.to_string(),
                },
                _ => ConfigError::Io(e),
            })?;
            parse_yaml(&content).map_err(|reason| ConfigError::Malformed {
                kind,
                name: name.to_string(),
                reason,
            })?
        }
    };

    match value {
        Value::Null => Ok(Value::Object(Map::new())),
        Value::Object(_) => Ok(value),
        other => Err(ConfigError::Malformed {
            kind,
            name: name.to_string(),
            reason: format!("top level must be a mapping, got {}", type_name(&other)),
        }),
    }
}

fn parse_yaml(content: &str) -> Result<Value, String> {
    if content.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_yaml::from_str::<Value>(content).map_err(|e| e.to_string())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}
