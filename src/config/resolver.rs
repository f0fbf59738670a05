//! Resolution of a `(mode, model)` pair into one effective run configuration.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::merge::merge_values;
use super::registry::ConfigRegistry;
use crate::agent::{AgentKind, AgentSettings};
use crate::environment::{EnvironmentKind, EnvironmentSettings};
use crate::error::ConfigError;
use crate::identity::RunIdentity;

/// Key selecting the collaborator variant inside the `environment` and
/// `agent` sections.
pub const KIND_KEY: &str = "kind";

/// Environment section of a resolved configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentSpec {
    pub kind: EnvironmentKind,
    pub settings: EnvironmentSettings,
}

/// Agent section of a resolved configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSpec {
    pub kind: AgentKind,
    pub settings: AgentSettings,
    /// Section parameters without the kind tag, forwarded to the agent as-is.
    pub params: Map<String, Value>,
}

/// The effective configuration for one `(model, mode)` pair.
///
/// Always re-derivable from its two source definitions; `raw` is kept only so
/// the run summary can embed it for audit.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfiguration {
    pub identity: RunIdentity,
    pub raw: Value,
    /// The `model` section, handed to the agent untouched.
    pub model: Map<String, Value>,
    pub environment: EnvironmentSpec,
    pub agent: AgentSpec,
}

impl RunConfiguration {
    /// Builds a configuration from an already merged mapping.
    pub fn from_merged(identity: RunIdentity, raw: Value) -> Result<Self, ConfigError> {
        let model = section(&raw, "model")?;

        let mut env_params = section(&raw, "environment")?;
        let environment = EnvironmentSpec {
            kind: take_kind(&mut env_params, "environment")?
                .map(|tag| {
                    tag.parse::<EnvironmentKind>()
                        .map_err(|_| ConfigError::UnknownEnvironment(tag))
                })
                .transpose()?
                .unwrap_or_default(),
            settings: typed_section(env_params, "environment")?,
        };

        let mut agent_params = section(&raw, "agent")?;
        let agent_kind = take_kind(&mut agent_params, "agent")?
            .map(|tag| {
                tag.parse::<AgentKind>()
                    .map_err(|_| ConfigError::UnknownAgent(tag))
            })
            .transpose()?
            .unwrap_or_default();
        let agent_settings: AgentSettings = typed_section(agent_params.clone(), "agent")?;
        if agent_kind == AgentKind::Command && agent_settings.command.is_none() {
            return Err(ConfigError::InvalidSection {
                section: "agent".to_string(),
                reason: "the command agent requires a 'command' entry".to_string(),
            });
        }

        Ok(Self {
            identity,
            raw,
            model,
            environment,
            agent: AgentSpec {
                kind: agent_kind,
                settings: agent_settings,
                params: agent_params,
            },
        })
    }

    /// The run identity token, `"{model}_{mode}"`.
    pub fn run_id(&self) -> String {
        self.identity.token()
    }

    /// The backend model name declared in the `model` section, if any.
    pub fn model_name(&self) -> Option<&str> {
        self.model.get("model_name").and_then(Value::as_str)
    }
}

/// Resolves run configurations against a registry.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    registry: Arc<ConfigRegistry>,
}

impl ConfigResolver {
    pub fn new(registry: Arc<ConfigRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ConfigRegistry {
        &self.registry
    }

    /// Loads and merges the named definitions; the model side wins on
    /// conflicting scalar keys.
    pub fn resolve(&self, mode_name: &str, model_name: &str) -> Result<RunConfiguration, ConfigError> {
        let mode = self.registry.load_mode(mode_name)?;
        let model = self.registry.load_model(model_name)?;
        let merged = merge_values(&mode, &model);
        RunConfiguration::from_merged(RunIdentity::new(model_name, mode_name), merged)
    }
}

fn section(raw: &Value, name: &str) -> Result<Map<String, Value>, ConfigError> {
    match raw.get(name) {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(_) => Err(ConfigError::InvalidSection {
            section: name.to_string(),
            reason: "expected a mapping".to_string(),
        }),
    }
}

fn take_kind(params: &mut Map<String, Value>, name: &str) -> Result<Option<String>, ConfigError> {
    match params.remove(KIND_KEY) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(tag)) => Ok(Some(tag)),
        Some(_) => Err(ConfigError::InvalidSection {
            section: name.to_string(),
            reason: format!("'{}' must be a string", KIND_KEY),
        }),
    }
}

fn typed_section<T: DeserializeOwned>(params: Map<String, Value>, name: &str) -> Result<T, ConfigError> {
    serde_json::from_value(Value::Object(params)).map_err(|e| ConfigError::InvalidSection {
        section: name.to_string(),
        reason: e.to_string(),
    })
}
