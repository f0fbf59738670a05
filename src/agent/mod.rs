//! Agent adapters.
//!
//! An agent works on one problem instance inside an [`Environment`] and
//! reports how it ended. Two kinds exist:
//!
//! - `command`: an external agent process driven over stdin/stdout
//! - `oracle`: applies the instance's reference patch, for harness checks

pub mod command;
pub mod oracle;
pub mod trajectory;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use command::CommandAgent;
pub use oracle::OracleAgent;
pub use trajectory::{AugmentationMetrics, Trajectory};

use crate::config::AgentSpec;
use crate::environment::{Environment, EnvironmentError};
use crate::instance::ProblemInstance;

/// Exit status reported when an agent finishes with a submission.
pub const EXIT_SUBMITTED: &str = "Submitted";

/// Supported agent kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    #[default]
    Command,
    Oracle,
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentKind::Command => write!(f, "command"),
            AgentKind::Oracle => write!(f, "oracle"),
        }
    }
}

impl std::str::FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "command" => Ok(AgentKind::Command),
            "oracle" => Ok(AgentKind::Oracle),
            other => Err(format!("Unknown agent kind: {}", other)),
        }
    }
}

/// Parameters of the `agent` section the harness itself interprets.
///
/// Everything else in the section is passed through to the agent untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Program to launch (command agent).
    pub command: Option<String>,
    pub args: Vec<String>,
    /// Wall-clock limit for the whole attempt.
    pub timeout_secs: Option<u64>,
    pub env: BTreeMap<String, String>,
    pub augmentation_mode: Option<String>,
}

impl AgentSettings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// How an agent run ended.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutcome {
    pub exit_status: String,
    /// The agent's own view of its patch, used when the diff cannot be read
    /// from the environment.
    pub submission: String,
}

/// Usage accumulated by an agent, readable after success or failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentUsage {
    pub cost: f64,
    pub n_calls: u64,
    pub metrics: Option<AugmentationMetrics>,
}

/// Error type for agent operations.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Agent not configured: {0}")]
    NotConfigured(String),

    #[error("Failed to spawn agent: {0}")]
    Spawn(String),

    #[error("Agent execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Agent timed out after {0:?}")]
    Timeout(Duration),

    #[error("Agent exited without a report")]
    MissingReport,

    #[error("Instance {0} has no reference patch")]
    NoReferencePatch(String),

    #[error("Environment error: {0}")]
    Environment(#[from] EnvironmentError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Short category name recorded as an instance's exit status.
    pub fn category(&self) -> &'static str {
        match self {
            AgentError::NotConfigured(_) => "AgentNotConfigured",
            AgentError::Spawn(_) => "AgentSpawnError",
            AgentError::ExecutionFailed(_) => "AgentFailed",
            AgentError::Timeout(_) => "AgentTimeout",
            AgentError::MissingReport => "MissingReport",
            AgentError::NoReferencePatch(_) => "NoReferencePatch",
            AgentError::Environment(e) => e.category(),
            AgentError::Io(_) => "IoError",
        }
    }
}

/// A coding agent bound to one configuration.
#[async_trait]
pub trait Agent: Send + Sync {
    fn kind(&self) -> AgentKind;

    /// Works on `instance` inside `env` until the agent stops.
    async fn run(
        &mut self,
        env: &dyn Environment,
        instance: &ProblemInstance,
    ) -> Result<AgentOutcome, AgentError>;

    fn usage(&self) -> AgentUsage;

    /// The attempt's message log, if the agent keeps one.
    fn trajectory(&self) -> Option<Trajectory>;
}

/// Builds the agent a configuration asks for.
pub fn create_agent(spec: &AgentSpec, model: &Map<String, Value>) -> Result<Box<dyn Agent>, AgentError> {
    match spec.kind {
        AgentKind::Command => {
            let command = spec.settings.command.clone().ok_or_else(|| {
                AgentError::NotConfigured("the command agent requires 'command'".to_string())
            })?;
            Ok(Box::new(
                CommandAgent::new(command)
                    .with_args(spec.settings.args.clone())
                    .with_env(spec.settings.env.clone())
                    .with_timeout(spec.settings.timeout())
                    .with_model_config(model.clone())
                    .with_agent_config(spec.params.clone()),
            ))
        }
        AgentKind::Oracle => Ok(Box::new(OracleAgent::new())),
    }
}
