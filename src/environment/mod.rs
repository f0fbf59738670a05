//! Execution environments an agent works in.
//!
//! An environment is a place where shell commands run against the checked-out
//! repository of one problem instance. Two kinds exist:
//!
//! - `docker`: a throwaway container started from the instance image
//! - `local`: `bash -c` on the host, inside a working directory
//!
//! The kind is selected by the `environment.kind` tag of a run configuration;
//! the remaining keys of that section deserialize into [`EnvironmentSettings`].

pub mod docker;
pub mod local;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use docker::DockerEnvironment;
pub use local::LocalEnvironment;

use crate::config::EnvironmentSpec;

/// Working directory used when the configuration does not name one.
pub const DEFAULT_CWD: &str = "/testbed";

/// Per-command timeout used when the configuration does not name one.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;

/// Lifetime of the idle process keeping a docker environment alive.
pub const DEFAULT_CONTAINER_LIFETIME_SECS: u64 = 7200;

/// Supported environment kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentKind {
    #[default]
    Docker,
    Local,
}

impl std::fmt::Display for EnvironmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvironmentKind::Docker => write!(f, "docker"),
            EnvironmentKind::Local => write!(f, "local"),
        }
    }
}

impl std::str::FromStr for EnvironmentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(EnvironmentKind::Docker),
            "local" => Ok(EnvironmentKind::Local),
            other => Err(format!("Unknown environment kind: {}", other)),
        }
    }
}

/// Parameters of the `environment` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentSettings {
    /// Directory commands run in.
    pub cwd: String,
    /// Wall-clock limit for a single command.
    pub timeout_secs: u64,
    /// Extra environment variables for every command.
    pub env: BTreeMap<String, String>,
    /// Pull the image when it is not present locally (docker only).
    pub pull_image: bool,
    /// How long the container's idle process lives (docker only).
    pub container_lifetime_secs: u64,
    /// Docker network mode, e.g. `bridge` or `none` (docker only).
    pub network_mode: Option<String>,
    /// Memory limit in megabytes (docker only).
    pub memory_mb: Option<u64>,
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            cwd: DEFAULT_CWD.to_string(),
            timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            env: BTreeMap::new(),
            pull_image: true,
            container_lifetime_secs: DEFAULT_CONTAINER_LIFETIME_SECS,
            network_mode: None,
            memory_mb: None,
        }
    }
}

impl EnvironmentSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Environment variables in `KEY=value` form.
    pub fn env_pairs(&self) -> Vec<String> {
        self.env
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect()
    }
}

/// Quotes `value` as a single POSIX shell word.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Output of one command. Stdout and stderr are merged in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub output: String,
    pub exit_code: i64,
}

impl CommandOutput {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Error type for environment operations.
#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    #[error("Docker daemon unavailable: {0}")]
    DaemonUnavailable(String),

    #[error("Failed to pull image {image}: {reason}")]
    ImagePull { image: String, reason: String },

    #[error("Container operation failed: {0}")]
    Container(String),

    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Environment already closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EnvironmentError {
    /// Short category name recorded as an instance's exit status.
    pub fn category(&self) -> &'static str {
        match self {
            EnvironmentError::DaemonUnavailable(_) => "DaemonUnavailable",
            EnvironmentError::ImagePull { .. } => "ImagePullError",
            EnvironmentError::Container(_) => "ContainerError",
            EnvironmentError::Timeout(_) => "CommandTimeout",
            EnvironmentError::Closed => "EnvironmentClosed",
            EnvironmentError::Io(_) => "IoError",
        }
    }
}

/// A command execution environment bound to one problem instance.
#[async_trait]
pub trait Environment: Send + Sync {
    fn kind(&self) -> EnvironmentKind;

    /// Identifier external processes use to reach this environment: the
    /// container id for docker, the working directory for local.
    fn handle(&self) -> String;

    /// Directory commands run in.
    fn cwd(&self) -> &str;

    /// Runs a shell command and returns its merged output and exit code.
    async fn execute(&self, command: &str) -> Result<CommandOutput, EnvironmentError>;

    /// Releases the environment. Calling it twice is harmless.
    async fn close(&self) -> Result<(), EnvironmentError>;
}

/// Builds the environment a configuration asks for, for one instance image.
pub async fn create_environment(
    spec: &EnvironmentSpec,
    image: &str,
) -> Result<Box<dyn Environment>, EnvironmentError> {
    match spec.kind {
        EnvironmentKind::Docker => Ok(Box::new(
            DockerEnvironment::start(image, spec.settings.clone()).await?,
        )),
        EnvironmentKind::Local => Ok(Box::new(LocalEnvironment::new(spec.settings.clone()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_from_str() {
        assert_eq!("docker".parse::<EnvironmentKind>().unwrap(), EnvironmentKind::Docker);
        assert_eq!("Local".parse::<EnvironmentKind>().unwrap(), EnvironmentKind::Local);
        assert!("podman".parse::<EnvironmentKind>().is_err());
        assert_eq!(EnvironmentKind::default(), EnvironmentKind::Docker);
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/testbed"), "'/testbed'");
        assert_eq!(shell_quote("/tmp/my repo"), "'/tmp/my repo'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_settings_defaults_fill_missing_keys() {
        let settings: EnvironmentSettings =
            serde_json::from_value(json!({"timeout_secs": 120, "env": {"PAGER": "cat"}})).unwrap();
        assert_eq!(settings.cwd, DEFAULT_CWD);
        assert_eq!(settings.timeout_secs, 120);
        assert!(settings.pull_image);
        assert_eq!(settings.env_pairs(), vec!["PAGER=cat".to_string()]);
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            EnvironmentError::Timeout(Duration::from_secs(1)).category(),
            "CommandTimeout"
        );
        assert_eq!(
            EnvironmentError::ImagePull {
                image: "x".into(),
                reason: "y".into()
            }
            .category(),
            "ImagePullError"
        );
    }
}
