//! Error types for swe-matrix operations.
//!
//! Defines the error types shared across subsystems:
//! - Configuration discovery, loading and resolution
//! - Instance loading and selection
//! - Result store persistence
//! - Run scheduling (the only errors a scheduling pass propagates)
//!
//! Collaborator-specific errors live next to their traits
//! (`environment::EnvironmentError`, `agent::AgentError`,
//! `analysis::verify::VerifyError`).

use std::path::PathBuf;

use thiserror::Error;

/// Which side of a run configuration a definition belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionKind {
    Model,
    Mode,
}

impl std::fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DefinitionKind::Model => write!(f, "model"),
            DefinitionKind::Mode => write!(f, "mode"),
        }
    }
}

/// Errors raised while discovering or resolving configuration definitions.
///
/// These are the only fatal errors of a scheduling pass: they abort the
/// affected configuration before any instance is dispatched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{kind} config '{name}' not found")]
    NotFound { kind: DefinitionKind, name: String },

    #[error("{kind} config '{name}' is malformed: {reason}")]
    Malformed {
        kind: DefinitionKind,
        name: String,
        reason: String,
    },

    #[error("Unknown environment kind '{0}' (expected one of: docker, local)")]
    UnknownEnvironment(String),

    #[error("Unknown agent kind '{0}' (expected one of: command, oracle)")]
    UnknownAgent(String),

    #[error("Invalid '{section}' section: {reason}")]
    InvalidSection { section: String, reason: String },

    #[error("Config directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while loading or selecting problem instances.
#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("Invalid slice spec '{0}' (expected start:stop[:step])")]
    InvalidSlice(String),

    #[error("Invalid instance filter: {0}")]
    InvalidFilter(#[from] regex::Error),

    #[error("Instance '{0}' not found")]
    NotFound(String),

    #[error("Failed to parse instances from {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the result store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to parse {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors propagated by the run scheduler and matrix driver.
///
/// Per-instance failures never surface here; they are captured into the
/// instance results.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Result store error: {0}")]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::NotFound {
            kind: DefinitionKind::Model,
            name: "claude-haiku".to_string(),
        };
        assert_eq!(err.to_string(), "model config 'claude-haiku' not found");

        let err = ConfigError::UnknownEnvironment("podman".to_string());
        assert!(err.to_string().contains("podman"));
    }

    #[test]
    fn test_run_error_from_config() {
        let err: RunError = ConfigError::NotFound {
            kind: DefinitionKind::Mode,
            name: "augment".to_string(),
        }
        .into();
        assert!(matches!(err, RunError::Config(ConfigError::NotFound { .. })));
        assert!(err.to_string().starts_with("Configuration error"));
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::io(
            "/tmp/preds.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/tmp/preds.json"));
    }
}
