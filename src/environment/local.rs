//! Host-local environment running `bash -c` in a working directory.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{CommandOutput, Environment, EnvironmentError, EnvironmentKind, EnvironmentSettings};

/// Runs commands directly on the host.
pub struct LocalEnvironment {
    settings: EnvironmentSettings,
}

impl LocalEnvironment {
    pub fn new(settings: EnvironmentSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Environment for LocalEnvironment {
    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::Local
    }

    fn handle(&self) -> String {
        self.settings.cwd.clone()
    }

    fn cwd(&self) -> &str {
        &self.settings.cwd
    }

    async fn execute(&self, command: &str) -> Result<CommandOutput, EnvironmentError> {
        let child = Command::new("bash")
            .arg("-c")
            .arg(format!("{} 2>&1", command))
            .current_dir(&self.settings.cwd)
            .envs(&self.settings.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let timeout = self.settings.command_timeout();
        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                output: String::from_utf8_lossy(&output.stdout).to_string(),
                exit_code: output.status.code().unwrap_or(-1) as i64,
            }),
            Ok(Err(e)) => Err(EnvironmentError::Io(e)),
            Err(_) => {
                debug!(cwd = %self.settings.cwd, "Command timed out");
                Err(EnvironmentError::Timeout(timeout))
            }
        }
    }

    async fn close(&self) -> Result<(), EnvironmentError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn environment(dir: &TempDir, timeout_secs: u64) -> LocalEnvironment {
        LocalEnvironment::new(EnvironmentSettings {
            cwd: dir.path().to_string_lossy().to_string(),
            timeout_secs,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_execute_merges_output() {
        let dir = TempDir::new().unwrap();
        let env = environment(&dir, 10);

        let out = env.execute("echo out; echo err 1>&2").await.unwrap();
        assert!(out.is_success());
        assert!(out.output.contains("out"));
        assert!(out.output.contains("err"));
    }

    #[tokio::test]
    async fn test_execute_runs_in_cwd_and_reports_exit_code() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let env = environment(&dir, 10);

        let out = env.execute("test -f marker.txt && exit 3").await.unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(env.handle(), dir.path().to_string_lossy());
    }

    #[tokio::test]
    async fn test_execute_times_out() {
        let dir = TempDir::new().unwrap();
        let env = environment(&dir, 1);

        let err = env.execute("sleep 5").await.unwrap_err();
        assert!(matches!(err, EnvironmentError::Timeout(_)));
    }
}
