//! Oracle agent: submits the instance's reference patch.
//!
//! Used to check that environments, patch extraction and scoring work end to
//! end without spending model calls.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::{Agent, AgentError, AgentKind, AgentOutcome, AgentUsage, Trajectory, EXIT_SUBMITTED};
use crate::environment::{shell_quote, Environment};
use crate::instance::ProblemInstance;

const PATCH_DELIMITER: &str = "SWE_MATRIX_PATCH_EOF";

#[derive(Debug, Default)]
pub struct OracleAgent {
    trajectory: Option<Trajectory>,
}

impl OracleAgent {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Agent for OracleAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Oracle
    }

    async fn run(
        &mut self,
        env: &dyn Environment,
        instance: &ProblemInstance,
    ) -> Result<AgentOutcome, AgentError> {
        let patch = instance
            .patch
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| AgentError::NoReferencePatch(instance.instance_id.clone()))?;

        let command = apply_command(env.cwd(), patch);
        let result = env.execute(&command).await?;
        debug!(instance_id = %instance.instance_id, exit_code = result.exit_code, "Applied reference patch");

        self.trajectory = Some(Trajectory::new(
            instance.instance_id.clone(),
            vec![
                json!({"role": "system", "content": "apply reference patch"}),
                json!({"role": "tool", "content": result.output, "exit_code": result.exit_code}),
            ],
        ));

        if !result.is_success() {
            return Err(AgentError::ExecutionFailed(format!(
                "git apply failed: {}",
                result.output.trim()
            )));
        }

        Ok(AgentOutcome {
            exit_status: EXIT_SUBMITTED.to_string(),
            submission: patch.to_string(),
        })
    }

    fn usage(&self) -> AgentUsage {
        AgentUsage::default()
    }

    fn trajectory(&self) -> Option<Trajectory> {
        self.trajectory.clone()
    }
}

fn apply_command(cwd: &str, patch: &str) -> String {
    let body = if patch.ends_with('\n') {
        patch.to_string()
    } else {
        format!("{}\n", patch)
    };
    format!(
        "cd {} && git apply -v - <<'{delim}'\n{}{delim}\n",
        shell_quote(cwd),
        body,
        delim = PATCH_DELIMITER
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{EnvironmentSettings, LocalEnvironment};
    use tempfile::TempDir;

    const PATCH: &str = "diff --git a/hello.txt b/hello.txt\n--- a/hello.txt\n+++ b/hello.txt\n@@ -1 +1 @@\n-hello\n+hello world\n";

    fn git_repo() -> TempDir {
        git_repo_named("oracle")
    }

    fn git_repo_named(prefix: &str) -> TempDir {
        let dir = tempfile::Builder::new().prefix(prefix).tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hello\n").unwrap();
        std::process::Command::new("git")
            .args(["init", "-q"])
            .current_dir(dir.path())
            .status()
            .unwrap();
        dir
    }

    fn local_env(dir: &TempDir) -> LocalEnvironment {
        LocalEnvironment::new(EnvironmentSettings {
            cwd: dir.path().to_string_lossy().to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_apply_command_uses_heredoc() {
        let cmd = apply_command("/testbed", "diff");
        assert!(cmd.starts_with("cd '/testbed' && git apply -v - <<'SWE_MATRIX_PATCH_EOF'\n"));
        assert!(cmd.ends_with("diff\nSWE_MATRIX_PATCH_EOF\n"));
    }

    #[tokio::test]
    async fn test_applies_reference_patch() {
        let dir = git_repo();
        let env = local_env(&dir);
        let instance = ProblemInstance::new("a__b-1", "").with_patch(PATCH);

        let mut agent = OracleAgent::new();
        let outcome = agent.run(&env, &instance).await.unwrap();
        assert_eq!(outcome.exit_status, EXIT_SUBMITTED);
        assert_eq!(outcome.submission, PATCH);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("hello.txt")).unwrap(),
            "hello world\n"
        );
        assert_eq!(agent.usage(), AgentUsage::default());
        assert_eq!(agent.trajectory().unwrap().messages.len(), 2);
    }

    #[tokio::test]
    async fn test_applies_in_directory_with_spaces() {
        let dir = git_repo_named("my repo's ");
        let env = local_env(&dir);
        let instance = ProblemInstance::new("a__b-1", "").with_patch(PATCH);

        let mut agent = OracleAgent::new();
        agent.run(&env, &instance).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("hello.txt")).unwrap(),
            "hello world\n"
        );
    }

    #[tokio::test]
    async fn test_missing_patch_is_an_error() {
        let dir = git_repo();
        let env = local_env(&dir);
        let mut agent = OracleAgent::new();

        let err = agent
            .run(&env, &ProblemInstance::new("a__b-1", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NoReferencePatch(_)));
    }
}
