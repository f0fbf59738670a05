//! External agent process bridge.
//!
//! The configured program runs on the host. It receives the problem statement
//! on stdin and finds its environment and configuration through variables:
//!
//! | Variable | Content |
//! |---|---|
//! | `SWE_MATRIX_INSTANCE_ID` | instance id |
//! | `SWE_MATRIX_ENVIRONMENT` | environment kind (`docker` / `local`) |
//! | `SWE_MATRIX_CONTAINER` | environment handle (container id or directory) |
//! | `SWE_MATRIX_WORKDIR` | working directory inside the environment |
//! | `SWE_MATRIX_MODEL_CONFIG` | the `model` section as JSON |
//! | `SWE_MATRIX_AGENT_CONFIG` | the `agent` section as JSON |
//!
//! The last stdout line that parses as a JSON object is the report:
//! `{exit_status, submission, cost, n_calls, metrics, messages}`.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::{
    Agent, AgentError, AgentKind, AgentOutcome, AgentUsage, AugmentationMetrics, Trajectory,
    EXIT_SUBMITTED,
};
use crate::environment::Environment;
use crate::instance::ProblemInstance;

/// Characters of stderr kept in failure messages.
const STDERR_TAIL: usize = 2000;

/// Final report printed by the agent process.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AgentReport {
    exit_status: Option<String>,
    submission: String,
    cost: f64,
    n_calls: u64,
    metrics: Option<AugmentationMetrics>,
    messages: Vec<Value>,
}

/// Agent backed by an external command.
pub struct CommandAgent {
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    timeout: Option<Duration>,
    model_config: Map<String, Value>,
    agent_config: Map<String, Value>,
    usage: AgentUsage,
    trajectory: Option<Trajectory>,
}

impl CommandAgent {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            timeout: None,
            model_config: Map::new(),
            agent_config: Map::new(),
            usage: AgentUsage::default(),
            trajectory: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_model_config(mut self, config: Map<String, Value>) -> Self {
        self.model_config = config;
        self
    }

    pub fn with_agent_config(mut self, config: Map<String, Value>) -> Self {
        self.agent_config = config;
        self
    }

    fn build_command(&self, env: &dyn Environment, instance: &ProblemInstance) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .env("SWE_MATRIX_INSTANCE_ID", &instance.instance_id)
            .env("SWE_MATRIX_ENVIRONMENT", env.kind().to_string())
            .env("SWE_MATRIX_CONTAINER", env.handle())
            .env("SWE_MATRIX_WORKDIR", env.cwd())
            .env(
                "SWE_MATRIX_MODEL_CONFIG",
                Value::Object(self.model_config.clone()).to_string(),
            )
            .env(
                "SWE_MATRIX_AGENT_CONFIG",
                Value::Object(self.agent_config.clone()).to_string(),
            )
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Agent for CommandAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Command
    }

    async fn run(
        &mut self,
        env: &dyn Environment,
        instance: &ProblemInstance,
    ) -> Result<AgentOutcome, AgentError> {
        let start = Instant::now();

        info!(
            instance_id = %instance.instance_id,
            command = %self.command,
            "Starting agent process"
        );

        let mut child = self
            .build_command(env, instance)
            .spawn()
            .map_err(|e| AgentError::Spawn(format!("{}: {}", self.command, e)))?;

        // Input is fed alongside the wait so the limit also covers a child
        // that never drains its stdin.
        let stdin = child.stdin.take();
        let problem = instance.problem_statement.as_bytes();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // The process may exit without reading its input; its report decides.
                if let Err(e) = stdin.write_all(problem).await {
                    debug!(instance_id = %instance.instance_id, error = %e, "Agent did not read the problem");
                }
                stdin.shutdown().await.ok();
            }
        };
        let exchange = async move {
            let ((), output) = tokio::join!(feed, child.wait_with_output());
            output
        };

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| AgentError::Timeout(limit))??,
            None => exchange.await?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let exit_code = output.status.code().unwrap_or(-1);
        debug!(
            instance_id = %instance.instance_id,
            exit_code,
            elapsed_secs = start.elapsed().as_secs(),
            "Agent process exited"
        );

        let report = match parse_report(&stdout) {
            Some(report) => report,
            None if output.status.success() => return Err(AgentError::MissingReport),
            None => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(AgentError::ExecutionFailed(format!(
                    "exit code {}: {}",
                    exit_code,
                    tail(&stderr, STDERR_TAIL)
                )));
            }
        };

        self.usage = AgentUsage {
            cost: report.cost,
            n_calls: report.n_calls,
            metrics: report.metrics,
        };
        self.trajectory = Some(Trajectory::new(
            instance.instance_id.clone(),
            report.messages,
        ));

        Ok(AgentOutcome {
            exit_status: report
                .exit_status
                .unwrap_or_else(|| EXIT_SUBMITTED.to_string()),
            submission: report.submission,
        })
    }

    fn usage(&self) -> AgentUsage {
        self.usage.clone()
    }

    fn trajectory(&self) -> Option<Trajectory> {
        self.trajectory.clone()
    }
}

/// Finds the last stdout line that is a JSON object.
fn parse_report(stdout: &str) -> Option<AgentReport> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str::<AgentReport>(line).ok())
}

pub(crate) fn tail(s: &str, max_chars: usize) -> String {
    let count = s.chars().count();
    if count <= max_chars {
        s.to_string()
    } else {
        s.chars().skip(count - max_chars).collect()
    }
}
