//! Execution supervisor: one problem instance under one configuration.
//!
//! The supervisor never fails. Whatever happens while building collaborators
//! or running the agent ends up in the returned [`InstanceResult`], and the
//! instance is always appended to the run's predictions map.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{error, info, warn};

use super::result::{ErrorKind, FailureRecord, InstanceResult, InstanceStatus};
use crate::agent::{create_agent, Agent, AgentError, AgentOutcome};
use crate::config::RunConfiguration;
use crate::environment::{create_environment, shell_quote, Environment, EnvironmentError};
use crate::instance::ProblemInstance;
use crate::store::ResultStore;

/// Category recorded when a collaborator panics.
pub const PANIC_CATEGORY: &str = "Panic";

/// Builds the collaborators of one attempt.
#[async_trait]
pub trait CollaboratorFactory: Send + Sync {
    async fn environment(
        &self,
        config: &RunConfiguration,
        instance: &ProblemInstance,
    ) -> Result<Box<dyn Environment>, EnvironmentError>;

    fn agent(&self, config: &RunConfiguration) -> Result<Box<dyn Agent>, AgentError>;
}

/// Builds collaborators from the `environment` and `agent` sections.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFactory;

#[async_trait]
impl CollaboratorFactory for DefaultFactory {
    async fn environment(
        &self,
        config: &RunConfiguration,
        instance: &ProblemInstance,
    ) -> Result<Box<dyn Environment>, EnvironmentError> {
        create_environment(&config.environment, &instance.image_reference()).await
    }

    fn agent(&self, config: &RunConfiguration) -> Result<Box<dyn Agent>, AgentError> {
        create_agent(&config.agent, &config.model)
    }
}

/// A failure inside an attempt: category name plus the error chain.
type AttemptError = (&'static str, anyhow::Error);

pub struct ExecutionSupervisor {
    factory: Arc<dyn CollaboratorFactory>,
    store: ResultStore,
}

impl ExecutionSupervisor {
    pub fn new(factory: Arc<dyn CollaboratorFactory>, store: ResultStore) -> Self {
        Self { factory, store }
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Runs one instance to a terminal result.
    pub async fn execute(
        &self,
        instance: &ProblemInstance,
        config: &RunConfiguration,
    ) -> InstanceResult {
        let start = Instant::now();
        let run_id = config.run_id();
        let mut result = InstanceResult::new(&instance.instance_id, &config.identity);
        let mut env: Option<Box<dyn Environment>> = None;
        let mut agent: Option<Box<dyn Agent>> = None;

        info!(run_id = %run_id, instance_id = %instance.instance_id, "Starting instance");

        let attempt = AssertUnwindSafe(self.attempt(instance, config, &mut env, &mut agent, &mut result))
            .catch_unwind()
            .await;

        let failure = match attempt {
            Ok(Ok(())) => None,
            Ok(Err(failure)) => Some(failure),
            Err(payload) => Some((
                PANIC_CATEGORY,
                anyhow::anyhow!("collaborator panicked: {}", panic_message(payload.as_ref())),
            )),
        };
        if let Some((category, err)) = failure {
            error!(
                run_id = %run_id,
                instance_id = %instance.instance_id,
                category,
                error = %format!("{:#}", err),
                "Instance failed"
            );
            result.fail(FailureRecord::new(ErrorKind::Execution, category, &err));
        }

        let usage = agent.as_ref().map(|a| a.usage()).unwrap_or_default();
        result.cost = usage.cost;
        result.n_calls = usage.n_calls;
        result.metrics = usage.metrics.clone();

        if let Some(mut trajectory) = agent.as_ref().and_then(|a| a.trajectory()) {
            if trajectory.instance_id.is_empty() {
                trajectory.instance_id = instance.instance_id.clone();
            }
            trajectory.record_outcome(
                &run_id,
                result.exit_status.as_deref(),
                &result.submission,
                &usage,
            );
            if let Err(e) = self.store.write_trajectory(&run_id, &trajectory).await {
                warn!(run_id = %run_id, instance_id = %instance.instance_id, error = %e, "Failed to save trajectory");
                result.degrade(FailureRecord::new(
                    ErrorKind::SideChannel,
                    "TrajectoryWriteError",
                    &e.into(),
                ));
            }
        }

        if let Some(env) = env.take() {
            if let Err(e) = env.close().await {
                warn!(run_id = %run_id, instance_id = %instance.instance_id, error = %e, "Environment teardown failed");
                result.degrade(FailureRecord::new(
                    ErrorKind::SideChannel,
                    "TeardownError",
                    &e.into(),
                ));
            }
        }

        result.duration_secs = start.elapsed().as_secs_f64();

        if let Err(e) = self
            .store
            .record_prediction(&run_id, &instance.instance_id, &result.submission)
            .await
        {
            error!(run_id = %run_id, instance_id = %instance.instance_id, error = %e, "Failed to record prediction");
            result.degrade(FailureRecord::new(
                ErrorKind::SideChannel,
                "PredictionWriteError",
                &e.into(),
            ));
        }

        info!(
            run_id = %run_id,
            instance_id = %instance.instance_id,
            exit_status = result.exit_status.as_deref().unwrap_or("-"),
            cost = result.cost,
            duration_secs = result.duration_secs,
            "Instance finished"
        );

        result
    }

    async fn attempt(
        &self,
        instance: &ProblemInstance,
        config: &RunConfiguration,
        env_slot: &mut Option<Box<dyn Environment>>,
        agent_slot: &mut Option<Box<dyn Agent>>,
        result: &mut InstanceResult,
    ) -> Result<(), AttemptError> {
        let env = self
            .factory
            .environment(config, instance)
            .await
            .map_err(|e| (e.category(), anyhow::Error::new(e).context("Failed to start environment")))?;
        let env = env_slot.insert(env);

        let agent = self
            .factory
            .agent(config)
            .map_err(|e| (e.category(), anyhow::Error::new(e).context("Failed to build agent")))?;
        let agent = agent_slot.insert(agent);

        let outcome = agent
            .run(env.as_ref(), instance)
            .await
            .map_err(|e| (e.category(), anyhow::Error::new(e).context("Agent run failed")))?;

        result.status = InstanceStatus::Completed;
        result.exit_status = Some(outcome.exit_status.clone());
        result.submission = extract_submission(env.as_ref(), &outcome, &instance.instance_id).await;
        Ok(())
    }
}

/// Reads the patch from the environment's working tree, falling back to the
/// agent-reported submission when the diff cannot be taken.
async fn extract_submission(env: &dyn Environment, outcome: &AgentOutcome, instance_id: &str) -> String {
    let command = format!("cd {} && git diff", shell_quote(env.cwd()));
    match env.execute(&command).await {
        Ok(out) if out.is_success() => normalize_patch(&out.output),
        Ok(out) => {
            warn!(instance_id, exit_code = out.exit_code, "git diff failed, using agent submission");
            outcome.submission.clone()
        }
        Err(e) => {
            warn!(instance_id, error = %e, "Failed to extract patch, using agent submission");
            outcome.submission.clone()
        }
    }
}

/// Keeps a single trailing newline. Context lines are never touched, so a
/// hunk ending in blank context keeps its line count.
fn normalize_patch(diff: &str) -> String {
    if diff.trim().is_empty() {
        return String::new();
    }
    format!("{}\n", diff.trim_end_matches(['\n', '\r']))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
