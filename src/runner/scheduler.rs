//! Run scheduler: one configuration over a set of instances.
//!
//! A pass resolves the configuration once, drops instances already in the
//! predictions map (unless asked to redo them), dispatches the rest to the
//! supervisor and writes the run summary when everything has finished.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tracing::{error, info};

use super::progress::{ProgressCounters, ProgressMonitor, DEFAULT_PROGRESS_INTERVAL};
use super::result::{ErrorKind, FailureRecord, InstanceResult, RunSummary};
use super::supervisor::{CollaboratorFactory, DefaultFactory, ExecutionSupervisor, PANIC_CATEGORY};
use crate::config::{ConfigResolver, RunConfiguration};
use crate::error::RunError;
use crate::instance::ProblemInstance;
use crate::store::ResultStore;

/// Options of one scheduling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Concurrent supervisor invocations; `0` and `1` both mean sequential.
    pub workers: usize,
    /// Re-run instances that already have a prediction.
    pub redo: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            redo: false,
        }
    }
}

impl RunOptions {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_redo(mut self, redo: bool) -> Self {
        self.redo = redo;
        self
    }
}

pub struct RunScheduler {
    resolver: ConfigResolver,
    supervisor: Arc<ExecutionSupervisor>,
    progress_interval: Duration,
}

impl RunScheduler {
    /// Creates a scheduler building collaborators from configuration sections.
    pub fn new(resolver: ConfigResolver, store: ResultStore) -> Self {
        Self::with_factory(resolver, store, Arc::new(DefaultFactory))
    }

    pub fn with_factory(
        resolver: ConfigResolver,
        store: ResultStore,
        factory: Arc<dyn CollaboratorFactory>,
    ) -> Self {
        Self {
            resolver,
            supervisor: Arc::new(ExecutionSupervisor::new(factory, store)),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn resolver(&self) -> &ConfigResolver {
        &self.resolver
    }

    pub fn store(&self) -> &ResultStore {
        self.supervisor.store()
    }

    /// Runs `instances` under the `(model, mode)` configuration.
    ///
    /// Only configuration and resume-time store errors are returned; every
    /// per-instance failure is inside the results. With nothing left to do
    /// the pass returns an empty list and writes nothing.
    pub async fn run_configuration(
        &self,
        model: &str,
        mode: &str,
        instances: &[ProblemInstance],
        options: RunOptions,
    ) -> Result<Vec<InstanceResult>, RunError> {
        let config = Arc::new(self.resolver.resolve(mode, model)?);
        let run_id = config.run_id();

        let pending: Vec<ProblemInstance> = if options.redo {
            instances.to_vec()
        } else {
            let done = self.store().completed_instances(&run_id).await?;
            let pending: Vec<_> = instances
                .iter()
                .filter(|instance| !done.contains(&instance.instance_id))
                .cloned()
                .collect();
            if pending.len() < instances.len() {
                info!(
                    run_id = %run_id,
                    skipped = instances.len() - pending.len(),
                    "Skipping instances with existing predictions"
                );
            }
            pending
        };

        if pending.is_empty() {
            info!(run_id = %run_id, "No instances to run");
            return Ok(Vec::new());
        }

        info!(
            run_id = %run_id,
            instances = pending.len(),
            workers = options.workers.max(1),
            "Starting run"
        );

        let counters = ProgressCounters::new();
        let monitor = ProgressMonitor::start(
            run_id.clone(),
            counters.clone(),
            pending.len(),
            self.progress_interval,
        );

        let results = if options.workers <= 1 {
            self.run_sequential(&config, pending, &counters).await
        } else {
            self.run_parallel(&config, pending, options.workers, &counters)
                .await
        };

        monitor.stop().await;

        let summary = RunSummary::new(&config, results.clone());
        let path = self.store().write_summary(&summary).await?;

        info!(
            run_id = %run_id,
            total = summary.total_instances,
            completed = summary.completed,
            total_cost = summary.total_cost,
            total_api_calls = summary.total_api_calls,
            summary = %path.display(),
            "Run finished"
        );

        Ok(results)
    }

    /// Runs one supervisor invocation on its own task, so a panic that
    /// escapes the supervisor only loses that instance.
    fn spawn_execute(
        &self,
        config: &Arc<RunConfiguration>,
        instance: ProblemInstance,
        semaphore: Option<Arc<Semaphore>>,
    ) -> tokio::task::JoinHandle<InstanceResult> {
        let supervisor = self.supervisor.clone();
        let config = config.clone();
        tokio::spawn(async move {
            let _permit = match semaphore {
                Some(sem) => sem.acquire_owned().await.ok(),
                None => None,
            };
            supervisor.execute(&instance, &config).await
        })
    }

    async fn run_sequential(
        &self,
        config: &Arc<RunConfiguration>,
        pending: Vec<ProblemInstance>,
        counters: &ProgressCounters,
    ) -> Vec<InstanceResult> {
        let mut results = Vec::with_capacity(pending.len());
        for instance in pending {
            let joined = self.spawn_execute(config, instance.clone(), None).await;
            let result = match joined {
                Ok(result) => result,
                Err(e) => self.record_lost_worker(config, &instance, e).await,
            };
            counters.record(&result);
            results.push(result);
        }
        results
    }

    async fn run_parallel(
        &self,
        config: &Arc<RunConfiguration>,
        pending: Vec<ProblemInstance>,
        workers: usize,
        counters: &ProgressCounters,
    ) -> Vec<InstanceResult> {
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut running = FuturesUnordered::new();

        for instance in pending {
            let handle = self.spawn_execute(config, instance.clone(), Some(semaphore.clone()));
            running.push(async move { (instance, handle.await) });
        }

        let mut results = Vec::with_capacity(running.len());
        while let Some((instance, joined)) = running.next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => self.record_lost_worker(config, &instance, e).await,
            };
            counters.record(&result);
            results.push(result);
        }
        results
    }

    /// Turns a worker task that died outside the supervisor into an error
    /// result, and still records the instance.
    async fn record_lost_worker(
        &self,
        config: &RunConfiguration,
        instance: &ProblemInstance,
        join_error: tokio::task::JoinError,
    ) -> InstanceResult {
        let run_id = config.run_id();
        error!(run_id = %run_id, instance_id = %instance.instance_id, error = %join_error, "Worker task died");

        let mut result = InstanceResult::new(&instance.instance_id, &config.identity);
        let err = anyhow::Error::new(join_error).context("Worker task died");
        result.fail(FailureRecord::new(ErrorKind::Execution, PANIC_CATEGORY, &err));

        if let Err(e) = self
            .store()
            .record_prediction(&run_id, &instance.instance_id, "")
            .await
        {
            result.degrade(FailureRecord::new(
                ErrorKind::SideChannel,
                "PredictionWriteError",
                &e.into(),
            ));
        }
        result
    }
}
