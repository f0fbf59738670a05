//! End-to-end scheduling tests with in-process collaborators.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use swe_matrix::agent::{
    Agent, AgentError, AgentKind, AgentOutcome, AgentUsage, AugmentationMetrics, Trajectory,
};
use swe_matrix::analysis::{compute_metrics, tool_usage, MetricsSource};
use swe_matrix::config::{ConfigRegistry, ConfigResolver, RunConfiguration};
use swe_matrix::environment::{CommandOutput, Environment, EnvironmentError, EnvironmentKind};
use swe_matrix::error::{ConfigError, RunError};
use swe_matrix::instance::ProblemInstance;
use swe_matrix::runner::{
    run_matrix, CollaboratorFactory, InstanceStatus, MatrixPlan, MatrixSummary, RunOptions, RunScheduler,
    PANIC_CATEGORY,
};
use swe_matrix::store::{load_run_artifacts, RunArtifacts, ResultStore};

struct MockEnvironment {
    instance_id: String,
}

#[async_trait]
impl Environment for MockEnvironment {
    fn kind(&self) -> EnvironmentKind {
        EnvironmentKind::Local
    }

    fn handle(&self) -> String {
        format!("mock-{}", self.instance_id)
    }

    fn cwd(&self) -> &str {
        "/testbed"
    }

    async fn execute(&self, command: &str) -> Result<CommandOutput, EnvironmentError> {
        if command.contains("git diff") {
            return Ok(CommandOutput {
                output: format!("diff --git a/f b/f\n+{}\n", self.instance_id),
                exit_code: 0,
            });
        }
        Ok(CommandOutput {
            output: String::new(),
            exit_code: 0,
        })
    }

    async fn close(&self) -> Result<(), EnvironmentError> {
        if self.instance_id.starts_with("teardown") {
            return Err(EnvironmentError::Container("remove failed".to_string()));
        }
        Ok(())
    }
}

/// Agent runs currently in flight, the peak, and the order runs started in.
#[derive(Default)]
struct Tracker {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    started: Mutex<Vec<String>>,
}

impl Tracker {
    fn enter(self: &Arc<Self>, instance_id: &str) -> InFlight {
        self.started.lock().unwrap().push(instance_id.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(self.clone())
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

struct InFlight(Arc<Tracker>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Succeeds unless the instance id says otherwise: `fail*` returns an error,
/// `panic*` panics inside the run, `lost*` panics when asked for usage.
#[derive(Default)]
struct MockAgent {
    instance_id: String,
    tracker: Arc<Tracker>,
    usage: AgentUsage,
    trajectory: Option<Trajectory>,
}

#[async_trait]
impl Agent for MockAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Command
    }

    async fn run(
        &mut self,
        _env: &dyn Environment,
        instance: &ProblemInstance,
    ) -> Result<AgentOutcome, AgentError> {
        self.instance_id = instance.instance_id.clone();
        let _slot = self.tracker.enter(&instance.instance_id);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.usage = AgentUsage {
            cost: 0.1,
            n_calls: 2,
            metrics: Some(AugmentationMetrics {
                total_tool_calls: 3,
                augmentation_hits: 1,
                augmentation_calls: 2,
                tool_calls: BTreeMap::from([("query".to_string(), 3)]),
            }),
        };
        self.trajectory = Some(Trajectory::new(
            instance.instance_id.clone(),
            vec![json!({"role": "user", "content": instance.problem_statement})],
        ));

        if instance.instance_id.starts_with("fail") {
            return Err(AgentError::ExecutionFailed("model refused".to_string()));
        }
        if instance.instance_id.starts_with("panic") {
            panic!("agent blew up");
        }
        Ok(AgentOutcome {
            exit_status: "Submitted".to_string(),
            submission: String::new(),
        })
    }

    fn usage(&self) -> AgentUsage {
        if self.instance_id.starts_with("lost") {
            panic!("usage unavailable");
        }
        self.usage.clone()
    }

    fn trajectory(&self) -> Option<Trajectory> {
        self.trajectory.clone()
    }
}

#[derive(Default)]
struct MockFactory {
    attempts: AtomicUsize,
    tracker: Arc<Tracker>,
}

impl MockFactory {
    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CollaboratorFactory for MockFactory {
    async fn environment(
        &self,
        _config: &RunConfiguration,
        instance: &ProblemInstance,
    ) -> Result<Box<dyn Environment>, EnvironmentError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if instance.instance_id.starts_with("nodocker") {
            return Err(EnvironmentError::DaemonUnavailable("connection refused".to_string()));
        }
        Ok(Box::new(MockEnvironment {
            instance_id: instance.instance_id.clone(),
        }))
    }

    fn agent(&self, _config: &RunConfiguration) -> Result<Box<dyn Agent>, AgentError> {
        Ok(Box::new(MockAgent {
            tracker: self.tracker.clone(),
            ..Default::default()
        }))
    }
}

fn resolver() -> ConfigResolver {
    let mode = |name: &str| {
        (
            name.to_string(),
            json!({
                "environment": {"kind": "local"},
                "agent": {"kind": "command", "command": "true", "augmentation_mode": name},
            }),
        )
    };
    let registry = ConfigRegistry::from_definitions(
        vec![("claude".to_string(), json!({"model": {"model_name": "claude-x"}}))],
        vec![mode("baseline"), mode("mcp")],
    );
    ConfigResolver::new(Arc::new(registry))
}

fn setup() -> (TempDir, Arc<MockFactory>, RunScheduler) {
    let dir = TempDir::new().unwrap();
    let factory = Arc::new(MockFactory::default());
    let scheduler = RunScheduler::with_factory(resolver(), ResultStore::new(dir.path()), factory.clone());
    (dir, factory, scheduler)
}

fn instances(ids: &[&str]) -> Vec<ProblemInstance> {
    ids.iter()
        .map(|id| ProblemInstance::new(*id, format!("fix {}", id)))
        .collect()
}

#[tokio::test]
async fn test_failing_instance_still_recorded() {
    let (dir, _factory, scheduler) = setup();
    let problems = instances(&["a-1", "a-2", "fail-3", "a-4", "a-5"]);

    let results = scheduler
        .run_configuration("claude", "baseline", &problems, RunOptions::default())
        .await
        .unwrap();

    assert_eq!(results.len(), 5);
    assert_eq!(results.iter().filter(|r| r.is_completed()).count(), 4);

    let failed = results.iter().find(|r| r.instance_id == "fail-3").unwrap();
    assert_eq!(failed.status, InstanceStatus::Error);
    assert_eq!(failed.exit_status.as_deref(), Some("AgentFailed"));
    assert_eq!(failed.submission, "");
    // usage accumulated before the failure is kept
    assert_eq!(failed.n_calls, 2);

    let ok = results.iter().find(|r| r.instance_id == "a-2").unwrap();
    assert_eq!(ok.exit_status.as_deref(), Some("Submitted"));
    assert_eq!(ok.submission, "diff --git a/f b/f\n+a-2\n");

    let store = ResultStore::new(dir.path());
    let preds = store.load_predictions("claude_baseline").await.unwrap();
    assert_eq!(preds.len(), 5);
    assert_eq!(preds["fail-3"].model_patch, "");
    assert_eq!(preds["a-1"].model_name_or_path, "claude_baseline");
    assert!(store.trajectory_path("claude_baseline", "fail-3").is_file());

    let summary: serde_json::Value =
        serde_json::from_slice(&std::fs::read(store.summary_path("claude_baseline")).unwrap()).unwrap();
    assert_eq!(summary["total_instances"], 5);
    assert_eq!(summary["completed"], 4);
    assert_eq!(summary["total_api_calls"], 10);
}

#[tokio::test]
async fn test_resume_skips_recorded_instances() {
    let (dir, factory, scheduler) = setup();
    let problems = instances(&["a-1", "fail-2", "a-3"]);

    scheduler
        .run_configuration("claude", "baseline", &problems[..2], RunOptions::default())
        .await
        .unwrap();
    assert_eq!(factory.attempts(), 2);

    // Failed instances count as done too.
    let results = scheduler
        .run_configuration("claude", "baseline", &problems, RunOptions::default())
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].instance_id, "a-3");
    assert_eq!(factory.attempts(), 3);

    let store = ResultStore::new(dir.path());
    let summary_path = store.summary_path("claude_baseline");
    let before = std::fs::read(&summary_path).unwrap();
    let preds_before = store.load_predictions("claude_baseline").await.unwrap();
    assert_eq!(preds_before.len(), 3);

    let results = scheduler
        .run_configuration("claude", "baseline", &problems, RunOptions::default())
        .await
        .unwrap();
    assert!(results.is_empty());
    assert_eq!(factory.attempts(), 3);
    assert_eq!(std::fs::read(&summary_path).unwrap(), before);
    assert_eq!(store.load_predictions("claude_baseline").await.unwrap(), preds_before);

    let results = scheduler
        .run_configuration("claude", "baseline", &problems, RunOptions::default().with_redo(true))
        .await
        .unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(factory.attempts(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_workers_lose_no_predictions() {
    let (dir, factory, scheduler) = setup();
    let ids: Vec<String> = (0..50)
        .map(|i| if i % 10 == 3 { format!("fail-{}", i) } else { format!("inst-{}", i) })
        .collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let problems = instances(&id_refs);

    let results = scheduler
        .run_configuration("claude", "mcp", &problems, RunOptions::default().with_workers(8))
        .await
        .unwrap();
    assert_eq!(results.len(), 50);
    assert_eq!(factory.attempts(), 50);
    assert_eq!(results.iter().filter(|r| !r.is_completed()).count(), 5);

    let preds = ResultStore::new(dir.path())
        .load_predictions("claude_mcp")
        .await
        .unwrap();
    assert_eq!(preds.len(), 50);
    for id in &ids {
        assert!(preds.contains_key(id), "missing prediction for {}", id);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_limit_bounds_agents_in_flight() {
    let (_dir, factory, scheduler) = setup();
    let ids: Vec<String> = (0..30).map(|i| format!("inst-{}", i)).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();

    let results = scheduler
        .run_configuration("claude", "mcp", &instances(&id_refs), RunOptions::default().with_workers(3))
        .await
        .unwrap();
    assert_eq!(results.len(), 30);

    let max = factory.tracker.max_in_flight();
    assert!(max <= 3, "{} agents ran at once with 3 workers", max);
    assert!(max >= 2, "workers never overlapped");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_worker_runs_in_input_order() {
    let ids: Vec<String> = (0..12).map(|i| format!("inst-{}", (i * 7) % 12)).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();

    for workers in [0, 1] {
        let (_dir, factory, scheduler) = setup();
        let results = scheduler
            .run_configuration(
                "claude",
                "baseline",
                &instances(&id_refs),
                RunOptions::default().with_workers(workers),
            )
            .await
            .unwrap();

        assert_eq!(factory.tracker.started(), ids);
        assert_eq!(factory.tracker.max_in_flight(), 1);
        let order: Vec<_> = results.iter().map(|r| r.instance_id.clone()).collect();
        assert_eq!(order, ids);
    }
}

#[tokio::test]
async fn test_lost_worker_is_recorded_as_failure() {
    for (mode, workers) in [("baseline", 1), ("mcp", 3)] {
        let (dir, _factory, scheduler) = setup();
        let problems = instances(&["a-1", "lost-2", "a-3"]);

        let results = scheduler
            .run_configuration("claude", mode, &problems, RunOptions::default().with_workers(workers))
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results.iter().filter(|r| r.is_completed()).count(), 2);

        let lost = results.iter().find(|r| r.instance_id == "lost-2").unwrap();
        assert_eq!(lost.status, InstanceStatus::Error);
        assert_eq!(lost.exit_status.as_deref(), Some(PANIC_CATEGORY));
        let failure = lost.failure.as_ref().unwrap();
        assert_eq!(failure.message, "Worker task died");
        assert!(failure.causes.iter().any(|c| c.contains("panicked")));

        let run_id = format!("claude_{}", mode);
        let store = ResultStore::new(dir.path());
        let preds = store.load_predictions(&run_id).await.unwrap();
        assert_eq!(preds.len(), 3);
        assert_eq!(preds["lost-2"].model_patch, "");
        assert!(store.summary_path(&run_id).is_file());
    }
}

#[tokio::test]
async fn test_unknown_model_fails_before_any_work() {
    let (dir, factory, scheduler) = setup();
    let err = scheduler
        .run_configuration("nope", "baseline", &instances(&["a-1"]), RunOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::Config(ConfigError::NotFound { .. })));
    assert_eq!(factory.attempts(), 0);
    assert!(!dir.path().join("nope_baseline").exists());
}

#[tokio::test]
async fn test_panic_and_environment_failures_become_results() {
    let (dir, _factory, scheduler) = setup();
    let problems = instances(&["panic-1", "nodocker-2", "teardown-3"]);

    let results = scheduler
        .run_configuration("claude", "baseline", &problems, RunOptions::default().with_workers(2))
        .await
        .unwrap();
    assert_eq!(results.len(), 3);

    let by_id = |id: &str| results.iter().find(|r| r.instance_id == id).unwrap();

    let panicked = by_id("panic-1");
    assert_eq!(panicked.exit_status.as_deref(), Some(PANIC_CATEGORY));
    assert!(panicked.failure.as_ref().unwrap().message.contains("agent blew up"));

    let no_env = by_id("nodocker-2");
    assert_eq!(no_env.exit_status.as_deref(), Some("DaemonUnavailable"));
    assert_eq!(no_env.cost, 0.0);

    let degraded = by_id("teardown-3");
    assert!(degraded.is_completed());
    assert_eq!(degraded.degraded.len(), 1);
    assert_eq!(degraded.degraded[0].category, "TeardownError");

    let preds = ResultStore::new(dir.path())
        .load_predictions("claude_baseline")
        .await
        .unwrap();
    assert_eq!(preds.len(), 3);
}

#[tokio::test]
async fn test_matrix_writes_summary_and_metrics() {
    let (dir, _factory, scheduler) = setup();
    let plan = MatrixPlan::new(
        vec!["claude".to_string()],
        vec!["baseline".to_string(), "mcp".to_string()],
        "lite",
    );
    let problems = instances(&["a-1", "a-2", "fail-3", "a-4"]);

    let results = run_matrix(&scheduler, &plan, &problems, RunOptions::default())
        .await
        .unwrap();
    assert_eq!(
        results.keys().cloned().collect::<Vec<_>>(),
        vec!["claude_baseline", "claude_mcp"]
    );

    let store = ResultStore::new(dir.path());
    let summary: MatrixSummary =
        serde_json::from_slice(&std::fs::read(store.matrix_summary_path()).unwrap()).unwrap();
    assert_eq!(summary.n_instances, 4);
    assert_eq!(summary.subset, "lite");
    assert_eq!(summary.runs["claude_mcp"].total, 4);
    assert_eq!(summary.runs["claude_mcp"].api_calls, 8);

    let runs = load_run_artifacts(dir.path()).await;
    assert_eq!(runs.len(), 2);
    let mcp: &RunArtifacts = runs.iter().find(|r| r.run_id == "claude_mcp").unwrap();
    assert_eq!(mcp.trajectories.len(), 4);

    let metrics = compute_metrics(mcp);
    assert_eq!(metrics.model, "claude");
    assert_eq!(metrics.mode, "mcp");
    assert_eq!(metrics.source, MetricsSource::Trajectories);
    assert_eq!(metrics.n_instances, 4);
    assert_eq!(metrics.n_with_patch, 3);
    assert!((metrics.total_cost - 0.4).abs() < 1e-9);
    assert_eq!(metrics.avg_api_calls, 2.0);
    assert_eq!(metrics.augment_hit_rate, 0.5);

    assert_eq!(tool_usage(mcp).tool_calls["query"], 12);
}
