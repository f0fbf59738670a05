//! Background progress monitor for scheduling passes.
//!
//! Workers bump shared atomic counters as instances finish; the monitor wakes
//! periodically and logs a one-line summary so long passes can be followed
//! without reading per-instance logs.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use super::result::InstanceResult;

/// Default interval between progress lines.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(30);

/// Snapshot of pass counters at a point in time.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
    pub cost: f64,
    pub elapsed: Duration,
}

/// Shared atomic counters for one scheduling pass.
#[derive(Debug, Clone, Default)]
pub struct ProgressCounters {
    processed: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
    /// Accumulated cost in millionths of a currency unit.
    cost_micros: Arc<AtomicU64>,
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one finished instance.
    pub fn record(&self, result: &InstanceResult) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        if result.is_completed() {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        let micros = (result.cost.max(0.0) * 1_000_000.0).round() as u64;
        self.cost_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self, start: Instant) -> ProgressSnapshot {
        ProgressSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cost: self.cost_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            elapsed: start.elapsed(),
        }
    }
}

/// A background task that periodically logs pass progress.
pub struct ProgressMonitor {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressMonitor {
    /// Starts logging every `interval` for a pass of `total` instances.
    pub fn start(
        run_id: impl Into<String>,
        counters: ProgressCounters,
        total: usize,
        interval: Duration,
    ) -> Self {
        let run_id = run_id.into();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = stop_flag.clone();
        let start = Instant::now();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // skip the immediate first tick

            loop {
                tick.tick().await;
                if flag.load(Ordering::Relaxed) {
                    break;
                }

                let snap = counters.snapshot(start);
                let pct = if total > 0 {
                    (snap.processed as f64 / total as f64 * 100.0).min(100.0)
                } else {
                    0.0
                };

                tracing::info!(
                    run_id = %run_id,
                    processed = snap.processed,
                    completed = snap.completed,
                    failed = snap.failed,
                    total = total,
                    progress_pct = format!("{:.1}%", pct),
                    cost = format!("{:.4}", snap.cost),
                    elapsed_secs = snap.elapsed.as_secs(),
                    "Run progress"
                );
            }
        });

        Self {
            stop_flag,
            handle: Some(handle),
        }
    }

    /// Stops the monitor without waiting for its next tick.
    pub async fn stop(mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::RunIdentity;
    use crate::runner::result::InstanceStatus;

    #[test]
    fn test_counters_record_results() {
        let counters = ProgressCounters::new();
        let identity = RunIdentity::new("m", "baseline");

        let mut ok = InstanceResult::new("a", &identity);
        ok.status = InstanceStatus::Completed;
        ok.cost = 0.25;
        counters.record(&ok);
        counters.record(&InstanceResult::new("b", &identity));

        let snap = counters.snapshot(Instant::now());
        assert_eq!(snap.processed, 2);
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.failed, 1);
        assert!((snap.cost - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_counters_clone_shares_state() {
        let counters = ProgressCounters::new();
        let clone = counters.clone();
        clone.record(&InstanceResult::new("a", &RunIdentity::new("m", "mcp")));
        assert_eq!(counters.snapshot(Instant::now()).processed, 1);
    }

    #[tokio::test]
    async fn test_monitor_start_stop() {
        let monitor = ProgressMonitor::start(
            "m_baseline",
            ProgressCounters::new(),
            10,
            Duration::from_millis(20),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        monitor.stop().await;
    }
}
