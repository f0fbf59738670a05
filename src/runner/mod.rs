//! Run orchestration.
//!
//! - [`supervisor`]: one instance under one configuration, never failing
//! - [`scheduler`]: one configuration over many instances, with resume
//! - [`matrix`]: the cartesian product of models and modes
//! - [`progress`]: periodic progress logging while a pass runs
//! - [`result`]: instance results and the summaries built from them

pub mod matrix;
pub mod progress;
pub mod result;
pub mod scheduler;
pub mod supervisor;

pub use matrix::{run_matrix, MatrixPlan};
pub use progress::{ProgressCounters, ProgressMonitor};
pub use result::{
    ErrorKind, FailureRecord, InstanceResult, InstanceStatus, MatrixSummary, RunSummary, RunTotals,
};
pub use scheduler::{RunOptions, RunScheduler};
pub use supervisor::{CollaboratorFactory, DefaultFactory, ExecutionSupervisor, PANIC_CATEGORY};
