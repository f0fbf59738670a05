//! swe-matrix: run SWE-bench problem instances across a matrix of models and
//! augmentation modes, and aggregate the results.
//!
//! - [`config`]: model and mode definitions merged into run configurations
//! - [`instance`]: problem instances, their sources and selection
//! - [`environment`] and [`agent`]: the collaborators of one attempt
//! - [`runner`]: supervisor, scheduler with resume, matrix driver
//! - [`store`]: the on-disk layout of runs
//! - [`analysis`]: metrics, mode comparison, tool usage and reports

pub mod agent;
pub mod analysis;
pub mod cli;
pub mod config;
pub mod environment;
pub mod error;
pub mod identity;
pub mod instance;
pub mod runner;
pub mod store;

pub use error::{ConfigError, InstanceError, RunError, StoreError};
pub use identity::{ModeSet, RunIdentity};
