//! Command-line interface for swe-matrix.
//!
//! Provides the run, matrix and debug commands, the configuration listing,
//! and the analysis reports over persisted runs.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
