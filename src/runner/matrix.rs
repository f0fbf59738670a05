//! Matrix driver: every `(model, mode)` pair over the same instances.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use tracing::{info, warn};

use super::result::{InstanceResult, MatrixSummary, RunTotals};
use super::scheduler::{RunOptions, RunScheduler};
use crate::error::RunError;
use crate::identity::RunIdentity;
use crate::instance::ProblemInstance;

/// What a matrix invocation covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixPlan {
    pub models: Vec<String>,
    pub modes: Vec<String>,
    /// Dataset label recorded in the matrix summary.
    pub subset: String,
}

impl MatrixPlan {
    /// Repeated model or mode names are dropped, keeping the first occurrence.
    pub fn new(models: Vec<String>, modes: Vec<String>, subset: impl Into<String>) -> Self {
        Self {
            models: dedup_names("model", models),
            modes: dedup_names("mode", modes),
            subset: subset.into(),
        }
    }

    /// Configurations in model-major order.
    pub fn identities(&self) -> Vec<RunIdentity> {
        self.models
            .iter()
            .flat_map(|model| {
                self.modes
                    .iter()
                    .map(move |mode| RunIdentity::new(model.as_str(), mode.as_str()))
            })
            .collect()
    }
}

fn dedup_names(kind: &str, names: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    names
        .into_iter()
        .filter(|name| {
            let first = seen.insert(name.clone());
            if !first {
                warn!(kind, name = %name, "Ignoring repeated matrix entry");
            }
            first
        })
        .collect()
}

/// Runs every configuration of `plan` one after another, then writes the
/// matrix summary.
///
/// A configuration error stops the matrix; configurations that already ran
/// keep their persisted results.
pub async fn run_matrix(
    scheduler: &RunScheduler,
    plan: &MatrixPlan,
    instances: &[ProblemInstance],
    options: RunOptions,
) -> Result<BTreeMap<String, Vec<InstanceResult>>, RunError> {
    let identities = plan.identities();
    info!(
        models = plan.models.len(),
        modes = plan.modes.len(),
        configs = identities.len(),
        instances = instances.len(),
        total_runs = identities.len() * instances.len(),
        "Starting matrix"
    );

    let mut all_results = BTreeMap::new();
    for (index, identity) in identities.iter().enumerate() {
        info!(
            run_id = %identity,
            config = index + 1,
            of = identities.len(),
            "Running configuration"
        );
        let results = scheduler
            .run_configuration(&identity.model, &identity.mode, instances, options)
            .await?;
        all_results.insert(identity.token(), results);
    }

    let summary = MatrixSummary {
        timestamp: Utc::now(),
        models: plan.models.clone(),
        modes: plan.modes.clone(),
        subset: plan.subset.clone(),
        n_instances: instances.len(),
        runs: all_results
            .iter()
            .map(|(run_id, results)| (run_id.clone(), RunTotals::from_results(results)))
            .collect(),
    };
    let path = scheduler.store().write_matrix_summary(&summary).await?;
    info!(path = %path.display(), "Matrix summary written");

    Ok(all_results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identities_are_model_major() {
        let plan = MatrixPlan::new(
            vec!["a".to_string(), "b".to_string()],
            vec!["baseline".to_string(), "mcp".to_string()],
            "lite",
        );
        let tokens: Vec<_> = plan.identities().iter().map(|i| i.token()).collect();
        assert_eq!(tokens, vec!["a_baseline", "a_mcp", "b_baseline", "b_mcp"]);
    }

    #[test]
    fn test_repeated_names_run_once() {
        let plan = MatrixPlan::new(
            vec!["b".to_string(), "a".to_string(), "b".to_string()],
            vec!["mcp".to_string(), "mcp".to_string()],
            "lite",
        );
        assert_eq!(plan.models, vec!["b", "a"]);
        assert_eq!(plan.modes, vec!["mcp"]);
        let tokens: Vec<_> = plan.identities().iter().map(|i| i.token()).collect();
        assert_eq!(tokens, vec!["b_mcp", "a_mcp"]);
    }
}
