//! Mode comparison: how each mode moves cost and call counts relative to a
//! baseline mode of the same model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::metrics::RunMetrics;
use crate::identity::DEFAULT_MODES;

/// Smallest baseline average cost used as a divisor.
pub const COST_FLOOR: f64 = 0.001;
/// Smallest baseline average call count used as a divisor.
pub const CALLS_FLOOR: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeDelta {
    pub mode: String,
    /// Percentage change of average cost against the baseline.
    pub cost_delta_pct: f64,
    /// Percentage change of average API calls against the baseline.
    pub calls_delta_pct: f64,
}

/// `(value - base) / max(base, floor) * 100`.
pub fn percent_delta(value: f64, base: f64, floor: f64) -> f64 {
    (value - base) / base.max(floor) * 100.0
}

/// Orders mode names: the default modes in their canonical order, then any
/// others alphabetically.
pub fn order_modes<'a, I>(modes: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut modes: Vec<String> = modes.into_iter().cloned().collect();
    modes.sort_by(|a, b| {
        let rank = |m: &str| DEFAULT_MODES.iter().position(|d| *d == m).unwrap_or(usize::MAX);
        rank(a).cmp(&rank(b)).then_with(|| a.cmp(b))
    });
    modes.dedup();
    modes
}

/// Deltas of every non-baseline mode against `baseline`.
///
/// Returns an empty list when the baseline mode has no metrics.
pub fn compare_modes(metrics_by_mode: &BTreeMap<String, RunMetrics>, baseline: &str) -> Vec<ModeDelta> {
    let Some(base) = metrics_by_mode.get(baseline) else {
        return Vec::new();
    };

    order_modes(metrics_by_mode.keys())
        .into_iter()
        .filter(|mode| mode != baseline)
        .filter_map(|mode| {
            let m = metrics_by_mode.get(&mode)?;
            Some(ModeDelta {
                cost_delta_pct: percent_delta(m.avg_cost, base.avg_cost, COST_FLOOR),
                calls_delta_pct: percent_delta(m.avg_api_calls, base.avg_api_calls, CALLS_FLOOR),
                mode,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(avg_cost: f64, avg_api_calls: f64) -> RunMetrics {
        RunMetrics {
            avg_cost,
            avg_api_calls,
            ..Default::default()
        }
    }

    #[test]
    fn test_deltas_against_baseline() {
        let mut by_mode = BTreeMap::new();
        by_mode.insert("baseline".to_string(), metrics(2.0, 10.0));
        by_mode.insert("mcp".to_string(), metrics(1.0, 15.0));
        by_mode.insert("full".to_string(), metrics(3.0, 10.0));

        let deltas = compare_modes(&by_mode, "baseline");
        let modes: Vec<_> = deltas.iter().map(|d| d.mode.as_str()).collect();
        assert_eq!(modes, vec!["mcp", "full"]);
        assert_eq!(deltas[0].cost_delta_pct, -50.0);
        assert_eq!(deltas[0].calls_delta_pct, 50.0);
        assert_eq!(deltas[1].cost_delta_pct, 50.0);
        assert_eq!(deltas[1].calls_delta_pct, 0.0);
    }

    #[test]
    fn test_zero_baseline_uses_floors() {
        let mut by_mode = BTreeMap::new();
        by_mode.insert("baseline".to_string(), metrics(0.0, 0.0));
        by_mode.insert("augment".to_string(), metrics(0.002, 3.0));

        let deltas = compare_modes(&by_mode, "baseline");
        assert_eq!(deltas.len(), 1);
        assert!((deltas[0].cost_delta_pct - 200.0).abs() < 1e-9);
        assert_eq!(deltas[0].calls_delta_pct, 300.0);
    }

    #[test]
    fn test_missing_baseline_is_empty() {
        let mut by_mode = BTreeMap::new();
        by_mode.insert("mcp".to_string(), metrics(1.0, 1.0));
        assert!(compare_modes(&by_mode, "baseline").is_empty());
    }

    #[test]
    fn test_order_modes_puts_defaults_first() {
        let modes = vec![
            "zeta".to_string(),
            "full".to_string(),
            "alpha".to_string(),
            "baseline".to_string(),
        ];
        assert_eq!(order_modes(&modes), vec!["baseline", "full", "alpha", "zeta"]);
    }
}
