//! Text renderings of analysis results.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::compare::ModeDelta;
use super::metrics::RunMetrics;
use super::usage::ToolUsage;
use crate::runner::{InstanceResult, RunTotals};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Markdown,
    Csv,
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Markdown => write!(f, "markdown"),
            OutputFormat::Csv => write!(f, "csv"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

const CSV_HEADER: &[&str] = &[
    "run_id",
    "model",
    "mode",
    "n_instances",
    "n_with_patch",
    "patch_rate",
    "total_cost",
    "avg_cost",
    "total_api_calls",
    "avg_api_calls",
    "total_tool_calls",
    "total_augment_hits",
    "augment_hit_rate",
    "resolved",
    "resolve_rate",
];

fn percent(rate: f64) -> String {
    format!("{:.0}%", rate * 100.0)
}

fn signed_percent(pct: f64) -> String {
    format!("{:+.1}%", pct)
}

/// Aligns rows under headers. The first column is left-aligned, the rest
/// right-aligned.
fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let line = |cells: Vec<&str>| -> String {
        cells
            .iter()
            .zip(&widths)
            .enumerate()
            .map(|(i, (cell, width))| {
                if i == 0 {
                    format!("{:<width$}", cell, width = *width)
                } else {
                    format!("{:>width$}", cell, width = *width)
                }
            })
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let total_width = widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1);
    let mut out = String::new();
    out.push_str(&line(headers.to_vec()));
    out.push('\n');
    out.push_str(&"-".repeat(total_width));
    out.push('\n');
    for row in rows {
        out.push_str(&line(row.iter().map(String::as_str).collect()));
        out.push('\n');
    }
    out
}

fn render_markdown(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut out = format!("| {} |\n", headers.join(" | "));
    out.push_str(&format!(
        "|{}|\n",
        headers.iter().map(|_| "---").collect::<Vec<_>>().join("|")
    ));
    for row in rows {
        out.push_str(&format!("| {} |\n", row.join(" | ")));
    }
    out
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Renders a set of run metrics.
pub fn render_metrics(metrics: &[RunMetrics], format: OutputFormat) -> Result<String, serde_json::Error> {
    let verified = metrics.iter().any(|m| m.resolved.is_some());
    let resolved = |m: &RunMetrics| {
        m.resolved
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string())
    };

    match format {
        OutputFormat::Json => {
            let by_run: BTreeMap<&str, &RunMetrics> =
                metrics.iter().map(|m| (m.run_id.as_str(), m)).collect();
            serde_json::to_string_pretty(&by_run)
        }
        OutputFormat::Csv => {
            let mut out = CSV_HEADER.join(",");
            out.push('\n');
            for m in metrics {
                let row = [
                    csv_field(&m.run_id),
                    csv_field(&m.model),
                    csv_field(&m.mode),
                    m.n_instances.to_string(),
                    m.n_with_patch.to_string(),
                    format!("{:.4}", m.patch_rate),
                    format!("{:.4}", m.total_cost),
                    format!("{:.4}", m.avg_cost),
                    m.total_api_calls.to_string(),
                    format!("{:.2}", m.avg_api_calls),
                    m.total_tool_calls.to_string(),
                    m.total_augment_hits.to_string(),
                    format!("{:.4}", m.augment_hit_rate),
                    m.resolved.map(|r| r.to_string()).unwrap_or_default(),
                    m.resolve_rate.map(|r| format!("{:.4}", r)).unwrap_or_default(),
                ];
                out.push_str(&row.join(","));
                out.push('\n');
            }
            Ok(out)
        }
        OutputFormat::Markdown => {
            let mut headers = vec!["Model", "Mode", "N", "Patch Rate", "Avg Cost", "Avg Calls", "Tool Calls"];
            if verified {
                headers.push("Resolved");
            }
            let rows: Vec<Vec<String>> = metrics
                .iter()
                .map(|m| {
                    let mut row = vec![
                        m.model.clone(),
                        m.mode.clone(),
                        m.n_instances.to_string(),
                        percent(m.patch_rate),
                        format!("${:.4}", m.avg_cost),
                        format!("{:.1}", m.avg_api_calls),
                        m.total_tool_calls.to_string(),
                    ];
                    if verified {
                        row.push(resolved(m));
                    }
                    row
                })
                .collect();
            Ok(render_markdown(&headers, &rows))
        }
        OutputFormat::Table => {
            let mut headers = vec![
                "Run", "N", "Patched", "Rate", "Cost", "Avg Cost", "Calls", "Avg Calls", "Tools",
                "Aug Hit",
            ];
            if verified {
                headers.push("Resolved");
            }
            let rows: Vec<Vec<String>> = metrics
                .iter()
                .map(|m| {
                    let mut row = vec![
                        m.run_id.clone(),
                        m.n_instances.to_string(),
                        m.n_with_patch.to_string(),
                        percent(m.patch_rate),
                        format!("${:.2}", m.total_cost),
                        format!("${:.4}", m.avg_cost),
                        m.total_api_calls.to_string(),
                        format!("{:.1}", m.avg_api_calls),
                        m.total_tool_calls.to_string(),
                        percent(m.augment_hit_rate),
                    ];
                    if verified {
                        row.push(resolved(m));
                    }
                    row
                })
                .collect();
            Ok(render_table(&headers, &rows))
        }
    }
}

/// Renders one model's modes side by side with deltas against the baseline.
pub fn render_comparison(
    model: &str,
    baseline: &str,
    ordered: &[(&str, &RunMetrics)],
    deltas: &[ModeDelta],
) -> String {
    let rows: Vec<Vec<String>> = ordered
        .iter()
        .map(|(mode, m)| {
            let delta = deltas.iter().find(|d| d.mode == *mode);
            vec![
                mode.to_string(),
                m.n_instances.to_string(),
                percent(m.patch_rate),
                format!("${:.4}", m.avg_cost),
                delta
                    .map(|d| signed_percent(d.cost_delta_pct))
                    .unwrap_or_else(|| "-".to_string()),
                format!("{:.1}", m.avg_api_calls),
                delta
                    .map(|d| signed_percent(d.calls_delta_pct))
                    .unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();

    let mut out = format!("Mode comparison for {} (baseline: {})\n\n", model, baseline);
    out.push_str(&render_table(
        &["Mode", "N", "Patch Rate", "Avg Cost", "Cost vs Base", "Avg Calls", "Calls vs Base"],
        &rows,
    ));
    out
}

/// Renders per-tool call totals, one row per run, one column per tool.
pub fn render_tool_usage(usages: &[ToolUsage]) -> String {
    let mut tools: Vec<&str> = usages
        .iter()
        .flat_map(|u| u.tool_calls.keys().map(String::as_str))
        .collect();
    tools.sort_unstable();
    tools.dedup();

    let mut headers = vec!["Run"];
    headers.extend(tools.iter().copied());
    headers.push("Total");
    headers.push("Aug Hits");

    let rows: Vec<Vec<String>> = usages
        .iter()
        .map(|u| {
            let mut row = vec![u.run_id.clone()];
            row.extend(
                tools
                    .iter()
                    .map(|t| u.tool_calls.get(*t).copied().unwrap_or(0).to_string()),
            );
            row.push(u.total_tool_calls.to_string());
            row.push(u.augmentation_hits.to_string());
            row
        })
        .collect();
    render_table(&headers, &rows)
}

/// Renders the results of one scheduling pass.
pub fn render_results(run_id: &str, results: &[InstanceResult]) -> String {
    let rows: Vec<Vec<String>> = results
        .iter()
        .map(|r| {
            vec![
                r.instance_id.clone(),
                r.exit_status.clone().unwrap_or_else(|| "-".to_string()),
                if r.submission.trim().is_empty() { "no" } else { "yes" }.to_string(),
                format!("${:.4}", r.cost),
                r.n_calls.to_string(),
                format!("{:.1}s", r.duration_secs),
            ]
        })
        .collect();

    let totals = RunTotals::from_results(results);
    let completed = results.iter().filter(|r| r.is_completed()).count();
    let mut out = format!("Run {}\n\n", run_id);
    out.push_str(&render_table(
        &["Instance", "Exit Status", "Patch", "Cost", "Calls", "Duration"],
        &rows,
    ));
    out.push_str(&format!(
        "\n{} instances, {} completed, total cost ${:.4}, {} API calls\n",
        totals.total, completed, totals.cost, totals.api_calls
    ));
    out
}

/// Renders per-configuration totals of a matrix invocation.
pub fn render_matrix(results: &BTreeMap<String, Vec<InstanceResult>>) -> String {
    let rows: Vec<Vec<String>> = results
        .iter()
        .map(|(run_id, results)| {
            let totals = RunTotals::from_results(results);
            let patched = results
                .iter()
                .filter(|r| !r.submission.trim().is_empty())
                .count();
            vec![
                run_id.clone(),
                totals.total.to_string(),
                patched.to_string(),
                format!("${:.4}", totals.cost),
                totals.api_calls.to_string(),
            ]
        })
        .collect();
    render_table(&["Run", "Instances", "Patched", "Cost", "Calls"], &rows)
}
