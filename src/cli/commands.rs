//! CLI command definitions for swe-matrix.
//!
//! Runs SWE-bench instances under `(model, mode)` configurations and
//! analyzes the persisted results.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{debug, info, warn};

use crate::analysis::{
    compare_modes, order_modes, render_comparison, render_matrix, render_metrics, render_results,
    render_tool_usage, summarize_results, tool_usage, OutputFormat, RunMetrics, Scorer, Verification,
};
use crate::config::{list_models, list_modes, ConfigRegistry, ConfigResolver};
use crate::identity::ModeSet;
use crate::instance::{
    dataset_for_subset, select_instances, FileSource, HubSource, InstanceSource, ProblemInstance,
};
use crate::runner::{run_matrix, MatrixPlan, RunOptions, RunScheduler};
use crate::store::{load_run_artifacts, ResultStore};

/// Default directory holding `models/` and `modes/` definitions.
const DEFAULT_CONFIG_DIR: &str = "./configs";

/// Default root of run directories.
const DEFAULT_OUTPUT_DIR: &str = "./results";
const DEFAULT_DEBUG_OUTPUT_DIR: &str = "./results/debug";

const DEFAULT_MODE: &str = "native_augment";
const DEFAULT_SUBSET: &str = "lite";
const DEFAULT_SPLIT: &str = "dev";
const DEFAULT_BASELINE_MODE: &str = "baseline";

/// SWE-bench model x mode matrix runner.
#[derive(Parser)]
#[command(name = "swe-matrix")]
#[command(about = "Run SWE-bench instances across models and augmentation modes")]
#[command(version)]
#[command(
    long_about = "swe-matrix runs SWE-bench problem instances under every combination of model and augmentation mode, records one prediction per instance, and aggregates cost and usage metrics per configuration.\n\nExample usage:\n  swe-matrix run -m claude-sonnet --mode baseline --slice 0:5\n  swe-matrix matrix --models claude-sonnet,gpt-4o -w 4\n  swe-matrix analyze summary ./results --format markdown"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run one (model, mode) configuration over the selected instances.
    #[command(alias = "single")]
    Run(RunArgs),

    /// Run every (model, mode) combination over the same instances.
    Matrix(MatrixArgs),

    /// Re-run a single instance, always overwriting its previous result.
    Debug(DebugArgs),

    /// List the registered model and mode definitions.
    #[command(alias = "list")]
    Configs(ConfigsArgs),

    /// Aggregate metrics over persisted runs.
    Analyze(AnalyzeArgs),
}

/// Where problem instances come from.
#[derive(clap::Args, Debug, Clone)]
pub struct SourceArgs {
    /// Dataset subset: lite, verified, full, or a dataset name.
    #[arg(long, default_value = DEFAULT_SUBSET)]
    pub subset: String,

    /// Dataset split.
    #[arg(long, default_value = DEFAULT_SPLIT)]
    pub split: String,

    /// Read instances from a local JSON or JSONL file instead of the hub.
    #[arg(long)]
    pub instances_file: Option<PathBuf>,

    /// HuggingFace API token (can also use HF_TOKEN env var).
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    pub hf_token: Option<String>,
}

/// Which of the loaded instances to run.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct SelectionArgs {
    /// Python-style slice over the filtered instances (e.g. "0:10", ":5", "::2").
    #[arg(long)]
    pub slice: Option<String>,

    /// Regular expression matched at the start of instance ids.
    #[arg(long)]
    pub filter: Option<String>,
}

/// Configuration lookup and result placement.
#[derive(clap::Args, Debug, Clone)]
pub struct ExecutionArgs {
    /// Directory with models/ and modes/ definitions.
    #[arg(long, env = "SWE_MATRIX_CONFIG_DIR", default_value = DEFAULT_CONFIG_DIR)]
    pub config_dir: PathBuf,

    /// Root directory for run outputs.
    #[arg(short = 'o', long, env = "SWE_MATRIX_OUTPUT_DIR", default_value = DEFAULT_OUTPUT_DIR)]
    pub output: PathBuf,

    /// Concurrent instances per configuration.
    #[arg(short = 'w', long, default_value = "1")]
    pub workers: usize,

    /// Re-run instances that already have a prediction.
    #[arg(long)]
    pub redo: bool,
}

/// Arguments for `swe-matrix run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Model definition name.
    #[arg(short = 'm', long)]
    pub model: String,

    /// Mode definition name.
    #[arg(long, default_value = DEFAULT_MODE)]
    pub mode: String,

    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub selection: SelectionArgs,

    #[command(flatten)]
    pub execution: ExecutionArgs,
}

/// Arguments for `swe-matrix matrix`.
#[derive(Parser, Debug)]
pub struct MatrixArgs {
    /// Comma-separated model names (default: every registered model).
    #[arg(long, value_delimiter = ',')]
    pub models: Vec<String>,

    /// Comma-separated mode names (default: every registered mode).
    #[arg(long, value_delimiter = ',')]
    pub modes: Vec<String>,

    #[command(flatten)]
    pub source: SourceArgs,

    #[command(flatten)]
    pub selection: SelectionArgs,

    #[command(flatten)]
    pub execution: ExecutionArgs,
}

/// Arguments for `swe-matrix debug`.
#[derive(Parser, Debug)]
pub struct DebugArgs {
    /// Instance id to run.
    #[arg(short = 'i', long)]
    pub instance: String,

    /// Model definition name.
    #[arg(short = 'm', long)]
    pub model: String,

    /// Mode definition name.
    #[arg(long, default_value = DEFAULT_MODE)]
    pub mode: String,

    #[command(flatten)]
    pub source: SourceArgs,

    /// Directory with models/ and modes/ definitions.
    #[arg(long, env = "SWE_MATRIX_CONFIG_DIR", default_value = DEFAULT_CONFIG_DIR)]
    pub config_dir: PathBuf,

    /// Root directory for the debug run.
    #[arg(short = 'o', long, default_value = DEFAULT_DEBUG_OUTPUT_DIR)]
    pub output: PathBuf,
}

/// Arguments for `swe-matrix configs`.
#[derive(Parser, Debug)]
pub struct ConfigsArgs {
    /// Directory with models/ and modes/ definitions.
    #[arg(long, env = "SWE_MATRIX_CONFIG_DIR", default_value = DEFAULT_CONFIG_DIR)]
    pub config_dir: PathBuf,

    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `swe-matrix analyze`.
#[derive(Parser, Debug)]
pub struct AnalyzeArgs {
    #[command(subcommand)]
    pub command: AnalyzeSubcommand,
}

#[derive(clap::Subcommand, Debug)]
pub enum AnalyzeSubcommand {
    /// Per-run metrics table.
    Summary(AnalyzeSummaryArgs),

    /// Per-model comparison of every mode against the baseline mode.
    Compare(AnalyzeCompareArgs),

    /// Per-tool call totals of augmented runs.
    Tools(AnalyzeToolsArgs),
}

/// Inputs shared by the analysis subcommands.
#[derive(clap::Args, Debug, Clone)]
pub struct ResultsArgs {
    /// Directory holding one subdirectory per run.
    #[arg(default_value = DEFAULT_OUTPUT_DIR)]
    pub results_dir: PathBuf,

    /// Config directory whose modes are used to split run names.
    #[arg(long, env = "SWE_MATRIX_CONFIG_DIR", default_value = DEFAULT_CONFIG_DIR)]
    pub config_dir: PathBuf,
}

#[derive(Parser, Debug)]
pub struct AnalyzeSummaryArgs {
    #[command(flatten)]
    pub results: ResultsArgs,

    /// Output format: table, markdown, csv, json.
    #[arg(long, default_value = "table")]
    pub format: OutputFormat,

    /// Run the SWE-bench scorer on every run's predictions.
    #[arg(long)]
    pub verify: bool,

    /// Dataset subset passed to the scorer.
    #[arg(long, default_value = DEFAULT_SUBSET)]
    pub subset: String,

    /// Python interpreter with the swebench package installed.
    #[arg(long, default_value = "python")]
    pub python: String,

    /// Scorer worker count.
    #[arg(long, default_value = "4")]
    pub scorer_workers: usize,

    /// Scorer timeout in seconds.
    #[arg(long, default_value = "600")]
    pub scorer_timeout: u64,
}

#[derive(Parser, Debug)]
pub struct AnalyzeCompareArgs {
    #[command(flatten)]
    pub results: ResultsArgs,

    /// Only compare this model.
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// Mode the others are compared against.
    #[arg(long, default_value = DEFAULT_BASELINE_MODE)]
    pub baseline: String,
}

#[derive(Parser, Debug)]
pub struct AnalyzeToolsArgs {
    #[command(flatten)]
    pub results: ResultsArgs,
}

/// Parse CLI arguments without executing.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_single_command(args).await,
        Commands::Matrix(args) => run_matrix_command(args).await,
        Commands::Debug(args) => run_debug_command(args).await,
        Commands::Configs(args) => run_configs_command(args),
        Commands::Analyze(args) => match args.command {
            AnalyzeSubcommand::Summary(args) => run_analyze_summary(args).await,
            AnalyzeSubcommand::Compare(args) => run_analyze_compare(args).await,
            AnalyzeSubcommand::Tools(args) => run_analyze_tools(args).await,
        },
    }
}

// ============================================================================
// Run commands
// ============================================================================

async fn load_instances(source: &SourceArgs) -> anyhow::Result<Vec<ProblemInstance>> {
    let loader: Box<dyn InstanceSource> = match &source.instances_file {
        Some(path) => Box::new(FileSource::new(path)),
        None => Box::new(HubSource::new(&source.subset, &source.split)?.with_token(source.hf_token.clone())),
    };
    info!(source = %loader.describe(), "Loading instances");
    let instances = loader.load().await?;
    info!(count = instances.len(), "Instances loaded");
    Ok(instances)
}

async fn load_selected(source: &SourceArgs, selection: &SelectionArgs) -> anyhow::Result<Vec<ProblemInstance>> {
    let instances = load_instances(source).await?;
    let selected = select_instances(instances, selection.filter.as_deref(), selection.slice.as_deref())?;
    if selected.is_empty() {
        warn!("No instances selected");
    } else {
        info!(selected = selected.len(), "Instances selected");
    }
    Ok(selected)
}

fn build_scheduler(config_dir: &Path, output: &Path) -> anyhow::Result<RunScheduler> {
    let registry = ConfigRegistry::discover(config_dir)
        .with_context(|| format!("Failed to load configurations from {}", config_dir.display()))?;
    let resolver = ConfigResolver::new(Arc::new(registry));
    Ok(RunScheduler::new(resolver, ResultStore::new(output)))
}

fn options_from(args: &ExecutionArgs) -> RunOptions {
    RunOptions::default()
        .with_workers(args.workers)
        .with_redo(args.redo)
}

async fn run_single_command(args: RunArgs) -> anyhow::Result<()> {
    let scheduler = build_scheduler(&args.execution.config_dir, &args.execution.output)?;
    // Resolve before loading instances so a bad name fails fast.
    let config = scheduler.resolver().resolve(&args.mode, &args.model)?;
    let instances = load_selected(&args.source, &args.selection).await?;

    let results = scheduler
        .run_configuration(&args.model, &args.mode, &instances, options_from(&args.execution))
        .await?;

    if results.is_empty() {
        println!("Nothing to run for {} (all instances already have predictions).", config.run_id());
    } else {
        print!("{}", render_results(&config.run_id(), &results));
    }
    Ok(())
}

async fn run_matrix_command(args: MatrixArgs) -> anyhow::Result<()> {
    let scheduler = build_scheduler(&args.execution.config_dir, &args.execution.output)?;
    let registry = scheduler.resolver().registry();

    let models = if args.models.is_empty() {
        registry.model_names()
    } else {
        args.models.clone()
    };
    let modes = if args.modes.is_empty() {
        registry.mode_names()
    } else {
        args.modes.clone()
    };
    if models.is_empty() || modes.is_empty() {
        bail!(
            "No models or modes to run (models: {}, modes: {})",
            models.len(),
            modes.len()
        );
    }

    // Every pair must resolve before any instance runs.
    let plan = MatrixPlan::new(models, modes, args.source.subset.clone());
    for identity in plan.identities() {
        scheduler.resolver().resolve(&identity.mode, &identity.model)?;
    }

    let instances = load_selected(&args.source, &args.selection).await?;
    let results = run_matrix(&scheduler, &plan, &instances, options_from(&args.execution)).await?;

    print!("{}", render_matrix(&results));
    println!(
        "\nMatrix summary: {}",
        scheduler.store().matrix_summary_path().display()
    );
    Ok(())
}

async fn run_debug_command(args: DebugArgs) -> anyhow::Result<()> {
    let scheduler = build_scheduler(&args.config_dir, &args.output)?;
    let config = scheduler.resolver().resolve(&args.mode, &args.model)?;

    let instance = load_instances(&args.source)
        .await?
        .into_iter()
        .find(|i| i.instance_id == args.instance)
        .with_context(|| format!("Instance {} not found", args.instance))?;

    let results = scheduler
        .run_configuration(
            &args.model,
            &args.mode,
            std::slice::from_ref(&instance),
            RunOptions::default().with_redo(true),
        )
        .await?;

    print!("{}", render_results(&config.run_id(), &results));
    for result in &results {
        if let Some(failure) = &result.failure {
            println!("\n{}: {}", failure.category, failure.message);
            for cause in &failure.causes {
                println!("  caused by: {}", cause);
            }
        }
        if !result.submission.is_empty() {
            println!("\n{}", result.submission);
        }
    }
    println!(
        "Trajectory: {}",
        scheduler
            .store()
            .trajectory_path(&config.run_id(), &instance.instance_id)
            .display()
    );
    Ok(())
}

fn run_configs_command(args: ConfigsArgs) -> anyhow::Result<()> {
    let registry = ConfigRegistry::discover(&args.config_dir)?;
    let models = list_models(&registry);
    let modes = list_modes(&registry);

    if args.json {
        let output = serde_json::json!({
            "models": models,
            "modes": modes,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Models ({}):", models.len());
    for m in &models {
        println!("  {:<30} {}", m.name, m.detail);
    }
    println!("Modes ({}):", modes.len());
    for m in &modes {
        println!("  {:<30} {}", m.name, m.detail);
    }
    Ok(())
}

// ============================================================================
// Analysis commands
// ============================================================================

/// Modes used to split run names: registered modes when the config directory
/// is readable, the defaults otherwise.
fn mode_set_for(config_dir: &Path) -> ModeSet {
    match ConfigRegistry::discover(config_dir) {
        Ok(registry) => registry.mode_set(),
        Err(e) => {
            debug!(config_dir = %config_dir.display(), error = %e, "Using default modes");
            ModeSet::default()
        }
    }
}

fn ensure_results_dir(dir: &Path) -> anyhow::Result<()> {
    if !dir.is_dir() {
        bail!("Results directory not found: {}", dir.display());
    }
    Ok(())
}

async fn run_analyze_summary(args: AnalyzeSummaryArgs) -> anyhow::Result<()> {
    ensure_results_dir(&args.results.results_dir)?;
    let modes = mode_set_for(&args.results.config_dir);

    let scorer = Scorer::new()
        .with_command(
            args.python.clone(),
            vec!["-m".to_string(), "swebench.harness.run_evaluation".to_string()],
        )
        .with_max_workers(args.scorer_workers)
        .with_timeout(Duration::from_secs(args.scorer_timeout));
    let verification = args.verify.then(|| Verification {
        scorer: &scorer,
        dataset: dataset_for_subset(&args.subset),
    });

    let metrics = summarize_results(&args.results.results_dir, &modes, verification).await;
    if metrics.is_empty() {
        println!("No runs found in {}", args.results.results_dir.display());
        return Ok(());
    }
    print!("{}", render_metrics(&metrics, args.format)?);
    Ok(())
}

async fn run_analyze_compare(args: AnalyzeCompareArgs) -> anyhow::Result<()> {
    ensure_results_dir(&args.results.results_dir)?;
    let modes = mode_set_for(&args.results.config_dir);
    let metrics = summarize_results(&args.results.results_dir, &modes, None).await;

    let mut by_model: BTreeMap<String, BTreeMap<String, RunMetrics>> = BTreeMap::new();
    for m in metrics {
        if args.model.as_ref().is_some_and(|wanted| *wanted != m.model) {
            continue;
        }
        by_model
            .entry(m.model.clone())
            .or_default()
            .insert(m.mode.clone(), m);
    }

    if by_model.is_empty() {
        println!("No runs to compare.");
        return Ok(());
    }

    for (model, by_mode) in &by_model {
        if !by_mode.contains_key(&args.baseline) {
            warn!(model = %model, baseline = %args.baseline, "No baseline run, skipping");
            continue;
        }
        let deltas = compare_modes(by_mode, &args.baseline);
        let ordered: Vec<(&str, &RunMetrics)> = order_modes(by_mode.keys())
            .into_iter()
            .filter_map(|mode| by_mode.get_key_value(&mode))
            .map(|(mode, m)| (mode.as_str(), m))
            .collect();
        println!("{}", render_comparison(model, &args.baseline, &ordered, &deltas));
    }
    Ok(())
}

async fn run_analyze_tools(args: AnalyzeToolsArgs) -> anyhow::Result<()> {
    ensure_results_dir(&args.results.results_dir)?;
    let modes = mode_set_for(&args.results.config_dir);

    let usages: Vec<_> = load_run_artifacts(&args.results.results_dir)
        .await
        .iter()
        .filter(|a| modes.parse(&a.run_id).mode != DEFAULT_BASELINE_MODE)
        .map(tool_usage)
        .filter(|u| !u.is_empty())
        .collect();

    if usages.is_empty() {
        println!("No tool usage recorded.");
        return Ok(());
    }
    print!("{}", render_tool_usage(&usages));
    Ok(())
}
