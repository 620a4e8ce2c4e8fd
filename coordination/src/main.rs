//! Pipeline plan inspector
//!
//! Compiles a step selection into its node/edge graph and progress plan, or
//! reads back a stored progress snapshot for a run.
//!
//! # Usage
//!
//! ```bash
//! # Full per-entity pipeline with two debate rounds
//! pipeline-plan plan --steps market,social,news --debate-rounds 2
//!
//! # Per-index pipeline without the risk discussion, saving the initial snapshot
//! pipeline-plan plan --shape per_index --no-risk --store-dir ./progress
//!
//! # Poll a stored run
//! pipeline-plan status --store-dir ./progress --run-id <RUN_ID>
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use trading_coordination::progress::{estimate_duration_secs, FileProgressStore};
use trading_coordination::telemetry::{init_tracing, DEFAULT_DIRECTIVE};
use trading_coordination::{
    ConfigOverrides, PipelineConfig, PipelineShape, ProgressEstimator, ProgressSnapshot,
    ProgressStore, ResearchDepth, RunContext, SystemClock, TopologyCompiler, TopologyDescription,
};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a pipeline and print its topology and progress plan as JSON
    Plan(PlanArgs),
    /// Print a stored progress snapshot, recomputed for now
    Status {
        /// Directory holding one JSON snapshot per run
        #[arg(long)]
        store_dir: PathBuf,

        /// Run to look up
        #[arg(long)]
        run_id: String,

        /// Snapshots not updated within this many seconds are treated as gone
        #[arg(long)]
        retention_secs: Option<u64>,
    },
}

#[derive(clap::Args, Debug)]
struct PlanArgs {
    /// TOML or YAML config file (defaults to PIPELINE_* environment variables)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pipeline shape: per_entity or per_index
    #[arg(long)]
    shape: Option<PipelineShape>,

    /// Comma-separated step selection
    #[arg(long, value_delimiter = ',')]
    steps: Option<Vec<String>>,

    /// Disable the bull/bear debate
    #[arg(long, default_value_t = false)]
    no_debate: bool,

    /// Disable the risk discussion
    #[arg(long, default_value_t = false)]
    no_risk: bool,

    /// Disable the trader
    #[arg(long, default_value_t = false)]
    no_trader: bool,

    /// Research depth preset, 1-5
    #[arg(long)]
    depth: Option<u8>,

    /// Debate rounds (overrides the depth preset)
    #[arg(long)]
    debate_rounds: Option<u32>,

    /// Risk rounds (overrides the depth preset)
    #[arg(long)]
    risk_rounds: Option<u32>,

    /// Run id for the progress plan (random when omitted)
    #[arg(long)]
    run_id: Option<String>,

    /// Save the initial progress snapshot under this directory
    #[arg(long)]
    store_dir: Option<PathBuf>,
}

#[derive(Serialize)]
struct PlanOutput {
    run_id: String,
    config: PipelineConfig,
    topology: TopologyDescription,
    estimated_duration_secs: f64,
    progress: ProgressSnapshot,
}

impl PlanArgs {
    fn overrides(&self) -> Result<ConfigOverrides> {
        let research_depth = self
            .depth
            .map(ResearchDepth::from_level)
            .transpose()
            .context("invalid --depth")?;
        Ok(ConfigOverrides {
            shape: self.shape,
            steps: self.steps.clone(),
            debate_enabled: self.no_debate.then_some(false),
            risk_enabled: self.no_risk.then_some(false),
            trader_enabled: self.no_trader.then_some(false),
            research_depth,
            debate_rounds: self.debate_rounds,
            risk_rounds: self.risk_rounds,
        })
    }
}

async fn plan(args: PlanArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_path(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => PipelineConfig::from_env(),
    };
    config.apply_overrides(&args.overrides()?);

    let mut ctx = RunContext::new(config.clone());
    if let Some(run_id) = &args.run_id {
        ctx = ctx.with_run_id(run_id.clone());
    }

    let compiler = TopologyCompiler::new(ctx.clone());
    let graph = compiler
        .compile_configured()
        .context("failed to compile pipeline")?;
    let estimator = ProgressEstimator::from_config(&ctx)?;
    let progress = estimator.snapshot();

    if let Some(dir) = &args.store_dir {
        let store = FileProgressStore::new(
            dir,
            Duration::from_secs(config.progress_retention_secs),
            ctx.clock.clone(),
        );
        store.save(&progress).await?;
        tracing::info!(run_id = %ctx.run_id, dir = %dir.display(), "Initial snapshot saved");
    }

    let output = PlanOutput {
        run_id: ctx.run_id.clone(),
        estimated_duration_secs: estimate_duration_secs(graph.steps().len(), graph.phases(), &config.rounds),
        topology: graph.describe(),
        config,
        progress,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn status(store_dir: PathBuf, run_id: String, retention_secs: Option<u64>) -> Result<()> {
    let retention = retention_secs.unwrap_or_else(|| PipelineConfig::default().progress_retention_secs);
    let store = FileProgressStore::new(
        &store_dir,
        Duration::from_secs(retention),
        Arc::new(SystemClock),
    );
    match store.load(&run_id).await? {
        Some(snapshot) => {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
        None => bail!(
            "no progress snapshot for run '{}' in {}",
            run_id,
            store_dir.display()
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(DEFAULT_DIRECTIVE);

    match args.command {
        Command::Plan(plan_args) => plan(plan_args).await,
        Command::Status {
            store_dir,
            run_id,
            retention_secs,
        } => status(store_dir, run_id, retention_secs).await,
    }
}
