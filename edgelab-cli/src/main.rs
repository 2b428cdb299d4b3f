//! EdgeLab CLI: backtests, optimizations and robustness checks over CSV candles.
//!
//! Commands:
//! - `run`: one backtest of the job's strategy, with optional `--param` overrides
//! - `optimize`: search the job's parameter space
//! - `walk-forward`: rolling / anchored IS-OOS validation of the search
//! - `monte-carlo`: resample the trade ledger of one backtest
//!
//! Every command reads `--candles <csv>` and `--spec <toml>` and writes JSON
//! to `--out` (stdout when omitted). Logs go to stderr, filtered by `RUST_LOG`.

mod candles;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use edgelab_core::engine::{self, RunResult};
use edgelab_runner::metrics::{self, MetricSet};
use edgelab_runner::monte_carlo::from_run;
use edgelab_runner::{
    optimize, run_walk_forward, EvalContext, JobSpec, ParamSet, RunCache,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::candles::{load_csv, CsvDefaults};

#[derive(Parser)]
#[command(name = "edgelab", about = "EdgeLab CLI: strategy backtesting and optimization")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CommonArgs {
    /// Candle CSV: open_time (RFC 3339 or epoch ms), open, high, low, close, volume.
    #[arg(long)]
    candles: PathBuf,

    /// Job spec TOML.
    #[arg(long)]
    spec: PathBuf,

    /// Output JSON path. Defaults to stdout.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Symbol for CSVs without a `symbol` column.
    #[arg(long, default_value = "UNKNOWN")]
    symbol: String,

    /// Timeframe for CSVs without a `timeframe` column.
    #[arg(long, default_value = "1h")]
    timeframe: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Backtest the job's strategy once.
    Run {
        #[command(flatten)]
        common: CommonArgs,

        /// Parameter override, `name=value`. Repeatable.
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, f64)>,
    },
    /// Optimize over the job's parameter space.
    Optimize {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Walk-forward validation of the job's search.
    WalkForward {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Monte Carlo resampling of one backtest's trades.
    MonteCarlo {
        #[command(flatten)]
        common: CommonArgs,

        /// Parameter override, `name=value`. Repeatable.
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, f64)>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Commands::Run { common, params } => run_cmd(&common, params),
        Commands::Optimize { common } => optimize_cmd(&common),
        Commands::WalkForward { common } => walk_forward_cmd(&common),
        Commands::MonteCarlo { common, params } => monte_carlo_cmd(&common, params),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

// ─── Commands ────────────────────────────────────────────────────────

#[derive(Serialize)]
struct RunReport {
    config_hash: String,
    params: ParamSet,
    metrics: MetricSet,
    #[serde(flatten)]
    run: RunResult,
}

fn run_cmd(common: &CommonArgs, params: Vec<(String, f64)>) -> Result<()> {
    let (spec, ctx) = load(common)?;
    let params: ParamSet = params.into_iter().collect();
    let run = backtest(&spec, &ctx, &params)?;
    let report = RunReport {
        config_hash: spec.template()?.apply(&params)?.config_hash().to_string(),
        metrics: metrics::extract(&run, ctx.periods_per_year),
        params,
        run,
    };
    write_json(common.out.as_deref(), &report)
}

fn optimize_cmd(common: &CommonArgs) -> Result<()> {
    let (spec, ctx) = load(common)?;
    if spec.params.is_empty() {
        bail!("job spec has no [[params]] to optimize");
    }
    let mut search = spec.search.build(spec.space(), 0)?;
    let result = optimize(&ctx, search.as_mut(), &spec.coordinator, None)?;
    write_json(common.out.as_deref(), &result)
}

fn walk_forward_cmd(common: &CommonArgs) -> Result<()> {
    let (spec, ctx) = load(common)?;
    if spec.params.is_empty() {
        bail!("job spec has no [[params]] to optimize");
    }
    let result = run_walk_forward(
        &ctx,
        &spec.space(),
        &spec.search,
        &spec.coordinator,
        &spec.walk_forward,
        None,
    )?;
    write_json(common.out.as_deref(), &result)
}

fn monte_carlo_cmd(common: &CommonArgs, params: Vec<(String, f64)>) -> Result<()> {
    let (spec, ctx) = load(common)?;
    let params: ParamSet = params.into_iter().collect();
    let run = backtest(&spec, &ctx, &params)?;
    let result = from_run(&run, &spec.monte_carlo)?;
    write_json(common.out.as_deref(), &result)
}

// ── Helpers ──

fn load(common: &CommonArgs) -> Result<(JobSpec, EvalContext)> {
    let spec = JobSpec::load(&common.spec)?;
    let defaults = CsvDefaults {
        symbol: common.symbol.clone(),
        timeframe: common.timeframe.clone(),
    };
    let store = load_csv(&common.candles, &defaults)?;
    let mut ctx = EvalContext::new(store, spec.template()?, spec.objective.clone());
    if let Some(cache) = RunCache::from_config(&spec.cache) {
        ctx = ctx.with_cache(Arc::new(cache));
    }
    Ok((spec, ctx))
}

fn backtest(spec: &JobSpec, ctx: &EvalContext, params: &ParamSet) -> Result<RunResult> {
    let definition = spec.template()?.apply(params)?;
    let run = engine::run_spec(ctx.candles.as_slice(), &definition.pipeline, &definition.config)?;
    tracing::info!(
        trades = run.trades.len(),
        final_equity = run.final_equity,
        "backtest finished"
    );
    Ok(run)
}

fn parse_param(raw: &str) -> Result<(String, f64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("bad value for {name}: {e}"))?;
    Ok((name.trim().to_string(), value))
}

fn write_json<T: Serialize>(out: Option<&Path>, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), "results written");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{json}")?;
        }
    }
    Ok(())
}
