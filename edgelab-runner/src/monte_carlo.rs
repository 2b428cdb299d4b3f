//! Monte Carlo robustness: resampled equity paths from one trade ledger.
//!
//! Each simulated path replays the ledger's net PnLs in a resampled order:
//! - bootstrap: `n_trades` draws with replacement
//! - permutation: a shuffle of the original trades
//!
//! Optional adverse slippage noise charges every replayed trade
//! `|N(0, sigma)|` percent of its traded notional.
//!
//! Path `i` draws from its own RNG stream `(seed, "mc", i)`, so results are
//! identical for any thread count.

use edgelab_core::domain::Trade;
use edgelab_core::engine::RunResult;
use edgelab_core::rng::RngHierarchy;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics::percentile_sorted;

// ─── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResampleMethod {
    #[default]
    Bootstrap,
    Permutation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonteCarloConfig {
    pub n_simulations: usize,
    pub method: ResampleMethod,
    /// Std dev (percent of notional) of the adverse slippage charge per trade.
    pub slippage_noise_pct: Option<f64>,
    /// A path is ruined once its drawdown from peak exceeds this fraction.
    pub ruin_threshold: f64,
    /// Percentiles (0..=100) reported for every band.
    pub percentiles: Vec<f64>,
    pub seed: u64,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            n_simulations: 1_000,
            method: ResampleMethod::Bootstrap,
            slippage_noise_pct: None,
            ruin_threshold: 0.5,
            percentiles: vec![5.0, 25.0, 50.0, 75.0, 95.0],
            seed: 42,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum MonteCarloError {
    #[error("trade ledger is empty")]
    NoTrades,
    #[error("invalid Monte Carlo config: {0}")]
    InvalidConfig(String),
}

impl MonteCarloConfig {
    pub fn validate(&self) -> Result<(), MonteCarloError> {
        let invalid = |m: String| Err(MonteCarloError::InvalidConfig(m));
        if self.n_simulations == 0 {
            return invalid("n_simulations must be >= 1".into());
        }
        if !(self.ruin_threshold > 0.0 && self.ruin_threshold <= 1.0) {
            return invalid(format!("ruin_threshold must be in (0, 1], got {}", self.ruin_threshold));
        }
        if let Some(s) = self.slippage_noise_pct {
            if !s.is_finite() || s < 0.0 {
                return invalid(format!("slippage_noise_pct must be >= 0, got {s}"));
            }
        }
        if self.percentiles.is_empty()
            || self.percentiles.iter().any(|p| !(0.0..=100.0).contains(p))
        {
            return invalid("percentiles must be non-empty and within 0..=100".into());
        }
        Ok(())
    }
}

// ─── Result types ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentileBand {
    pub percentile: f64,
    pub value: f64,
}

/// Equity percentiles after `step` replayed trades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConePoint {
    pub step: usize,
    /// Aligned with [`MonteCarloResult::percentiles`].
    pub equity: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloResult {
    pub n_simulations: usize,
    pub n_trades: usize,
    pub method: ResampleMethod,
    pub initial_capital: f64,
    /// Share of paths ending above initial capital.
    pub probability_of_profit: f64,
    /// Binomial standard error of `probability_of_profit`.
    pub probability_of_profit_std_error: f64,
    /// Share of paths whose drawdown ever exceeded `ruin_threshold`.
    pub probability_of_ruin: f64,
    pub ruin_threshold: f64,
    pub mean_final_equity: f64,
    pub percentiles: Vec<f64>,
    pub final_equity_bands: Vec<PercentileBand>,
    /// Drawdown fractions.
    pub max_drawdown_bands: Vec<PercentileBand>,
    pub equity_cone: Vec<ConePoint>,
}

struct PathOutcome {
    equity: Vec<f64>,
    max_drawdown: f64,
    ruined: bool,
}

// ─── Simulation ──────────────────────────────────────────────────────

/// Simulate from an engine run's ledger and starting capital.
pub fn from_run(
    run: &RunResult,
    config: &MonteCarloConfig,
) -> Result<MonteCarloResult, MonteCarloError> {
    run_monte_carlo(&run.trades, run.initial_capital, config)
}

pub fn run_monte_carlo(
    trades: &[Trade],
    initial_capital: f64,
    config: &MonteCarloConfig,
) -> Result<MonteCarloResult, MonteCarloError> {
    config.validate()?;
    if trades.is_empty() {
        return Err(MonteCarloError::NoTrades);
    }
    if !(initial_capital.is_finite() && initial_capital > 0.0) {
        return Err(MonteCarloError::InvalidConfig(format!(
            "initial capital must be > 0, got {initial_capital}"
        )));
    }
    let noise = match config.slippage_noise_pct {
        Some(s) if s > 0.0 => Some(
            Normal::new(0.0, s / 100.0)
                .map_err(|e| MonteCarloError::InvalidConfig(e.to_string()))?,
        ),
        _ => None,
    };

    let pnl: Vec<f64> = trades.iter().map(|t| t.net_pnl).collect();
    let notional: Vec<f64> = trades
        .iter()
        .map(|t| (t.entry_price + t.exit_price) * t.quantity)
        .collect();
    let rngs = RngHierarchy::new(config.seed);
    tracing::info!(
        simulations = config.n_simulations,
        trades = trades.len(),
        method = ?config.method,
        "monte carlo started"
    );

    let paths: Vec<PathOutcome> = (0..config.n_simulations)
        .into_par_iter()
        .map(|i| {
            let mut rng = rngs.rng_for("mc", i as u64);
            let order = resample(trades.len(), config.method, &mut rng);
            simulate(
                &order,
                &pnl,
                &notional,
                initial_capital,
                noise.as_ref(),
                config.ruin_threshold,
                &mut rng,
            )
        })
        .collect();

    Ok(summarize(paths, trades.len(), initial_capital, config))
}

fn resample<R: Rng + ?Sized>(n: usize, method: ResampleMethod, rng: &mut R) -> Vec<usize> {
    match method {
        ResampleMethod::Bootstrap => (0..n).map(|_| rng.gen_range(0..n)).collect(),
        ResampleMethod::Permutation => {
            let mut order: Vec<usize> = (0..n).collect();
            order.shuffle(rng);
            order
        }
    }
}

fn simulate<R: Rng + ?Sized>(
    order: &[usize],
    pnl: &[f64],
    notional: &[f64],
    initial_capital: f64,
    noise: Option<&Normal<f64>>,
    ruin_threshold: f64,
    rng: &mut R,
) -> PathOutcome {
    let mut equity = Vec::with_capacity(order.len() + 1);
    let mut current = initial_capital;
    let mut peak = initial_capital;
    let mut max_drawdown = 0.0_f64;
    equity.push(current);
    for &i in order {
        let cost = noise.map_or(0.0, |n| n.sample(rng).abs() * notional[i]);
        current += pnl[i] - cost;
        peak = peak.max(current);
        if peak > 0.0 {
            max_drawdown = max_drawdown.max((peak - current) / peak);
        }
        equity.push(current);
    }
    PathOutcome {
        equity,
        max_drawdown,
        ruined: max_drawdown > ruin_threshold,
    }
}

fn summarize(
    paths: Vec<PathOutcome>,
    n_trades: usize,
    initial_capital: f64,
    config: &MonteCarloConfig,
) -> MonteCarloResult {
    let n = paths.len() as f64;
    let finals: Vec<f64> = paths
        .iter()
        .map(|p| p.equity.last().copied().unwrap_or(initial_capital))
        .collect();
    let p_profit = finals.iter().filter(|f| **f > initial_capital).count() as f64 / n;
    let p_ruin = paths.iter().filter(|p| p.ruined).count() as f64 / n;
    let drawdowns: Vec<f64> = paths.iter().map(|p| p.max_drawdown).collect();

    let bands = |values: &[f64]| -> Vec<PercentileBand> {
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        config
            .percentiles
            .iter()
            .map(|&p| PercentileBand {
                percentile: p,
                value: percentile_sorted(&sorted, p),
            })
            .collect()
    };

    let equity_cone = (0..=n_trades)
        .map(|step| {
            let mut column: Vec<f64> = paths.iter().map(|p| p.equity[step]).collect();
            column.sort_by(f64::total_cmp);
            ConePoint {
                step,
                equity: config
                    .percentiles
                    .iter()
                    .map(|&p| percentile_sorted(&column, p))
                    .collect(),
            }
        })
        .collect();

    let result = MonteCarloResult {
        n_simulations: paths.len(),
        n_trades,
        method: config.method,
        initial_capital,
        probability_of_profit: p_profit,
        probability_of_profit_std_error: (p_profit * (1.0 - p_profit) / n).sqrt(),
        probability_of_ruin: p_ruin,
        ruin_threshold: config.ruin_threshold,
        mean_final_equity: finals.iter().sum::<f64>() / n,
        percentiles: config.percentiles.clone(),
        final_equity_bands: bands(&finals),
        max_drawdown_bands: bands(&drawdowns),
        equity_cone,
    };
    tracing::info!(
        p_profit = result.probability_of_profit,
        p_ruin = result.probability_of_ruin,
        "monte carlo finished"
    );
    result
}

// ─── Tests ───────────────────────────────────────────────────────────
