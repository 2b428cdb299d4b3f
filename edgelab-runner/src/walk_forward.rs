//! Walk-forward analysis: optimize in-sample, score out-of-sample.
//!
//! The candle range is cut into N chronological (IS, OOS) window pairs:
//! - rolling: fixed-length IS window sliding forward by one OOS length
//! - anchored: IS always starts at bar 0 and grows by one OOS length
//!
//! For every window the inner search (grid or Bayesian) sees only the IS
//! candles. The best IS parameter set is then scored once on the OOS candles,
//! with no further tuning.
//!
//! Window lengths, for N bars, n windows and OOS/IS ratio r:
//! - `is_len  = floor(N / (1 + n * r))`
//! - `oos_len = floor((N - is_len) / n)`

use std::sync::atomic::{AtomicBool, Ordering};

use edgelab_core::domain::CandleError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coordinator::{optimize, CoordinatorConfig, CoordinatorError, TrialCounts};
use crate::evaluate::EvalContext;
use crate::metrics::{mean_f64, std_dev};
use crate::params::{ParamError, ParamSet, ParamSpace};
use crate::search::SearchMethod;

// ─── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowMode {
    #[default]
    Rolling,
    Anchored,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkForwardConfig {
    pub n_windows: usize,
    /// OOS length as a fraction of IS length.
    pub oos_ratio: f64,
    pub mode: WindowMode,
    pub min_is_bars: usize,
    pub min_oos_bars: usize,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            n_windows: 5,
            oos_ratio: 0.25,
            mode: WindowMode::Rolling,
            min_is_bars: 100,
            min_oos_bars: 20,
        }
    }
}

#[derive(Debug, Error)]
pub enum WalkForwardError {
    #[error("invalid walk-forward config: {0}")]
    InvalidConfig(String),
    #[error("insufficient data: {total_bars} bars < minimum {min_bars}")]
    InsufficientData { total_bars: usize, min_bars: usize },
    #[error("invalid parameter space: {0}")]
    Param(#[from] ParamError),
    #[error("window {window}: {source}")]
    Search {
        window: usize,
        #[source]
        source: CoordinatorError,
    },
    #[error(transparent)]
    Candles(#[from] CandleError),
}

// ─── Result types ────────────────────────────────────────────────────

/// Bar index ranges of one window, relative to the analysed candles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub window_id: usize,
    /// Inclusive.
    pub is_start: usize,
    /// Exclusive.
    pub is_end: usize,
    pub oos_start: usize,
    pub oos_end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalkForwardWindow {
    #[serde(flatten)]
    pub spec: WindowSpec,
    pub is_best_params: Option<ParamSet>,
    /// Best normalized IS objective.
    pub is_score: Option<f64>,
    /// Normalized OOS objective of `is_best_params`.
    pub oos_score: Option<f64>,
    /// `oos_score / is_score`; undefined when the IS score is ~0.
    pub efficiency: Option<f64>,
    /// `is_score - oos_score`.
    pub degradation: Option<f64>,
    pub oos_net_return: Option<f64>,
    pub is_trials: TrialCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalkForwardResult {
    pub mode: WindowMode,
    pub windows: Vec<WalkForwardWindow>,
    /// 0..=100; see [`robustness_score`].
    pub robustness_score: f64,
    pub mean_efficiency: Option<f64>,
    pub profitable_windows: usize,
    pub evaluated_windows: usize,
    /// True if cancellation cut the analysis short.
    pub cancelled: bool,
}

// ─── Window creation ─────────────────────────────────────────────────

pub fn create_windows(
    total_bars: usize,
    config: &WalkForwardConfig,
) -> Result<Vec<WindowSpec>, WalkForwardError> {
    if config.n_windows == 0 {
        return Err(WalkForwardError::InvalidConfig("n_windows must be >= 1".into()));
    }
    if !(config.oos_ratio.is_finite() && config.oos_ratio > 0.0) {
        return Err(WalkForwardError::InvalidConfig(format!(
            "oos_ratio must be > 0, got {}",
            config.oos_ratio
        )));
    }
    let n = config.n_windows;
    let min_bars = config.min_is_bars + n * config.min_oos_bars.max(1);
    let is_len = (total_bars as f64 / (1.0 + n as f64 * config.oos_ratio)).floor() as usize;
    let oos_len = total_bars.saturating_sub(is_len) / n;
    if total_bars < min_bars
        || is_len < config.min_is_bars.max(1)
        || oos_len < config.min_oos_bars.max(1)
    {
        return Err(WalkForwardError::InsufficientData {
            total_bars,
            min_bars,
        });
    }

    Ok((0..n)
        .map(|k| {
            let oos_start = is_len + k * oos_len;
            let is_start = match config.mode {
                WindowMode::Rolling => k * oos_len,
                WindowMode::Anchored => 0,
            };
            WindowSpec {
                window_id: k,
                is_start,
                is_end: oos_start,
                oos_start,
                oos_end: oos_start + oos_len,
            }
        })
        .collect())
}

// ─── Analysis ────────────────────────────────────────────────────────

/// Run the full walk-forward analysis over `ctx.candles`.
pub fn run_walk_forward(
    ctx: &EvalContext,
    space: &ParamSpace,
    method: &SearchMethod,
    coordinator: &CoordinatorConfig,
    config: &WalkForwardConfig,
    cancel: Option<&AtomicBool>,
) -> Result<WalkForwardResult, WalkForwardError> {
    space.validate()?;
    ctx.template.check_space(space)?;
    let specs = create_windows(ctx.candles.len(), config)?;
    tracing::info!(
        windows = specs.len(),
        mode = ?config.mode,
        bars = ctx.candles.len(),
        "walk-forward started"
    );

    let mut windows = Vec::with_capacity(specs.len());
    let mut cancelled = false;
    for spec in specs {
        if cancel.is_some_and(|f| f.load(Ordering::Relaxed)) {
            cancelled = true;
            break;
        }
        windows.push(run_window(ctx, space, method, coordinator, spec, cancel)?);
    }

    let evaluated: Vec<&WalkForwardWindow> =
        windows.iter().filter(|w| w.oos_score.is_some()).collect();
    let efficiencies: Vec<f64> = evaluated.iter().filter_map(|w| w.efficiency).collect();
    let profitable = evaluated
        .iter()
        .filter(|w| w.oos_net_return.is_some_and(|r| r > 0.0))
        .count();
    let score = robustness_score(&efficiencies, profitable, evaluated.len());
    let result = WalkForwardResult {
        mode: config.mode,
        mean_efficiency: (!efficiencies.is_empty()).then(|| mean_f64(&efficiencies)),
        profitable_windows: profitable,
        evaluated_windows: evaluated.len(),
        robustness_score: score,
        windows,
        cancelled,
    };
    tracing::info!(
        robustness = result.robustness_score,
        evaluated = result.evaluated_windows,
        profitable = result.profitable_windows,
        "walk-forward finished"
    );
    Ok(result)
}

fn run_window(
    ctx: &EvalContext,
    space: &ParamSpace,
    method: &SearchMethod,
    coordinator: &CoordinatorConfig,
    spec: WindowSpec,
    cancel: Option<&AtomicBool>,
) -> Result<WalkForwardWindow, WalkForwardError> {
    let is_ctx = ctx.with_candles(spec.is_start..spec.is_end)?;
    let mut strategy = method.build(space.clone(), spec.window_id as u64)?;
    let search = optimize(&is_ctx, strategy.as_mut(), coordinator, cancel).map_err(|source| {
        WalkForwardError::Search {
            window: spec.window_id,
            source,
        }
    })?;

    let mut window = WalkForwardWindow {
        spec,
        is_best_params: search.best_params.clone(),
        is_score: search.best_score,
        oos_score: None,
        efficiency: None,
        degradation: None,
        oos_net_return: None,
        is_trials: search.counts,
        error: None,
    };
    let (Some(params), Some(is_score)) = (search.best_params, search.best_score) else {
        window.error = Some("no in-sample trial succeeded".into());
        tracing::warn!(window = spec.window_id, "walk-forward window has no IS winner");
        return Ok(window);
    };

    let oos_ctx = ctx.with_candles(spec.oos_start..spec.oos_end)?;
    match oos_ctx.evaluate(&params) {
        Ok(eval) => {
            window.oos_score = Some(eval.objective);
            window.degradation = Some(is_score - eval.objective);
            window.efficiency = window_efficiency(is_score, eval.objective);
            window.oos_net_return = eval.metrics.value("total_return");
            tracing::debug!(
                window = spec.window_id,
                is = is_score,
                oos = eval.objective,
                "walk-forward window scored"
            );
        }
        Err(err) => {
            tracing::warn!(window = spec.window_id, error = %err, "OOS evaluation failed");
            window.error = Some(format!("out-of-sample: {err}"));
        }
    }
    Ok(window)
}

/// OOS / IS score ratio, defined only for a positive IS score. With IS <= 0
/// the ratio flips direction (a worse OOS would read as above 1).
pub fn window_efficiency(is_score: f64, oos_score: f64) -> Option<f64> {
    (is_score > 1e-12).then(|| oos_score / is_score)
}

/// `100 * (0.4 * mean clamped efficiency + 0.4 * profitable share
/// + 0.2 / (1 + std of efficiencies))`, each efficiency clamped to [0, 1].
/// The mean runs over all `evaluated` windows, so a window without a defined
/// efficiency earns no efficiency credit.
pub fn robustness_score(efficiencies: &[f64], profitable: usize, evaluated: usize) -> f64 {
    if evaluated == 0 {
        return 0.0;
    }
    let mean_eff = efficiencies.iter().map(|e| e.clamp(0.0, 1.0)).sum::<f64>()
        / evaluated.max(efficiencies.len()) as f64;
    let profitable_share = profitable as f64 / evaluated as f64;
    let stability = 1.0 / (1.0 + std_dev(efficiencies));
    (100.0 * (0.4 * mean_eff + 0.4 * profitable_share + 0.2 * stability)).clamp(0.0, 100.0)
}

// ─── Tests ───────────────────────────────────────────────────────────
