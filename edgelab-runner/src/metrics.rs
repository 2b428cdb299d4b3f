//! Metrics extractor: a trade ledger + equity curve in, a named metric set out.
//!
//! Every metric is a pure function of one `RunResult`. Metrics fall into five
//! families:
//! - returns (net profit, CAGR, bar-return statistics, equity-curve fit)
//! - calendar periods (monthly and yearly compounded returns)
//! - drawdown (depth, duration, ulcer / pain indices)
//! - risk-adjusted ratios (Sharpe, Sortino, Calmar, Omega, ...)
//! - trade statistics (win rate, profit factor, streaks, MFE / MAE, per side
//!   and per exit reason breakdowns)
//!
//! Tail statistics (VaR, CVaR, moments) live in [`crate::tail_metrics`].
//!
//! A ratio whose denominator vanishes, or any non-finite result, is recorded
//! as [`MetricValue::Undefined`] for that metric only.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, Utc};
use edgelab_core::domain::{ExitReason, Side, Trade};
use edgelab_core::engine::RunResult;
use serde::{Deserialize, Serialize};

use crate::tail_metrics;

/// Seconds in a 365.25-day year. Candle markets trade around the clock, so
/// annualization counts calendar time.
pub const SECONDS_PER_YEAR: f64 = 365.25 * 86_400.0;

/// Annualization used when candle spacing is unknown (daily candles).
pub const DEFAULT_PERIODS_PER_YEAR: f64 = 365.25;

const EPS: f64 = 1e-12;

// ─── Metric values ───────────────────────────────────────────────────

/// One metric: a finite number, or undefined (e.g. a ratio over zero).
///
/// Serializes as a number or `null`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "Option<f64>", into = "Option<f64>")]
pub enum MetricValue {
    Value(f64),
    Undefined,
}

impl MetricValue {
    /// Non-finite input becomes `Undefined`.
    pub fn from_f64(v: f64) -> Self {
        if v.is_finite() {
            Self::Value(v)
        } else {
            Self::Undefined
        }
    }

    pub fn value(self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(v),
            Self::Undefined => None,
        }
    }

    pub fn is_defined(self) -> bool {
        matches!(self, Self::Value(_))
    }
}

impl From<Option<f64>> for MetricValue {
    fn from(v: Option<f64>) -> Self {
        v.map_or(Self::Undefined, Self::from_f64)
    }
}

impl From<MetricValue> for Option<f64> {
    fn from(v: MetricValue) -> Self {
        v.value()
    }
}

/// Named metrics of one run, in name order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricSet {
    values: BTreeMap<String, MetricValue>,
}

impl MetricSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<MetricValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub(crate) fn put(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), MetricValue::from_f64(value));
    }

    pub(crate) fn put_opt(&mut self, name: &str, value: Option<f64>) {
        self.values.insert(name.to_string(), MetricValue::from(value));
    }

    pub fn get(&self, name: &str) -> Option<MetricValue> {
        self.values.get(name).copied()
    }

    /// Defined value of `name`, if the metric exists and is defined.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(MetricValue::value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, MetricValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

// ─── Extraction ──────────────────────────────────────────────────────

/// Annualization factor from the median candle spacing in seconds.
pub fn periods_per_year(spacing_secs: Option<i64>) -> f64 {
    match spacing_secs {
        Some(s) if s > 0 => SECONDS_PER_YEAR / s as f64,
        _ => DEFAULT_PERIODS_PER_YEAR,
    }
}

/// Compute the full metric set of one run.
pub fn extract(run: &RunResult, periods_per_year: f64) -> MetricSet {
    let mut m = MetricSet::new();
    let equity = equity_with_start(run);
    let returns = bar_returns(&equity);
    let dd = drawdown_series(&equity);
    let bars = run.equity_curve.len();
    let years = bars as f64 / periods_per_year;

    returns_family(&mut m, run, &equity, &returns, years, periods_per_year);
    period_family(&mut m, run);
    drawdown_family(&mut m, run, &equity, &dd);
    ratio_family(&mut m, run, &returns, &dd, years, periods_per_year);
    tail_metrics::insert_all(&mut m, &returns, &run.trades);
    trade_family(&mut m, run, bars, years);
    m
}

fn returns_family(
    m: &mut MetricSet,
    run: &RunResult,
    equity: &[f64],
    returns: &[f64],
    years: f64,
    ppy: f64,
) {
    let net = run.final_equity - run.initial_capital;
    let total = total_return(run.initial_capital, run.final_equity);
    m.put("net_profit", net);
    m.put("total_return", total);
    m.put("total_return_pct", total * 100.0);
    m.put("final_equity", run.final_equity);
    m.put_opt("cagr", cagr(run.initial_capital, run.final_equity, years));
    m.put_opt(
        "log_return",
        (run.final_equity > 0.0).then(|| (run.final_equity / run.initial_capital).ln()),
    );
    m.put("equity_peak", equity.iter().copied().fold(f64::MIN, f64::max));
    m.put("equity_trough", equity.iter().copied().fold(f64::MAX, f64::min));

    let mean = mean_f64(returns);
    let std = std_dev(returns);
    m.put("mean_bar_return", mean);
    m.put_opt("median_bar_return", median(returns));
    m.put("bar_return_std", std);
    m.put("annualized_return", mean * ppy);
    m.put("annualized_volatility", std * ppy.sqrt());
    m.put_opt("best_bar_return", returns.iter().copied().reduce(f64::max));
    m.put_opt("worst_bar_return", returns.iter().copied().reduce(f64::min));
    m.put_opt("positive_bars_pct", fraction(returns, |r| r > 0.0).map(|f| f * 100.0));
    m.put_opt("negative_bars_pct", fraction(returns, |r| r < 0.0).map(|f| f * 100.0));
    m.put("bars", returns.len() as f64);
    m.put("years", years);

    // Straight-line fit of log equity: smoothness and trend strength.
    let fit = equity
        .iter()
        .all(|e| *e > 0.0)
        .then(|| equity.iter().map(|e| e.ln()).collect::<Vec<_>>())
        .and_then(|log_eq| linear_fit(&log_eq).map(|f| (f, log_eq.len())));
    m.put_opt("equity_r_squared", fit.and_then(|(f, _)| f.r_squared));
    m.put_opt("equity_log_slope_annualized", fit.map(|(f, _)| f.slope * ppy));
    m.put_opt(
        "k_ratio",
        fit.and_then(|(f, n)| safe_div(f.slope, f.slope_se * (n as f64).sqrt())),
    );
}

fn period_family(m: &mut MetricSet, run: &RunResult) {
    let monthly = period_returns(run, |t| (t.year(), t.month()));
    m.put("months", monthly.len() as f64);
    m.put_opt("monthly_return_mean", mean_opt(&monthly));
    m.put_opt("monthly_return_std", (monthly.len() >= 2).then(|| std_dev(&monthly)));
    m.put_opt("best_month", monthly.iter().copied().reduce(f64::max));
    m.put_opt("worst_month", monthly.iter().copied().reduce(f64::min));
    m.put_opt(
        "positive_months_pct",
        fraction(&monthly, |r| r > 0.0).map(|f| f * 100.0),
    );
    m.put_opt(
        "monthly_sharpe",
        (monthly.len() >= 2)
            .then(|| safe_div(mean_f64(&monthly), std_dev(&monthly)))
            .flatten()
            .map(|s| s * 12f64.sqrt()),
    );

    let yearly = period_returns(run, |t| t.year());
    m.put("calendar_years", yearly.len() as f64);
    m.put_opt("yearly_return_mean", mean_opt(&yearly));
    m.put_opt("best_year", yearly.iter().copied().reduce(f64::max));
    m.put_opt("worst_year", yearly.iter().copied().reduce(f64::min));
    m.put_opt(
        "positive_years_pct",
        fraction(&yearly, |r| r > 0.0).map(|f| f * 100.0),
    );
}

fn drawdown_family(m: &mut MetricSet, run: &RunResult, equity: &[f64], dd: &[f64]) {
    let max_dd = dd.iter().copied().fold(0.0, f64::max);
    let episodes = drawdown_episodes(dd);
    m.put("max_drawdown", max_dd);
    m.put("max_drawdown_pct", max_dd * 100.0);
    m.put("max_drawdown_abs", max_drawdown_abs(equity));
    m.put("pain_index", mean_f64(dd));
    m.put("ulcer_index", ulcer_index(dd));
    let underwater: Vec<f64> = dd.iter().copied().filter(|d| *d > 0.0).collect();
    m.put_opt("avg_drawdown_when_underwater", mean_opt(&underwater));
    m.put("drawdown_episodes", episodes.len() as f64);
    m.put(
        "max_drawdown_duration_bars",
        episodes.iter().map(|e| e.bars).max().unwrap_or(0) as f64,
    );
    m.put_opt(
        "avg_drawdown_duration_bars",
        mean_opt(&episodes.iter().map(|e| e.bars as f64).collect::<Vec<_>>()),
    );
    m.put_opt(
        "avg_episode_depth",
        mean_opt(&episodes.iter().map(|e| e.depth).collect::<Vec<_>>()),
    );
    m.put_opt("time_in_drawdown_pct", fraction(dd, |d| d > 0.0).map(|f| f * 100.0));
    m.put("current_drawdown", dd.last().copied().unwrap_or(0.0));
    m.put_opt(
        "recovery_factor",
        safe_div(run.final_equity - run.initial_capital, max_drawdown_abs(equity)),
    );
}

fn ratio_family(
    m: &mut MetricSet,
    run: &RunResult,
    returns: &[f64],
    dd: &[f64],
    years: f64,
    ppy: f64,
) {
    let max_dd = dd.iter().copied().fold(0.0, f64::max);
    let growth = cagr(run.initial_capital, run.final_equity, years);
    let episodes = drawdown_episodes(dd);
    let depths: Vec<f64> = episodes.iter().map(|e| e.depth).collect();
    let downside = downside_deviation(returns);
    let upside = upside_deviation(returns);

    m.put_opt("sharpe", sharpe_ratio(returns, ppy));
    m.put_opt("sortino", sortino_ratio(returns, ppy));
    m.put_opt("calmar", growth.and_then(|g| safe_div(g, max_dd)));
    m.put_opt(
        "return_over_max_drawdown",
        safe_div(total_return(run.initial_capital, run.final_equity), max_dd),
    );
    m.put_opt("sterling_ratio", growth.and_then(|g| safe_div(g, mean_f64(&depths))));
    m.put_opt(
        "burke_ratio",
        growth.and_then(|g| safe_div(g, depths.iter().map(|d| d * d).sum::<f64>().sqrt())),
    );
    m.put_opt("pain_ratio", growth.and_then(|g| safe_div(g, mean_f64(dd))));
    m.put_opt("martin_ratio", growth.and_then(|g| safe_div(g, ulcer_index(dd))));
    m.put_opt("omega_ratio", omega_ratio(returns));
    m.put_opt("gain_to_pain_ratio", gain_to_pain(returns));
    m.put("downside_deviation", downside * ppy.sqrt());
    m.put("upside_deviation", upside * ppy.sqrt());
    m.put_opt("volatility_skew", safe_div(upside, downside));
    m.put_opt(
        "upside_potential_ratio",
        safe_div(
            returns.iter().map(|r| r.max(0.0)).sum::<f64>() / returns.len().max(1) as f64,
            downside,
        ),
    );
}

fn trade_family(m: &mut MetricSet, run: &RunResult, bars: usize, years: f64) {
    let trades = &run.trades;
    let pnls: Vec<f64> = trades.iter().map(|t| t.net_pnl).collect();
    let wins: Vec<&Trade> = trades.iter().filter(|t| t.is_winner()).collect();
    let losses: Vec<&Trade> = trades.iter().filter(|t| t.net_pnl < 0.0).collect();
    let gross_profit: f64 = wins.iter().map(|t| t.net_pnl).sum();
    let gross_loss: f64 = losses.iter().map(|t| t.net_pnl.abs()).sum();
    let avg_win = mean_opt(&wins.iter().map(|t| t.net_pnl).collect::<Vec<_>>());
    let avg_loss = mean_opt(&losses.iter().map(|t| t.net_pnl).collect::<Vec<_>>());
    let win_rate = win_rate(trades);
    let positions: BTreeSet<u64> = trades.iter().map(|t| t.position_id.0).collect();

    m.put("trade_count", trades.len() as f64);
    m.put("position_count", positions.len() as f64);
    m.put_opt(
        "avg_legs_per_position",
        safe_div(trades.len() as f64, positions.len() as f64),
    );
    m.put("winning_trades", wins.len() as f64);
    m.put("losing_trades", losses.len() as f64);
    m.put(
        "breakeven_trades",
        (trades.len() - wins.len() - losses.len()) as f64,
    );
    m.put_opt("win_rate", win_rate);
    m.put_opt(
        "loss_rate",
        safe_div(losses.len() as f64, trades.len() as f64),
    );
    m.put("gross_profit", gross_profit);
    m.put("gross_loss", gross_loss);
    m.put("gross_pnl_total", trades.iter().map(|t| t.gross_pnl).sum());
    m.put_opt("profit_factor", profit_factor(trades));
    m.put_opt("expectancy", mean_opt(&pnls));
    m.put_opt("avg_win", avg_win);
    m.put_opt("avg_loss", avg_loss);
    m.put_opt("largest_win", pnls.iter().copied().reduce(f64::max).filter(|v| *v > 0.0));
    m.put_opt("largest_loss", pnls.iter().copied().reduce(f64::min).filter(|v| *v < 0.0));
    let payoff = avg_win.zip(avg_loss).and_then(|(w, l)| safe_div(w, l.abs()));
    m.put_opt("payoff_ratio", payoff);
    m.put_opt(
        "kelly_fraction",
        win_rate.zip(payoff).and_then(|(w, p)| safe_div(1.0 - w, p).map(|x| w - x)),
    );
    m.put_opt(
        "expectancy_ratio",
        mean_opt(&pnls).zip(avg_loss).and_then(|(e, l)| safe_div(e, l.abs())),
    );
    m.put_opt("median_trade_pnl", median(&pnls));
    m.put("trade_pnl_std", std_dev(&pnls));
    m.put_opt("sqn", sqn(&pnls));

    let rom: Vec<f64> = trades.iter().map(|t| t.return_on_margin()).collect();
    m.put_opt("avg_trade_return", mean_opt(&rom));
    m.put_opt(
        "avg_win_return",
        mean_opt(&wins.iter().map(|t| t.return_on_margin()).collect::<Vec<_>>()),
    );
    m.put_opt(
        "avg_loss_return",
        mean_opt(&losses.iter().map(|t| t.return_on_margin()).collect::<Vec<_>>()),
    );

    m.put("max_consecutive_wins", max_consecutive(trades, true) as f64);
    m.put("max_consecutive_losses", max_consecutive(trades, false) as f64);
    m.put("avg_winning_streak", avg_streak(trades, true));
    m.put("avg_losing_streak", avg_streak(trades, false));

    let held: Vec<f64> = trades.iter().map(|t| t.bars_held as f64).collect();
    m.put_opt("avg_bars_held", mean_opt(&held));
    m.put("max_bars_held", held.iter().copied().fold(0.0, f64::max));
    m.put_opt(
        "avg_bars_winners",
        mean_opt(&wins.iter().map(|t| t.bars_held as f64).collect::<Vec<_>>()),
    );
    m.put_opt(
        "avg_bars_losers",
        mean_opt(&losses.iter().map(|t| t.bars_held as f64).collect::<Vec<_>>()),
    );
    m.put_opt("exposure_pct", exposure(trades, bars).map(|e| e * 100.0));

    for (side, label) in [(Side::Long, "long"), (Side::Short, "short")] {
        let mut legs: Vec<&Trade> = trades.iter().filter(|t| t.side == side).collect();
        legs.sort_by_key(|t| t.exit_index);
        let won = legs.iter().filter(|t| t.is_winner()).count();
        let side_pnls: Vec<f64> = legs.iter().map(|t| t.net_pnl).collect();
        let (side_profit, side_loss) = gross_split(&side_pnls);
        m.put(&format!("{label}_trades"), legs.len() as f64);
        m.put_opt(
            &format!("{label}_win_rate"),
            safe_div(won as f64, legs.len() as f64),
        );
        m.put(&format!("{label}_net_pnl"), side_pnls.iter().sum());
        m.put(&format!("{label}_gross_profit"), side_profit);
        m.put(&format!("{label}_gross_loss"), side_loss);
        m.put_opt(
            &format!("{label}_profit_factor"),
            capped_profit_factor(side_profit, side_loss, side_pnls.len()),
        );
        m.put_opt(&format!("{label}_avg_pnl"), mean_opt(&side_pnls));
        m.put_opt(
            &format!("{label}_avg_bars_held"),
            mean_opt(&legs.iter().map(|t| t.bars_held as f64).collect::<Vec<_>>()),
        );
        m.put(
            &format!("{label}_max_drawdown"),
            ledger_drawdown(run.initial_capital, &side_pnls),
        );
    }

    let mfe: Vec<f64> = trades.iter().map(|t| t.mfe).collect();
    let mae: Vec<f64> = trades.iter().map(|t| t.mae).collect();
    m.put_opt("avg_mfe", mean_opt(&mfe));
    m.put_opt("avg_mae", mean_opt(&mae));
    m.put_opt("max_mfe", mfe.iter().copied().reduce(f64::max));
    m.put_opt("max_mae", mae.iter().copied().reduce(f64::max));
    m.put_opt("edge_ratio", safe_div(mean_f64(&mfe), mean_f64(&mae)));
    m.put_opt(
        "avg_winner_mfe",
        mean_opt(&wins.iter().map(|t| t.mfe).collect::<Vec<_>>()),
    );
    m.put_opt(
        "avg_winner_mae",
        mean_opt(&wins.iter().map(|t| t.mae).collect::<Vec<_>>()),
    );
    m.put_opt(
        "avg_loser_mfe",
        mean_opt(&losses.iter().map(|t| t.mfe).collect::<Vec<_>>()),
    );
    m.put_opt(
        "avg_loser_mae",
        mean_opt(&losses.iter().map(|t| t.mae).collect::<Vec<_>>()),
    );
    // Share of the best excursion each trade actually kept.
    let capture: Vec<f64> = trades
        .iter()
        .filter(|t| t.mfe > EPS)
        .map(|t| price_return(t) / t.mfe)
        .collect();
    m.put_opt("avg_capture_efficiency", mean_opt(&capture));

    let commission: f64 = trades.iter().map(|t| t.commission).sum();
    m.put("total_commission", commission);
    m.put_opt(
        "commission_to_gross_profit",
        safe_div(commission, trades.iter().map(|t| t.gross_pnl.max(0.0)).sum()),
    );
    m.put_opt(
        "avg_leverage",
        mean_opt(&trades.iter().map(|t| t.leverage).collect::<Vec<_>>()),
    );
    m.put_opt(
        "avg_margin",
        mean_opt(&trades.iter().map(|t| t.margin).collect::<Vec<_>>()),
    );
    m.put_opt("turnover", turnover(trades, run.initial_capital, years));
    m.put_opt("trades_per_year", safe_div(trades.len() as f64, years));

    for reason in ExitReason::ALL {
        let name = reason.as_str();
        let exits: Vec<&Trade> = trades.iter().filter(|t| t.exit_reason == reason).collect();
        let count = exits.len();
        let won = exits.iter().filter(|t| t.is_winner()).count();
        let exit_pnls: Vec<f64> = exits.iter().map(|t| t.net_pnl).collect();
        m.put(&format!("exits_{name}"), count as f64);
        m.put_opt(
            &format!("exits_{name}_pct"),
            safe_div(count as f64 * 100.0, trades.len() as f64),
        );
        m.put(&format!("exits_{name}_net_pnl"), exit_pnls.iter().sum());
        m.put_opt(&format!("exits_{name}_avg_pnl"), mean_opt(&exit_pnls));
        m.put_opt(
            &format!("exits_{name}_win_rate"),
            safe_div(won as f64, count as f64),
        );
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// Total return as a fraction: (final - initial) / initial.
pub fn total_return(initial: f64, final_equity: f64) -> f64 {
    if initial <= 0.0 {
        return 0.0;
    }
    (final_equity - initial) / initial
}

/// Compound annual growth rate over `years`. Undefined for a wiped-out
/// account or a zero-length run.
pub fn cagr(initial: f64, final_equity: f64, years: f64) -> Option<f64> {
    if initial <= 0.0 || final_equity <= 0.0 || years <= 0.0 {
        return None;
    }
    Some((final_equity / initial).powf(1.0 / years) - 1.0)
}

/// Annualized Sharpe ratio of per-bar returns (zero risk-free rate).
pub fn sharpe_ratio(returns: &[f64], periods_per_year: f64) -> Option<f64> {
    if returns.len() < 2 {
        return None;
    }
    let std = std_dev(returns);
    safe_div(mean_f64(returns), std).map(|s| s * periods_per_year.sqrt())
}

/// Annualized Sortino ratio (downside deviation only).
pub fn sortino_ratio(returns: &[f64], periods_per_year: f64) -> Option<f64> {
    if returns.len() < 2 {
        return None;
    }
    safe_div(mean_f64(returns), downside_deviation(returns)).map(|s| s * periods_per_year.sqrt())
}

/// Largest peak-to-trough loss in currency.
pub fn max_drawdown_abs(equity: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0_f64;
    for &eq in equity {
        peak = peak.max(eq);
        worst = worst.max(peak - eq);
    }
    worst
}

/// Win rate: fraction of trades that were winners.
pub fn win_rate(trades: &[Trade]) -> Option<f64> {
    let winners = trades.iter().filter(|t| t.is_winner()).count();
    safe_div(winners as f64, trades.len() as f64)
}

/// Profit factor: gross profits / gross losses.
///
/// Capped at 100.0 when there are profits but no losses.
pub fn profit_factor(trades: &[Trade]) -> Option<f64> {
    let pnls: Vec<f64> = trades.iter().map(|t| t.net_pnl).collect();
    let (gross_profit, gross_loss) = gross_split(&pnls);
    capped_profit_factor(gross_profit, gross_loss, pnls.len())
}

fn capped_profit_factor(gross_profit: f64, gross_loss: f64, trades: usize) -> Option<f64> {
    if trades == 0 {
        return None;
    }
    if gross_loss < 1e-10 {
        return (gross_profit > 0.0).then_some(100.0);
    }
    Some((gross_profit / gross_loss).min(100.0))
}

/// (sum of gains, sum of |losses|).
fn gross_split(pnls: &[f64]) -> (f64, f64) {
    let profit = pnls.iter().map(|p| p.max(0.0)).sum();
    let loss = pnls.iter().map(|p| (-p).max(0.0)).sum();
    (profit, loss)
}

/// Price move captured by a trade, as a fraction of its entry (unlevered).
fn price_return(trade: &Trade) -> f64 {
    if trade.entry_price <= 0.0 {
        return 0.0;
    }
    trade.side.sign() * (trade.exit_price - trade.entry_price) / trade.entry_price
}

/// Max drawdown fraction of `initial` plus the cumulative `pnls`, in order.
pub fn ledger_drawdown(initial: f64, pnls: &[f64]) -> f64 {
    let mut curve = Vec::with_capacity(pnls.len() + 1);
    let mut equity = initial;
    curve.push(equity);
    for pnl in pnls {
        equity += pnl;
        curve.push(equity);
    }
    drawdown_series(&curve).into_iter().fold(0.0, f64::max)
}

/// Annual turnover: traded notional / initial capital / years.
pub fn turnover(trades: &[Trade], initial_capital: f64, years: f64) -> Option<f64> {
    if initial_capital <= 0.0 {
        return None;
    }
    let notional: f64 = trades
        .iter()
        .map(|t| (t.entry_price + t.exit_price) * t.quantity)
        .sum();
    safe_div(notional / initial_capital, years)
}

/// System quality number: sqrt(n) * mean / std of trade PnL.
pub fn sqn(pnls: &[f64]) -> Option<f64> {
    if pnls.len() < 2 {
        return None;
    }
    safe_div(mean_f64(pnls), std_dev(pnls)).map(|x| x * (pnls.len() as f64).sqrt())
}

/// Sum of gains over sum of losses, per bar.
pub fn omega_ratio(returns: &[f64]) -> Option<f64> {
    let gains: f64 = returns.iter().filter(|r| **r > 0.0).sum();
    let losses: f64 = returns.iter().filter(|r| **r < 0.0).map(|r| r.abs()).sum();
    safe_div(gains, losses)
}

/// Net sum of returns over the sum of losing returns.
pub fn gain_to_pain(returns: &[f64]) -> Option<f64> {
    let losses: f64 = returns.iter().filter(|r| **r < 0.0).map(|r| r.abs()).sum();
    safe_div(returns.iter().sum(), losses)
}

/// Root-mean-square of drawdown fractions.
pub fn ulcer_index(dd: &[f64]) -> f64 {
    if dd.is_empty() {
        return 0.0;
    }
    (dd.iter().map(|d| d * d).sum::<f64>() / dd.len() as f64).sqrt()
}

/// Fraction of bars covered by at least one open position.
pub fn exposure(trades: &[Trade], bars: usize) -> Option<f64> {
    if bars == 0 {
        return None;
    }
    let mut held = vec![false; bars];
    for t in trades {
        let end = t.exit_index.min(bars);
        for slot in held.iter_mut().take(end).skip(t.entry_index) {
            *slot = true;
        }
    }
    Some(held.iter().filter(|h| **h).count() as f64 / bars as f64)
}

fn max_consecutive(trades: &[Trade], winners: bool) -> usize {
    let mut max_streak = 0;
    let mut current = 0;
    for trade in trades {
        if trade.is_winner() == winners {
            current += 1;
            max_streak = max_streak.max(current);
        } else {
            current = 0;
        }
    }
    max_streak
}

fn avg_streak(trades: &[Trade], winners: bool) -> f64 {
    let mut streaks: Vec<usize> = Vec::new();
    let mut current = 0;
    for trade in trades {
        if trade.is_winner() == winners {
            current += 1;
        } else if current > 0 {
            streaks.push(current);
            current = 0;
        }
    }
    if current > 0 {
        streaks.push(current);
    }
    if streaks.is_empty() {
        return 0.0;
    }
    streaks.iter().sum::<usize>() as f64 / streaks.len() as f64
}

// ─── Series helpers ─────────────────────────────────────────────────

/// Compounded return of each calendar period, in time order. A period runs
/// from the previous period's last equity (the initial capital for the first)
/// to its own last equity.
pub fn period_returns<K: PartialEq>(run: &RunResult, key: impl Fn(&DateTime<Utc>) -> K) -> Vec<f64> {
    let mut out = Vec::new();
    let mut base = run.initial_capital;
    let mut points = run.equity_curve.iter().peekable();
    while let Some(point) = points.next() {
        let period = key(&point.time);
        let mut last = point.equity;
        while let Some(next) = points.next_if(|p| key(&p.time) == period) {
            last = next.equity;
        }
        out.push(if base > 0.0 { last / base - 1.0 } else { 0.0 });
        base = last;
    }
    out
}

/// Least-squares line through `ys` against `0..n`.
#[derive(Debug, Clone, Copy)]
struct LineFit {
    slope: f64,
    slope_se: f64,
    /// Undefined for a flat series.
    r_squared: Option<f64>,
}

fn linear_fit(ys: &[f64]) -> Option<LineFit> {
    let n = ys.len();
    if n < 3 {
        return None;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean_f64(ys);
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for (i, y) in ys.iter().enumerate() {
        let dx = i as f64 - x_mean;
        let dy = y - y_mean;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    let slope = sxy / sxx;
    let ss_res = (syy - slope * sxy).max(0.0);
    Some(LineFit {
        slope,
        slope_se: (ss_res / (n - 2) as f64 / sxx).sqrt(),
        r_squared: safe_div(ss_res, syy).map(|u| 1.0 - u),
    })
}

/// Equity values with the initial capital prepended, so the first bar's
/// return (entry commission, first mark) is counted.
pub fn equity_with_start(run: &RunResult) -> Vec<f64> {
    let mut equity = Vec::with_capacity(run.equity_curve.len() + 1);
    equity.push(run.initial_capital);
    equity.extend(run.equity_curve.iter().map(|p| p.equity));
    equity
}

/// Simple per-bar returns. A non-positive base yields a zero return.
pub fn bar_returns(equity: &[f64]) -> Vec<f64> {
    equity
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

/// Drawdown from running peak, as a non-negative fraction per point.
pub fn drawdown_series(equity: &[f64]) -> Vec<f64> {
    let mut peak = f64::MIN;
    equity
        .iter()
        .map(|&eq| {
            peak = peak.max(eq);
            if peak > 0.0 {
                ((peak - eq) / peak).max(0.0)
            } else {
                0.0
            }
        })
        .collect()
}

/// One contiguous stretch below the running peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawdownEpisode {
    pub bars: usize,
    pub depth: f64,
}

pub fn drawdown_episodes(dd: &[f64]) -> Vec<DrawdownEpisode> {
    let mut out = Vec::new();
    let mut current: Option<DrawdownEpisode> = None;
    for &d in dd {
        if d > 0.0 {
            let ep = current.get_or_insert(DrawdownEpisode {
                bars: 0,
                depth: 0.0,
            });
            ep.bars += 1;
            ep.depth = ep.depth.max(d);
        } else if let Some(ep) = current.take() {
            out.push(ep);
        }
    }
    out.extend(current);
    out
}

fn downside_deviation(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let sq: f64 = returns.iter().filter(|r| **r < 0.0).map(|r| r * r).sum();
    (sq / returns.len() as f64).sqrt()
}

fn upside_deviation(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let sq: f64 = returns.iter().filter(|r| **r > 0.0).map(|r| r * r).sum();
    (sq / returns.len() as f64).sqrt()
}

// ─── Numeric helpers ────────────────────────────────────────────────

/// `num / den`, undefined when the denominator vanishes or the result is not finite.
pub fn safe_div(num: f64, den: f64) -> Option<f64> {
    if den.abs() < EPS {
        return None;
    }
    let v = num / den;
    v.is_finite().then_some(v)
}

pub(crate) fn mean_f64(values: &[f64]) -> f64 {
    mean_opt(values).unwrap_or(0.0)
}

pub(crate) fn mean_opt(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n - 1).
pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(percentile_sorted(&sorted, 50.0))
}

fn fraction(values: &[f64], pred: impl Fn(f64) -> bool) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().filter(|v| pred(**v)).count() as f64 / values.len() as f64)
}

/// Percentile `p` (0..=100) of an ascending slice, linear interpolation.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if n == 1 {
        return sorted[0];
    }
    let rank = (p / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    let frac = rank - lo as f64;
    sorted[lo] + frac * (sorted[hi] - sorted[lo])
}
