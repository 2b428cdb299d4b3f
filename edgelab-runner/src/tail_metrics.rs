//! Tail risk metrics: VaR, CVaR, distribution moments, tail ratio.
//!
//! Shape statistics of the per-bar return distribution plus a few trade-level
//! tail measures. Pure functions: returns in, scalar out. Below
//! `MIN_RETURN_OBSERVATIONS` bars every return-based tail metric is undefined.

use edgelab_core::domain::Trade;

use crate::metrics::{mean_f64, percentile_sorted, std_dev, MetricSet};

/// Fewest bar returns a tail estimate is reported for.
pub const MIN_RETURN_OBSERVATIONS: usize = 20;

/// Add every tail metric to `m`.
pub fn insert_all(m: &mut MetricSet, returns: &[f64], trades: &[Trade]) {
    let enough = returns.len() >= MIN_RETURN_OBSERVATIONS;
    let mut sorted = returns.to_vec();
    sorted.sort_by(f64::total_cmp);
    let gate = |v: Option<f64>| if enough { v } else { None };

    m.put_opt("var_95", gate(value_at_risk(&sorted, 0.95)));
    m.put_opt("var_99", gate(value_at_risk(&sorted, 0.99)));
    m.put_opt("cvar_95", gate(cvar(&sorted, 0.95)));
    m.put_opt("cvar_99", gate(cvar(&sorted, 0.99)));
    m.put_opt("skewness", gate(skewness(returns)));
    m.put_opt("kurtosis", gate(excess_kurtosis(returns)));
    m.put_opt("downside_deviation_ratio", gate(downside_deviation_ratio(returns)));
    m.put_opt("tail_ratio", gate(tail_ratio(&sorted)));
    m.put_opt("common_sense_ratio", gate(common_sense_ratio(&sorted)));

    let mut pnl: Vec<f64> = trades.iter().map(|t| t.net_pnl).collect();
    pnl.sort_by(f64::total_cmp);
    m.put_opt("worst_trade_cvar_10", cvar(&pnl, 0.90));
    m.put(
        "trades_below_minus_2std",
        trades_beyond(&pnl, -2.0) as f64,
    );
}

/// Historical VaR at `confidence`, as a positive loss fraction.
///
/// `sorted` must be ascending.
pub fn value_at_risk(sorted: &[f64], confidence: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    Some(-percentile_sorted(sorted, (1.0 - confidence) * 100.0))
}

/// Conditional VaR: mean of the worst `1 - confidence` share (at least one
/// observation), as a positive loss. `sorted` must be ascending.
pub fn cvar(sorted: &[f64], confidence: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    // Epsilon absorbs float error in `1 - confidence` (100 * 0.05 must be 5).
    let share = sorted.len() as f64 * (1.0 - confidence);
    let cutoff = ((share - 1e-9).ceil() as usize).clamp(1, sorted.len());
    Some(-mean_f64(&sorted[..cutoff]))
}

/// Third standardized moment (population form over the sample std).
pub fn skewness(returns: &[f64]) -> Option<f64> {
    let std = std_dev(returns);
    if returns.len() < 3 || std < 1e-15 {
        return None;
    }
    let mean = mean_f64(returns);
    let n = returns.len() as f64;
    Some(returns.iter().map(|r| ((r - mean) / std).powi(3)).sum::<f64>() / n)
}

/// Fourth standardized moment minus 3.
pub fn excess_kurtosis(returns: &[f64]) -> Option<f64> {
    let std = std_dev(returns);
    if returns.len() < 4 || std < 1e-15 {
        return None;
    }
    let mean = mean_f64(returns);
    let n = returns.len() as f64;
    Some(returns.iter().map(|r| ((r - mean) / std).powi(4)).sum::<f64>() / n - 3.0)
}

/// Downside deviation over total deviation. Full n in the denominator,
/// matching the Sortino convention.
pub fn downside_deviation_ratio(returns: &[f64]) -> Option<f64> {
    let total = std_dev(returns);
    if total < 1e-15 {
        return None;
    }
    let n = returns.len() as f64;
    let sq: f64 = returns.iter().filter(|r| **r < 0.0).map(|r| r * r).sum();
    Some((sq / n).sqrt() / total)
}

/// 95th percentile over the magnitude of the 5th.
pub fn tail_ratio(sorted: &[f64]) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let p5 = percentile_sorted(sorted, 5.0).abs();
    if p5 < 1e-15 {
        return None;
    }
    Some(percentile_sorted(sorted, 95.0) / p5)
}

/// Tail ratio scaled by the gain-to-loss sum ratio.
pub fn common_sense_ratio(sorted: &[f64]) -> Option<f64> {
    let gains: f64 = sorted.iter().filter(|r| **r > 0.0).sum();
    let losses: f64 = sorted.iter().filter(|r| **r < 0.0).map(|r| r.abs()).sum();
    if losses < 1e-15 {
        return None;
    }
    tail_ratio(sorted).map(|t| t * gains / losses)
}

fn trades_beyond(values: &[f64], z: f64) -> usize {
    let std = std_dev(values);
    if std < 1e-15 {
        return 0;
    }
    let mean = mean_f64(values);
    values.iter().filter(|v| (**v - mean) / std < z).count()
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut v: Vec<f64>) -> Vec<f64> {
        v.sort_by(f64::total_cmp);
        v
    }

    #[test]
    fn cvar_takes_worst_tail() {
        // 100 returns: -0.10 .. -0.01 then zeros; worst 5 average -0.08.
        let mut r: Vec<f64> = (1..=10).map(|i| -0.01 * i as f64).collect();
        r.extend(std::iter::repeat(0.0).take(90));
        let s = sorted(r);
        let c = cvar(&s, 0.95).unwrap();
        assert!((c - 0.08).abs() < 1e-10, "got {c}");
    }

    #[test]
    fn cvar_uses_at_least_one_observation() {
        let s = sorted(vec![-0.05, 0.01, 0.02]);
        assert!((cvar(&s, 0.99).unwrap() - 0.05).abs() < 1e-12);
    }

    #[test]
    fn var_is_loss_quantile() {
        let s: Vec<f64> = (0..=100).map(|i| (i as f64 - 50.0) / 1000.0).collect();
        let v = value_at_risk(&s, 0.95).unwrap();
        assert!((v - 0.045).abs() < 1e-10, "got {v}");
    }

    #[test]
    fn symmetric_returns_have_zero_skew() {
        let r: Vec<f64> = (0..100).map(|i| if i % 2 == 0 { 0.01 } else { -0.01 }).collect();
        assert!(skewness(&r).unwrap().abs() < 1e-10);
    }

    #[test]
    fn left_tail_is_negative_skew() {
        let mut r = vec![0.001; 99];
        r.push(-0.2);
        assert!(skewness(&r).unwrap() < -1.0);
        assert!(excess_kurtosis(&r).unwrap() > 3.0);
    }

    #[test]
    fn constant_returns_undefined_moments() {
        let r = vec![0.01; 50];
        assert!(skewness(&r).is_none());
        assert!(excess_kurtosis(&r).is_none());
        assert!(downside_deviation_ratio(&r).is_none());
    }

    #[test]
    fn short_series_gated() {
        let mut m = MetricSet::new();
        insert_all(&mut m, &[0.01, -0.02, 0.03], &[]);
        assert!(m.value("cvar_95").is_none());
        assert!(m.value("skewness").is_none());
        assert_eq!(m.value("trades_below_minus_2std"), Some(0.0));
    }
}
