//! Strategy configuration (sizing, leverage, costs, protective levels and
//! the DCA grid) plus the validation that runs before any simulation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which entry directions the engine accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Long,
    Short,
    Both,
}

impl Direction {
    pub fn allows_long(self) -> bool {
        matches!(self, Direction::Long | Direction::Both)
    }

    pub fn allows_short(self) -> bool {
        matches!(self, Direction::Short | Direction::Both)
    }
}

/// How much margin an entry commits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderSizing {
    /// Fixed margin amount per entry.
    Fixed { margin: f64 },
    /// Percentage (0, 100] of current equity per entry.
    EquityPercent { pct: f64 },
}

impl Default for OrderSizing {
    fn default() -> Self {
        OrderSizing::EquityPercent { pct: 100.0 }
    }
}

/// One rung of the take-profit ladder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitLevel {
    /// Favorable move from the average entry, in percent.
    pub offset_pct: f64,
    /// Fraction (0, 1] of the remaining size to close when touched.
    pub close_fraction: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingStop {
    /// Favorable move from the average entry (percent) that arms the trail.
    pub activation_pct: f64,
    /// Distance behind the best price (percent).
    pub distance_pct: f64,
}

/// DCA grid: a base order plus a ladder of safety orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcaGrid {
    /// Total margin budget of the ladder (base + all safety orders).
    pub deposit: f64,
    pub base_order_size: f64,
    pub safety_order_size: f64,
    pub safety_order_count: usize,
    #[serde(default = "one")]
    pub martingale_multiplier: f64,
    /// Deviation of the first safety order from the first fill, in percent.
    pub step_pct: f64,
    /// Geometric scale applied to each successive step (log step).
    #[serde(default = "one")]
    pub step_scale: f64,
    /// Close the whole ladder once floating loss reaches this percent of margin.
    #[serde(default)]
    pub max_drawdown_kill_pct: Option<f64>,
}

fn one() -> f64 {
    1.0
}

impl DcaGrid {
    /// Margin committed by safety order `k` (1-based): `safety * m^(k-1)`.
    pub fn safety_order_margin(&self, k: usize) -> f64 {
        self.safety_order_size * self.martingale_multiplier.powi(k as i32 - 1)
    }

    pub fn safety_order_sizes(&self) -> Vec<f64> {
        (1..=self.safety_order_count)
            .map(|k| self.safety_order_margin(k))
            .collect()
    }

    /// Cumulative deviation (percent) of safety order `k` from the first fill:
    /// `step * (1 + s + ... + s^(k-1))`.
    pub fn safety_order_deviation_pct(&self, k: usize) -> f64 {
        (0..k).map(|i| self.step_pct * self.step_scale.powi(i as i32)).sum()
    }
}

/// Intrabar tie-break policy when several levels lie inside one candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FillPolicy {
    /// Adverse extreme first. The conservative default.
    #[default]
    StopLossFirst,
    /// Favorable extreme first.
    TakeProfitFirst,
    /// O→H→L→C when the open is nearer the high, else O→L→H→C.
    PathInterpolation,
}

/// Complete per-run strategy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub direction: Direction,
    pub initial_capital: f64,
    pub sizing: OrderSizing,
    pub leverage: f64,
    /// Fraction of notional charged on every fill.
    pub commission_rate: f64,
    /// Adverse slippage in percent applied to market and stop fills.
    pub slippage_pct: f64,
    pub stop_loss_pct: Option<f64>,
    pub take_profits: Vec<TakeProfitLevel>,
    pub trailing_stop: Option<TrailingStop>,
    pub dca: Option<DcaGrid>,
    pub fill_policy: FillPolicy,
    /// Fraction [0, 1) of margin kept back when computing the liquidation price.
    pub liquidation_buffer_pct: f64,
    pub max_bars_in_trade: Option<usize>,
    pub close_at_end: bool,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            direction: Direction::Long,
            initial_capital: 10_000.0,
            sizing: OrderSizing::default(),
            leverage: 1.0,
            commission_rate: 0.0,
            slippage_pct: 0.0,
            stop_loss_pct: None,
            take_profits: Vec::new(),
            trailing_stop: None,
            dca: None,
            fill_policy: FillPolicy::default(),
            liquidation_buffer_pct: 0.0,
            max_bars_in_trade: None,
            close_at_end: true,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("leverage must be >= 1, got {0}")]
    Leverage(f64),
    #[error("initial capital must be positive and finite, got {0}")]
    InitialCapital(f64),
    #[error("{field} must be finite and >= 0, got {value}")]
    NegativeRate { field: &'static str, value: f64 },
    #[error("stop loss must be > 0, got {0}")]
    StopLoss(f64),
    #[error("take-profit level {index}: {reason}")]
    TakeProfit { index: usize, reason: String },
    #[error("take-profit close fractions sum to {0} > 1")]
    TakeProfitFractions(f64),
    #[error("trailing stop: {0}")]
    Trailing(String),
    #[error("order sizing: {0}")]
    Sizing(String),
    #[error("dca grid: {0}")]
    Dca(String),
    #[error("liquidation buffer must be in [0, 1), got {0}")]
    LiquidationBuffer(f64),
    #[error("max_bars_in_trade must be >= 1")]
    MaxBars,
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::NegativeRate { field, value });
    }
    Ok(())
}

impl StrategyConfig {
    /// Reject malformed configurations before any simulation starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.leverage.is_finite() || self.leverage < 1.0 {
            return Err(ConfigError::Leverage(self.leverage));
        }
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(ConfigError::InitialCapital(self.initial_capital));
        }
        non_negative("commission_rate", self.commission_rate)?;
        non_negative("slippage_pct", self.slippage_pct)?;

        match self.sizing {
            OrderSizing::Fixed { margin } if !margin.is_finite() || margin <= 0.0 => {
                return Err(ConfigError::Sizing(format!("fixed margin must be > 0, got {margin}")));
            }
            OrderSizing::EquityPercent { pct } if !(pct > 0.0 && pct <= 100.0) => {
                return Err(ConfigError::Sizing(format!(
                    "equity percent must be in (0, 100], got {pct}"
                )));
            }
            _ => {}
        }

        if let Some(sl) = self.stop_loss_pct {
            if !sl.is_finite() || sl <= 0.0 {
                return Err(ConfigError::StopLoss(sl));
            }
        }

        let mut fraction_sum = 0.0;
        let mut prev_offset = 0.0;
        for (index, tp) in self.take_profits.iter().enumerate() {
            if !tp.offset_pct.is_finite() || tp.offset_pct <= 0.0 {
                return Err(ConfigError::TakeProfit {
                    index,
                    reason: format!("offset must be > 0, got {}", tp.offset_pct),
                });
            }
            if tp.offset_pct <= prev_offset {
                return Err(ConfigError::TakeProfit {
                    index,
                    reason: "offsets must be strictly increasing".into(),
                });
            }
            if !(tp.close_fraction > 0.0 && tp.close_fraction <= 1.0) {
                return Err(ConfigError::TakeProfit {
                    index,
                    reason: format!("close fraction must be in (0, 1], got {}", tp.close_fraction),
                });
            }
            prev_offset = tp.offset_pct;
            fraction_sum += tp.close_fraction;
        }
        if fraction_sum > 1.0 + 1e-9 {
            return Err(ConfigError::TakeProfitFractions(fraction_sum));
        }

        if let Some(tr) = self.trailing_stop {
            if !tr.activation_pct.is_finite() || tr.activation_pct < 0.0 {
                return Err(ConfigError::Trailing(format!(
                    "activation must be >= 0, got {}",
                    tr.activation_pct
                )));
            }
            if !tr.distance_pct.is_finite() || tr.distance_pct <= 0.0 || tr.distance_pct >= 100.0 {
                return Err(ConfigError::Trailing(format!(
                    "distance must be in (0, 100), got {}",
                    tr.distance_pct
                )));
            }
        }

        if let Some(dca) = &self.dca {
            validate_dca(dca)?;
        }

        if !(0.0..1.0).contains(&self.liquidation_buffer_pct) {
            return Err(ConfigError::LiquidationBuffer(self.liquidation_buffer_pct));
        }
        if self.max_bars_in_trade == Some(0) {
            return Err(ConfigError::MaxBars);
        }
        Ok(())
    }
}

fn validate_dca(dca: &DcaGrid) -> Result<(), ConfigError> {
    let positive = [
        ("deposit", dca.deposit),
        ("base_order_size", dca.base_order_size),
        ("martingale_multiplier", dca.martingale_multiplier),
        ("step_scale", dca.step_scale),
    ];
    for (name, v) in positive {
        if !v.is_finite() || v <= 0.0 {
            return Err(ConfigError::Dca(format!("{name} must be > 0, got {v}")));
        }
    }
    if dca.safety_order_count > 0 {
        if !dca.safety_order_size.is_finite() || dca.safety_order_size <= 0.0 {
            return Err(ConfigError::Dca(format!(
                "safety_order_size must be > 0, got {}",
                dca.safety_order_size
            )));
        }
        if !dca.step_pct.is_finite() || dca.step_pct <= 0.0 {
            return Err(ConfigError::Dca(format!("step_pct must be > 0, got {}", dca.step_pct)));
        }
        if dca.safety_order_deviation_pct(dca.safety_order_count) >= 100.0 {
            return Err(ConfigError::Dca("deepest safety order deviates >= 100%".into()));
        }
    }
    if dca.base_order_size > dca.deposit {
        return Err(ConfigError::Dca(format!(
            "base order {} exceeds deposit {}",
            dca.base_order_size, dca.deposit
        )));
    }
    if let Some(kill) = dca.max_drawdown_kill_pct {
        if !kill.is_finite() || kill <= 0.0 {
            return Err(ConfigError::Dca(format!("max_drawdown_kill_pct must be > 0, got {kill}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> DcaGrid {
        DcaGrid {
            deposit: 1_000.0,
            base_order_size: 100.0,
            safety_order_size: 100.0,
            safety_order_count: 3,
            martingale_multiplier: 1.5,
            step_pct: 1.0,
            step_scale: 2.0,
            max_drawdown_kill_pct: None,
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert_eq!(StrategyConfig::default().validate(), Ok(()));
    }

    #[test]
    fn leverage_below_one_rejected() {
        let cfg = StrategyConfig {
            leverage: 0.5,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::Leverage(0.5)));
    }

    #[test]
    fn zero_stop_loss_rejected() {
        let cfg = StrategyConfig {
            stop_loss_pct: Some(0.0),
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::StopLoss(0.0)));
    }

    #[test]
    fn take_profit_fractions_over_one_rejected() {
        let cfg = StrategyConfig {
            take_profits: vec![
                TakeProfitLevel { offset_pct: 1.0, close_fraction: 0.6 },
                TakeProfitLevel { offset_pct: 2.0, close_fraction: 0.6 },
            ],
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::TakeProfitFractions(_))));
    }

    #[test]
    fn martingale_sizes() {
        assert_eq!(grid().safety_order_sizes(), vec![100.0, 150.0, 225.0]);
    }

    #[test]
    fn log_step_deviations_are_cumulative() {
        let g = grid();
        assert!((g.safety_order_deviation_pct(1) - 1.0).abs() < 1e-12);
        assert!((g.safety_order_deviation_pct(2) - 3.0).abs() < 1e-12);
        assert!((g.safety_order_deviation_pct(3) - 7.0).abs() < 1e-12);
    }

    #[test]
    fn dca_base_over_deposit_rejected() {
        let cfg = StrategyConfig {
            dca: Some(DcaGrid {
                base_order_size: 2_000.0,
                ..grid()
            }),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Dca(_))));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: StrategyConfig = serde_json::from_str(r#"{"leverage": 3.0}"#).unwrap();
        assert_eq!(cfg.leverage, 3.0);
        assert!(cfg.close_at_end);
        assert_eq!(cfg.fill_policy, FillPolicy::StopLossFirst);
    }
}
