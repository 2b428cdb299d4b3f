//! Trades (one closed leg of a position each) and equity curve points.

use super::ids::PositionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1.0 for long, -1.0 for short. PnL = sign * (exit - entry) * qty.
    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

/// Why a trade leg was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    Trailing,
    Signal,
    Time,
    Liquidation,
    DrawdownKill,
}

impl ExitReason {
    pub const ALL: [ExitReason; 7] = [
        ExitReason::TakeProfit,
        ExitReason::StopLoss,
        ExitReason::Trailing,
        ExitReason::Signal,
        ExitReason::Time,
        ExitReason::Liquidation,
        ExitReason::DrawdownKill,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::Trailing => "trailing",
            ExitReason::Signal => "signal",
            ExitReason::Time => "time",
            ExitReason::Liquidation => "liquidation",
            ExitReason::DrawdownKill => "drawdown_kill",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable closed trade leg.
///
/// A position closed through a take-profit ladder produces one `Trade` per
/// leg; all legs share `position_id` and their `close_fraction`s sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub position_id: PositionId,
    pub side: Side,

    // ── Entry ──
    pub entry_index: usize,
    pub entry_time: DateTime<Utc>,
    /// Weighted-average entry price of the position at the time of this exit.
    pub entry_price: f64,

    // ── Exit ──
    pub exit_index: usize,
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    pub exit_reason: ExitReason,

    // ── Size ──
    pub quantity: f64,
    /// Fraction of the position's total entered quantity closed by this leg.
    pub close_fraction: f64,
    pub leverage: f64,
    /// Margin released by this leg.
    pub margin: f64,

    // ── PnL ──
    pub gross_pnl: f64,
    /// Entry commission allocated to this leg plus the exit commission.
    pub commission: f64,
    pub net_pnl: f64,

    // ── Excursion ──
    /// Maximum favorable excursion as a fraction of entry price.
    pub mfe: f64,
    /// Maximum adverse excursion as a fraction of entry price (>= 0).
    pub mae: f64,

    pub bars_held: usize,
}

impl Trade {
    pub fn is_winner(&self) -> bool {
        self.net_pnl > 0.0
    }

    /// Net PnL relative to the margin committed to this leg.
    pub fn return_on_margin(&self) -> f64 {
        if self.margin <= 0.0 {
            return 0.0;
        }
        self.net_pnl / self.margin
    }
}

/// One equity observation per candle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub time: DateTime<Utc>,
    /// cash + margin held + unrealized PnL, marked at the candle close.
    pub equity: f64,
    /// (peak - equity) / peak, as a fraction >= 0.
    pub drawdown_from_peak: f64,
}
