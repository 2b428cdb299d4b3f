//! Open-position state: fills, weighted-average entry, protective levels and
//! trade-leg bookkeeping.
//!
//! Every level is derived on demand from the current average entry, remaining
//! quantity and margin, so a safety-order fill or a take-profit leg moves the
//! stop-loss, take-profit, liquidation and kill levels with it.

use chrono::{DateTime, Utc};

use super::execution::{CostModel, OrderSide};
use crate::domain::{ExitReason, PositionId, Side, StrategyConfig, Trade};

/// Remaining quantity below this fraction of the entered quantity counts as closed.
pub(crate) const DUST_FRACTION: f64 = 1e-9;

/// Kinds of intrabar level. Declaration order is the tie-break priority when
/// several levels trigger at the same point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum LevelKind {
    StopLoss,
    Trailing,
    DrawdownKill,
    Liquidation,
    SafetyOrder,
    TakeProfit,
}

/// Direction price must travel to touch a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Trigger {
    AtOrBelow,
    AtOrAbove,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Level {
    pub kind: LevelKind,
    pub price: f64,
    pub trigger: Trigger,
}

/// Outcome of closing part of a position.
pub(crate) struct LegFill {
    /// Cash returned to the account: released margin + gross PnL - exit commission.
    pub cash_in: f64,
    pub closed: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct Position {
    pub id: PositionId,
    pub side: Side,
    pub entry_index: usize,
    pub entry_time: DateTime<Utc>,
    pub avg_entry: f64,
    pub qty: f64,
    pub margin: f64,
    pub leverage: f64,
    /// Entry commission not yet allocated to a closed leg.
    entry_commission: f64,
    /// Total quantity ever filled into this position.
    entered_qty: f64,
    /// Price of the very first fill; the DCA ladder is anchored on it.
    pub first_fill: f64,
    /// Total margin committed by all fills (the ladder's deposit usage).
    pub committed_margin: f64,
    pub safety_filled: usize,
    pub ladder_exhausted: bool,
    pub tp_next: usize,
    pub trail_stop: Option<f64>,
    /// Best and worst prices seen since entry.
    best: f64,
    worst: f64,
    legs: Vec<Trade>,
}

impl Position {
    /// Open a position with `margin` at `price`. Returns the position and the
    /// cash it consumes (margin + entry commission).
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        id: PositionId,
        side: Side,
        index: usize,
        time: DateTime<Utc>,
        price: f64,
        margin: f64,
        leverage: f64,
        costs: &CostModel,
    ) -> (Self, f64) {
        let qty = margin * leverage / price;
        let commission = costs.commission(price, qty);
        let pos = Self {
            id,
            side,
            entry_index: index,
            entry_time: time,
            avg_entry: price,
            qty,
            margin,
            leverage,
            entry_commission: commission,
            entered_qty: qty,
            first_fill: price,
            committed_margin: margin,
            safety_filled: 0,
            ladder_exhausted: false,
            tp_next: 0,
            trail_stop: None,
            best: price,
            worst: price,
            legs: Vec::new(),
        };
        (pos, margin + commission)
    }

    /// Add to the position (safety order). Returns the cash consumed.
    pub fn add(&mut self, price: f64, margin: f64, costs: &CostModel) -> f64 {
        let qty = margin * self.leverage / price;
        let commission = costs.commission(price, qty);
        self.avg_entry = (self.avg_entry * self.qty + price * qty) / (self.qty + qty);
        self.qty += qty;
        self.entered_qty += qty;
        self.margin += margin;
        self.committed_margin += margin;
        self.entry_commission += commission;
        self.observe(price);
        margin + commission
    }

    /// Track the best and worst prices since entry.
    pub fn observe(&mut self, price: f64) {
        match self.side {
            Side::Long => {
                self.best = self.best.max(price);
                self.worst = self.worst.min(price);
            }
            Side::Short => {
                self.best = self.best.min(price);
                self.worst = self.worst.max(price);
            }
        }
    }

    pub fn unrealized_pnl(&self, mark: f64) -> f64 {
        self.side.sign() * (mark - self.avg_entry) * self.qty
    }

    /// Arm and ratchet the trailing stop from the best price so far.
    pub fn update_trailing(&mut self, config: &StrategyConfig) {
        let Some(trail) = config.trailing_stop else {
            return;
        };
        let act = trail.activation_pct / 100.0;
        let dist = trail.distance_pct / 100.0;
        match self.side {
            Side::Long => {
                if self.best >= self.avg_entry * (1.0 + act) {
                    let level = self.best * (1.0 - dist);
                    self.trail_stop = Some(self.trail_stop.map_or(level, |t| t.max(level)));
                }
            }
            Side::Short => {
                if self.best <= self.avg_entry * (1.0 - act) {
                    let level = self.best * (1.0 + dist);
                    self.trail_stop = Some(self.trail_stop.map_or(level, |t| t.min(level)));
                }
            }
        }
    }

    /// All levels active right now.
    pub fn levels(&self, config: &StrategyConfig) -> Vec<Level> {
        let s = self.side.sign();
        // Adverse levels sit below a long / above a short.
        let adverse = match self.side {
            Side::Long => Trigger::AtOrBelow,
            Side::Short => Trigger::AtOrAbove,
        };
        let favorable = match self.side {
            Side::Long => Trigger::AtOrAbove,
            Side::Short => Trigger::AtOrBelow,
        };
        let mut out = Vec::with_capacity(6);

        if let Some(sl) = config.stop_loss_pct {
            out.push(Level {
                kind: LevelKind::StopLoss,
                price: self.avg_entry * (1.0 - s * sl / 100.0),
                trigger: adverse,
            });
        }
        if let Some(price) = self.trail_stop {
            out.push(Level {
                kind: LevelKind::Trailing,
                price,
                trigger: adverse,
            });
        }
        if self.qty > 0.0 {
            let liq = self.avg_entry - s * self.margin * (1.0 - config.liquidation_buffer_pct) / self.qty;
            if liq > 0.0 {
                out.push(Level {
                    kind: LevelKind::Liquidation,
                    price: liq,
                    trigger: adverse,
                });
            }
        }
        if let Some(dca) = &config.dca {
            if let Some(kill) = dca.max_drawdown_kill_pct {
                if self.qty > 0.0 {
                    let price = self.avg_entry - s * (kill / 100.0) * self.margin / self.qty;
                    if price > 0.0 {
                        out.push(Level {
                            kind: LevelKind::DrawdownKill,
                            price,
                            trigger: adverse,
                        });
                    }
                }
            }
            if !self.ladder_exhausted && self.safety_filled < dca.safety_order_count {
                let dev = dca.safety_order_deviation_pct(self.safety_filled + 1) / 100.0;
                out.push(Level {
                    kind: LevelKind::SafetyOrder,
                    price: self.first_fill * (1.0 - s * dev),
                    trigger: adverse,
                });
            }
        }
        if let Some(tp) = config.take_profits.get(self.tp_next) {
            out.push(Level {
                kind: LevelKind::TakeProfit,
                price: self.avg_entry * (1.0 + s * tp.offset_pct / 100.0),
                trigger: favorable,
            });
        }
        out
    }

    /// Close `qty` (clamped to what remains) at `price`, recording a leg.
    ///
    /// A remainder below the dust threshold is closed with the same leg.
    pub fn close_leg(
        &mut self,
        qty: f64,
        price: f64,
        reason: ExitReason,
        index: usize,
        time: DateTime<Utc>,
        costs: &CostModel,
    ) -> LegFill {
        let mut q = qty.min(self.qty);
        if self.qty - q <= self.entered_qty * DUST_FRACTION {
            q = self.qty;
        }
        let share = q / self.qty;
        let margin = self.margin * share;
        let entry_comm = self.entry_commission * share;
        let exit_comm = costs.commission(price, q);
        let s = self.side.sign();
        let gross = s * (price - self.avg_entry) * q;

        self.legs.push(Trade {
            position_id: self.id,
            side: self.side,
            entry_index: self.entry_index,
            entry_time: self.entry_time,
            entry_price: self.avg_entry,
            exit_index: index,
            exit_time: time,
            exit_price: price,
            exit_reason: reason,
            quantity: q,
            close_fraction: 0.0,
            leverage: self.leverage,
            margin,
            gross_pnl: gross,
            commission: entry_comm + exit_comm,
            net_pnl: gross - entry_comm - exit_comm,
            mfe: (s * (self.best - self.avg_entry) / self.avg_entry).max(0.0),
            mae: (s * (self.avg_entry - self.worst) / self.avg_entry).max(0.0),
            bars_held: index - self.entry_index,
        });

        self.qty -= q;
        self.margin -= margin;
        self.entry_commission -= entry_comm;
        let closed = self.qty <= 0.0;
        if closed {
            self.margin = 0.0;
        }
        LegFill {
            cash_in: margin + gross - exit_comm,
            closed,
        }
    }

    /// Closed legs with close fractions relative to the entered quantity.
    pub fn into_trades(self) -> Vec<Trade> {
        let entered = self.entered_qty;
        self.legs
            .into_iter()
            .map(|mut t| {
                t.close_fraction = if entered > 0.0 { t.quantity / entered } else { 1.0 };
                t
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.qty <= 0.0
    }

    /// Closing side for this position's fills.
    pub fn exit_side(&self) -> OrderSide {
        OrderSide::closing(self.side)
    }
}
