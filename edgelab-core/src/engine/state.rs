//! Mutable account state evolved bar-by-bar, and the run result.

use serde::{Deserialize, Serialize};

use super::execution::CostModel;
use super::position::Position;
use crate::domain::{EquityPoint, ExitReason, PositionId, Trade};
use chrono::{DateTime, Utc};

/// Output of one engine run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub initial_capital: f64,
    pub final_equity: f64,
}

impl RunResult {
    pub fn equity_values(&self) -> Vec<f64> {
        self.equity_curve.iter().map(|p| p.equity).collect()
    }

    /// Net return over the run as a fraction of initial capital.
    pub fn net_return(&self) -> f64 {
        (self.final_equity - self.initial_capital) / self.initial_capital
    }
}

/// Account state owned by a single run.
pub(crate) struct EngineState {
    /// Free cash (excludes margin held by the open position).
    pub cash: f64,
    pub position: Option<Position>,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    peak_equity: f64,
    next_position_id: u64,
}

impl EngineState {
    pub fn new(initial_capital: f64, n_candles: usize) -> Self {
        Self {
            cash: initial_capital,
            position: None,
            trades: Vec::new(),
            equity_curve: Vec::with_capacity(n_candles),
            peak_equity: initial_capital,
            next_position_id: 0,
        }
    }

    pub fn next_id(&mut self) -> PositionId {
        let id = PositionId(self.next_position_id);
        self.next_position_id += 1;
        id
    }

    /// cash + margin + unrealized PnL at `mark`.
    pub fn equity(&self, mark: f64) -> f64 {
        match &self.position {
            Some(pos) => self.cash + pos.margin + pos.unrealized_pnl(mark),
            None => self.cash,
        }
    }

    pub fn mark(&mut self, time: DateTime<Utc>, close: f64) {
        let equity = self.equity(close);
        self.peak_equity = self.peak_equity.max(equity);
        let drawdown_from_peak = if self.peak_equity > 0.0 {
            ((self.peak_equity - equity) / self.peak_equity).max(0.0)
        } else {
            0.0
        };
        self.equity_curve.push(EquityPoint {
            time,
            equity,
            drawdown_from_peak,
        });
    }

    /// Close `qty` of the open position; moves finished legs to the ledger.
    pub fn close_qty(
        &mut self,
        qty: f64,
        price: f64,
        reason: ExitReason,
        index: usize,
        time: DateTime<Utc>,
        costs: &CostModel,
    ) {
        let Some(pos) = self.position.as_mut() else {
            return;
        };
        let fill = pos.close_leg(qty, price, reason, index, time, costs);
        self.cash += fill.cash_in;
        if fill.closed {
            if let Some(pos) = self.position.take() {
                self.trades.extend(pos.into_trades());
            }
        }
    }

    pub fn close_all(
        &mut self,
        price: f64,
        reason: ExitReason,
        index: usize,
        time: DateTime<Utc>,
        costs: &CostModel,
    ) {
        let qty = self.position.as_ref().map_or(0.0, |p| p.qty);
        self.close_qty(qty, price, reason, index, time, costs);
    }
}
