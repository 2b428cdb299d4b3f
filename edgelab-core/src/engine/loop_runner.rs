//! Bar-by-bar engine loop.
//!
//! Phases per candle `i`:
//! 1. Intrabar (i >= 1, position open): walk the synthetic price path and
//!    trigger stop-loss, trailing, kill-switch, liquidation, safety-order and
//!    take-profit levels in the order the path crosses them.
//! 2. Time exit: `max_bars_in_trade` reached ⇒ close at the candle close.
//! 3. Signal: act on `signals[i]` at the candle close.
//! 4. End of data: with `close_at_end`, close what is left (`time`).
//! 5. Mark-to-market: one equity point per candle.
//!
//! A signal at candle `i` fills at the close of `i`; the position's levels
//! first become live on candle `i + 1`. Nothing reads a candle after `i`
//! while processing `i`.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::execution::{price_path, CostModel, OrderSide};
use super::position::{Level, LevelKind, Position, Trigger};
use super::state::{EngineState, RunResult};
use super::EngineError;
use crate::domain::{Candle, ExitReason, OrderSizing, Side, StrategyConfig};
use crate::signals::Signal;

/// Hard cap on intrabar events per candle. Each event closes the position or
/// advances a ladder, so real runs stay far below it.
const MAX_EVENTS_PER_CANDLE: usize = 64;

/// Run one backtest.
///
/// `signals[i]` must depend only on candles `0..=i`.
pub fn run(
    candles: &[Candle],
    signals: &[Signal],
    config: &StrategyConfig,
) -> Result<RunResult, EngineError> {
    config.validate()?;
    if candles.len() < 2 {
        return Err(EngineError::InsufficientData {
            candles: candles.len(),
        });
    }
    if signals.len() != candles.len() {
        return Err(EngineError::SignalMismatch {
            candles: candles.len(),
            signals: signals.len(),
        });
    }

    let mut sim = Simulator {
        config,
        costs: CostModel::from_config(config),
        state: EngineState::new(config.initial_capital, candles.len()),
    };
    let last = candles.len() - 1;

    for (i, candle) in candles.iter().enumerate() {
        if i > 0 {
            sim.intrabar(i, candle);
        }
        sim.time_exit(i, candle);
        if i == last && config.close_at_end {
            let price = sim.market_exit_price(candle.close);
            sim.state
                .close_all(price, ExitReason::Time, i, candle.open_time, &sim.costs);
        } else {
            sim.on_signal(signals[i], i, candle);
        }
        sim.state.mark(candle.open_time, candle.close);
    }

    let final_equity = sim.state.equity(candles[last].close);
    let mut trades = sim.state.trades;
    // Legs already taken from a position still open at the end.
    if let Some(pos) = sim.state.position {
        trades.extend(pos.into_trades());
    }
    Ok(RunResult {
        trades,
        equity_curve: sim.state.equity_curve,
        initial_capital: config.initial_capital,
        final_equity,
    })
}

struct Simulator<'a> {
    config: &'a StrategyConfig,
    costs: CostModel,
    state: EngineState,
}

impl Simulator<'_> {
    /// Market exit price at `close`, slipped against the open position.
    fn market_exit_price(&self, close: f64) -> f64 {
        match &self.state.position {
            Some(pos) => self.costs.slipped(close, pos.exit_side()),
            None => close,
        }
    }

    // ─── Intrabar ────────────────────────────────────────────────────

    fn intrabar(&mut self, index: usize, candle: &Candle) {
        let Some(side) = self.state.position.as_ref().map(|p| p.side) else {
            return;
        };
        let path = price_path(candle, self.config.fill_policy, Some(side));
        let mut cur = path[0];
        if let Some(pos) = self.state.position.as_mut() {
            pos.observe(cur);
        }

        // Levels already beyond the open fill at the open (gaps), except a
        // liquidation, which fills at its own price.
        let open = cur;
        if !self.walk_segment(&mut cur, open, index, candle.open_time) {
            return;
        }
        for &end in &path[1..] {
            if !self.walk_segment(&mut cur, end, index, candle.open_time) {
                return;
            }
            if let Some(pos) = self.state.position.as_mut() {
                pos.observe(end);
                pos.update_trailing(self.config);
            }
            cur = end;
        }
    }

    /// Trigger every level crossed travelling from `cur` to `end`.
    /// Returns false once the position is gone.
    fn walk_segment(
        &mut self,
        cur: &mut f64,
        end: f64,
        index: usize,
        time: DateTime<Utc>,
    ) -> bool {
        for _ in 0..MAX_EVENTS_PER_CANDLE {
            let Some(pos) = self.state.position.as_ref() else {
                return false;
            };
            let levels = pos.levels(self.config);
            let Some((level, breached)) = next_event(&levels, *cur, end) else {
                return true;
            };
            // A breached level fills where price already is; a reached one
            // fills at the level.
            let at = if breached { *cur } else { level.price };
            if let Some(pos) = self.state.position.as_mut() {
                pos.observe(at);
            }
            self.execute(level, at, index, time);
            if !breached {
                *cur = level.price;
            }
        }
        self.state.position.is_some()
    }

    fn execute(&mut self, level: Level, at: f64, index: usize, time: DateTime<Utc>) {
        let Some(pos) = self.state.position.as_mut() else {
            return;
        };
        let exit_side = pos.exit_side();
        match level.kind {
            LevelKind::StopLoss => {
                let price = self.costs.slipped(at, exit_side);
                self.state
                    .close_all(price, ExitReason::StopLoss, index, time, &self.costs);
            }
            LevelKind::Trailing => {
                let price = self.costs.slipped(at, exit_side);
                self.state
                    .close_all(price, ExitReason::Trailing, index, time, &self.costs);
            }
            LevelKind::DrawdownKill => {
                let price = self.costs.slipped(at, exit_side);
                debug!(index, price, "dca drawdown kill switch");
                self.state
                    .close_all(price, ExitReason::DrawdownKill, index, time, &self.costs);
            }
            LevelKind::Liquidation => {
                debug!(index, price = level.price, "position liquidated");
                self.state
                    .close_all(level.price, ExitReason::Liquidation, index, time, &self.costs);
            }
            LevelKind::TakeProfit => {
                let Some(tp) = self.config.take_profits.get(pos.tp_next).copied() else {
                    return;
                };
                pos.tp_next += 1;
                let qty = pos.qty * tp.close_fraction;
                self.state
                    .close_qty(qty, at, ExitReason::TakeProfit, index, time, &self.costs);
            }
            LevelKind::SafetyOrder => {
                self.fill_safety_order(at);
            }
        }
    }

    // ─── DCA ─────────────────────────────────────────────────────────

    /// Fill the next safety order at `price`, or end the ladder if the
    /// deposit or free cash cannot cover it.
    fn fill_safety_order(&mut self, price: f64) {
        let Some(dca) = &self.config.dca else {
            return;
        };
        let cash = self.state.cash;
        let Some(pos) = self.state.position.as_mut() else {
            return;
        };
        if pos.ladder_exhausted || pos.safety_filled >= dca.safety_order_count {
            return;
        }
        let k = pos.safety_filled + 1;
        let margin = dca.safety_order_margin(k);
        let cost = margin * (1.0 + pos.leverage * self.costs.commission_rate);
        if pos.committed_margin + margin > dca.deposit + 1e-9 || cost > cash + 1e-9 {
            debug!(order = k, margin, "safety order skipped, ladder ends");
            pos.ladder_exhausted = true;
            return;
        }
        let spent = pos.add(price, margin, &self.costs);
        pos.safety_filled = k;
        self.state.cash -= spent;
    }

    // ─── Close-of-candle actions ─────────────────────────────────────

    fn time_exit(&mut self, index: usize, candle: &Candle) {
        let Some(max_bars) = self.config.max_bars_in_trade else {
            return;
        };
        let expired = self
            .state
            .position
            .as_ref()
            .is_some_and(|p| index - p.entry_index >= max_bars);
        if expired {
            let price = self.market_exit_price(candle.close);
            self.state
                .close_all(price, ExitReason::Time, index, candle.open_time, &self.costs);
        }
    }

    fn on_signal(&mut self, signal: Signal, index: usize, candle: &Candle) {
        match signal {
            Signal::None => {}
            Signal::Exit => {
                let price = self.market_exit_price(candle.close);
                self.state
                    .close_all(price, ExitReason::Signal, index, candle.open_time, &self.costs);
            }
            Signal::EnterLong => self.enter(Side::Long, index, candle),
            Signal::EnterShort => self.enter(Side::Short, index, candle),
            Signal::AddSafetyOrder => {
                let price = self
                    .state
                    .position
                    .as_ref()
                    .map(|p| self.costs.slipped(candle.close, OrderSide::opening(p.side)));
                if let Some(price) = price {
                    self.fill_safety_order(price);
                }
            }
        }
    }

    /// Enter `side` at the close. An opposite position is closed first; a
    /// position on the same side is left alone.
    fn enter(&mut self, side: Side, index: usize, candle: &Candle) {
        match self.state.position.as_ref().map(|p| p.side) {
            Some(current) if current == side => return,
            Some(_) => {
                let price = self.market_exit_price(candle.close);
                self.state
                    .close_all(price, ExitReason::Signal, index, candle.open_time, &self.costs);
            }
            None => {}
        }
        let allowed = match side {
            Side::Long => self.config.direction.allows_long(),
            Side::Short => self.config.direction.allows_short(),
        };
        if !allowed {
            return;
        }

        let leverage = self.config.leverage;
        let wanted = match (&self.config.dca, self.config.sizing) {
            (Some(dca), _) => dca.base_order_size,
            (None, OrderSizing::Fixed { margin }) => margin,
            (None, OrderSizing::EquityPercent { pct }) => self.state.cash * pct / 100.0,
        };
        // margin + entry commission must fit in free cash
        let affordable = self.state.cash / (1.0 + leverage * self.costs.commission_rate);
        let margin = wanted.min(affordable);
        if !(margin > 0.0) {
            return;
        }

        let price = self.costs.slipped(candle.close, OrderSide::opening(side));
        let id = self.state.next_id();
        let (pos, spent) = Position::open(
            id,
            side,
            index,
            candle.open_time,
            price,
            margin,
            leverage,
            &self.costs,
        );
        self.state.cash -= spent;
        self.state.position = Some(pos);
    }
}

/// Pick the next level to trigger between `cur` and `end`.
///
/// Levels already beyond `cur` (breached) come first. Among breached levels a
/// liquidation always wins, so a gap can never lose more than the margin held;
/// the rest go by priority. Otherwise the level nearest `cur` in the direction
/// of travel wins, ties by priority.
fn next_event(levels: &[Level], cur: f64, end: f64) -> Option<(Level, bool)> {
    let mut best: Option<(u8, f64, Level)> = None;
    for level in levels {
        let (breached, reached) = match level.trigger {
            Trigger::AtOrBelow => (level.price >= cur, end < cur && level.price >= end),
            Trigger::AtOrAbove => (level.price <= cur, end > cur && level.price <= end),
        };
        let key = if breached {
            (0u8, if level.kind == LevelKind::Liquidation { 0.0 } else { 1.0 })
        } else if reached {
            (1u8, (level.price - cur).abs())
        } else {
            continue;
        };
        let better = match &best {
            None => true,
            Some((group, dist, current)) => (key.0, key.1, level.kind)
                .partial_cmp(&(*group, *dist, current.kind))
                .is_some_and(|o| o.is_lt()),
        };
        if better {
            best = Some((key.0, key.1, *level));
        }
    }
    best.map(|(group, _, level)| (level, group == 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lvl(kind: LevelKind, price: f64, trigger: Trigger) -> Level {
        Level {
            kind,
            price,
            trigger,
        }
    }

    #[test]
    fn nearest_level_in_travel_direction_wins() {
        let levels = [
            lvl(LevelKind::StopLoss, 95.0, Trigger::AtOrBelow),
            lvl(LevelKind::SafetyOrder, 98.0, Trigger::AtOrBelow),
            lvl(LevelKind::TakeProfit, 105.0, Trigger::AtOrAbove),
        ];
        let (level, breached) = next_event(&levels, 100.0, 94.0).unwrap();
        assert_eq!(level.kind, LevelKind::SafetyOrder);
        assert!(!breached);
        assert!(next_event(&levels, 100.0, 104.0).is_none());
    }

    #[test]
    fn breached_level_preempts_travel() {
        let levels = [
            lvl(LevelKind::SafetyOrder, 97.0, Trigger::AtOrBelow),
            lvl(LevelKind::StopLoss, 99.0, Trigger::AtOrBelow),
        ];
        // price already at 98.5, below the 99 stop
        let (level, breached) = next_event(&levels, 98.5, 96.0).unwrap();
        assert_eq!(level.kind, LevelKind::StopLoss);
        assert!(breached);
    }

    #[test]
    fn breached_liquidation_beats_breached_stop() {
        let levels = [
            lvl(LevelKind::StopLoss, 95.0, Trigger::AtOrBelow),
            lvl(LevelKind::DrawdownKill, 93.0, Trigger::AtOrBelow),
            lvl(LevelKind::Liquidation, 90.0, Trigger::AtOrBelow),
        ];
        let (level, breached) = next_event(&levels, 85.0, 85.0).unwrap();
        assert_eq!(level.kind, LevelKind::Liquidation);
        assert!(breached);

        // Above the liquidation price the stop keeps its priority.
        let (level, _) = next_event(&levels, 92.0, 92.0).unwrap();
        assert_eq!(level.kind, LevelKind::StopLoss);
    }

    #[test]
    fn ties_resolve_by_priority() {
        let levels = [
            lvl(LevelKind::Liquidation, 90.0, Trigger::AtOrBelow),
            lvl(LevelKind::StopLoss, 90.0, Trigger::AtOrBelow),
        ];
        let (level, _) = next_event(&levels, 100.0, 80.0).unwrap();
        assert_eq!(level.kind, LevelKind::StopLoss);
    }
}
