//! Shared fixtures for the runner integration tests.
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use edgelab_core::domain::{Candle, CandleStore, ExitReason, PositionId, Side, Trade};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
}

pub fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Candle {
                symbol: "ETHUSDT".into(),
                timeframe: "1d".into(),
                open_time: t0() + chrono::Duration::days(i as i64),
                open,
                high: open.max(close) * 1.01,
                low: open.min(close) * 0.99,
                close,
                volume: 500.0,
                turnover: 500.0 * close,
            }
        })
        .collect()
}

/// Drifting sine wave: enough turns for crossover strategies to trade.
pub fn wave_closes(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let t = i as f64;
            200.0 + 0.15 * t + 12.0 * (t / 11.0).sin() + 3.0 * (t / 3.7).cos()
        })
        .collect()
}

pub fn wave_store(n: usize) -> CandleStore {
    CandleStore::new(candles_from_closes(&wave_closes(n))).unwrap()
}

/// A closed trade with the given net PnL and no costs.
pub fn flat_trade(i: usize, net_pnl: f64) -> Trade {
    Trade {
        position_id: PositionId(i as u64),
        side: Side::Long,
        entry_index: i,
        entry_time: t0() + chrono::Duration::days(i as i64),
        entry_price: 100.0,
        exit_index: i + 1,
        exit_time: t0() + chrono::Duration::days(i as i64 + 1),
        exit_price: 100.0 + net_pnl,
        exit_reason: ExitReason::Signal,
        quantity: 1.0,
        close_fraction: 1.0,
        leverage: 1.0,
        margin: 100.0,
        gross_pnl: net_pnl,
        commission: 0.0,
        net_pnl,
        mfe: net_pnl.max(0.0),
        mae: net_pnl.min(0.0),
        bars_held: 1,
    }
}
