//! Synthetic candle series shared by unit tests.

use chrono::{TimeZone, Utc};
use edgelab_core::domain::{Candle, CandleStore};

/// Daily candles over `closes`, with a 1% high/low envelope.
pub(crate) fn store_from_closes(closes: &[f64]) -> CandleStore {
    let t0 = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
    let candles = closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Candle {
                symbol: "BTCUSDT".into(),
                timeframe: "1d".into(),
                open_time: t0 + chrono::Duration::days(i as i64),
                open,
                high: open.max(close) * 1.01,
                low: open.min(close) * 0.99,
                close,
                volume: 1_000.0,
                turnover: 1_000.0 * close,
            }
        })
        .collect();
    CandleStore::new(candles).unwrap()
}

/// Upward drift with a slow oscillation, so crossovers fire both ways.
pub(crate) fn trending_store(n: usize) -> CandleStore {
    let closes: Vec<f64> = (0..n)
        .map(|i| {
            let t = i as f64;
            100.0 + 0.1 * t + 6.0 * (t / 9.0).sin()
        })
        .collect();
    store_from_closes(&closes)
}
