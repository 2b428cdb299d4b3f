//! Indicator functions used by the signal pipeline.
//!
//! All indicators are pure: a full series in, a same-length series out, with
//! NaN in the warmup positions. No value at index t depends on data after t.

pub mod atr;
pub mod donchian;
pub mod ema;
pub mod roc;
pub mod rsi;
pub mod sma;

pub use atr::{atr, true_range};
pub use donchian::{donchian, DonchianBand};
pub use ema::ema;
pub use roc::roc;
pub use rsi::rsi;
pub use sma::sma;

/// Synthetic candles from closes: open = previous close,
/// high = max(open, close) + 1, low = min(open, close) - 1.
#[cfg(test)]
pub fn make_candles(closes: &[f64]) -> Vec<crate::domain::Candle> {
    let data: Vec<(f64, f64, f64, f64)> = closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            (open, open.max(close) + 1.0, open.min(close) - 1.0, close)
        })
        .collect();
    make_ohlc(&data)
}

#[cfg(test)]
pub fn make_ohlc(data: &[(f64, f64, f64, f64)]) -> Vec<crate::domain::Candle> {
    use chrono::TimeZone;
    let base = chrono::Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
    data.iter()
        .enumerate()
        .map(|(i, &(open, high, low, close))| crate::domain::Candle {
            symbol: "TEST".to_string(),
            timeframe: "1d".to_string(),
            open_time: base + chrono::Duration::days(i as i64),
            open,
            high,
            low,
            close,
            volume: 1000.0,
            turnover: 1000.0 * close,
        })
        .collect()
}

#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
