//! Average True Range (ATR), Wilder-smoothed.
//!
//! TR[t] = max(high - low, |high - prev_close|, |low - prev_close|).
//! The first candle has no previous close, so its TR is excluded and the
//! seed is the mean of TR[1..=period]. Lookback: period.

use crate::domain::Candle;

pub fn true_range(candles: &[Candle]) -> Vec<f64> {
    let mut tr = vec![f64::NAN; candles.len()];
    for i in 1..candles.len() {
        let (h, l, pc) = (candles[i].high, candles[i].low, candles[i - 1].close);
        tr[i] = (h - l).max((h - pc).abs()).max((l - pc).abs());
    }
    tr
}

pub fn atr(candles: &[Candle], period: usize) -> Vec<f64> {
    let n = candles.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period + 1 {
        return result;
    }
    let tr = true_range(candles);
    let seed = tr[1..=period].iter().sum::<f64>() / period as f64;
    result[period] = seed;

    let alpha = 1.0 / period as f64;
    let mut prev = seed;
    for i in (period + 1)..n {
        prev = alpha * tr[i] + (1.0 - alpha) * prev;
        result[i] = prev;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_ohlc, DEFAULT_EPSILON};

    #[test]
    fn true_range_gap_up() {
        let candles = make_ohlc(&[
            (98.0, 102.0, 97.0, 100.0),
            (110.0, 115.0, 108.0, 112.0), // max(7, 15, 8) = 15
        ]);
        assert_approx(true_range(&candles)[1], 15.0, DEFAULT_EPSILON);
    }

    #[test]
    fn atr_period_3() {
        let candles = make_ohlc(&[
            (100.0, 105.0, 95.0, 102.0),
            (102.0, 108.0, 100.0, 106.0), // TR = 8
            (106.0, 107.0, 98.0, 99.0),   // TR = 9
            (99.0, 103.0, 97.0, 101.0),   // TR = 6
            (101.0, 106.0, 100.0, 105.0), // TR = 6
        ]);
        let result = atr(&candles, 3);
        assert!(result[2].is_nan());
        assert_approx(result[3], 23.0 / 3.0, DEFAULT_EPSILON);
        assert_approx(result[4], (6.0 + 2.0 * 23.0 / 3.0) / 3.0, DEFAULT_EPSILON);
    }
}
