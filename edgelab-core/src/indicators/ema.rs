//! Exponential Moving Average (EMA).
//!
//! Recursive: EMA[t] = alpha * x[t] + (1 - alpha) * EMA[t-1], alpha = 2 / (period + 1).
//! Seed: EMA[period-1] = SMA of the first `period` values.
//! Lookback: period - 1.

pub fn ema(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period {
        return result;
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;
    result[period - 1] = seed;

    let mut prev = seed;
    for i in period..n {
        prev = alpha * values[i] + (1.0 - alpha) * prev;
        result[i] = prev;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, DEFAULT_EPSILON};

    #[test]
    fn ema_3_known_values() {
        // alpha = 0.5; seed = SMA(10, 11, 12) = 11
        // EMA[3] = 0.5*13 + 0.5*11 = 12; EMA[4] = 0.5*14 + 0.5*12 = 13
        let result = ema(&[10.0, 11.0, 12.0, 13.0, 14.0], 3);
        assert!(result[1].is_nan());
        assert_approx(result[2], 11.0, DEFAULT_EPSILON);
        assert_approx(result[3], 12.0, DEFAULT_EPSILON);
        assert_approx(result[4], 13.0, DEFAULT_EPSILON);
    }

    #[test]
    fn ema_period_1_equals_input() {
        let result = ema(&[100.0, 200.0, 300.0], 1);
        assert_approx(result[2], 300.0, DEFAULT_EPSILON);
    }
}
