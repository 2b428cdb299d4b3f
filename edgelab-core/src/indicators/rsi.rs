//! Relative Strength Index (RSI) with Wilder smoothing.
//!
//! RSI = 100 - 100 / (1 + avg_gain / avg_loss). Lookback: period.
//! avg_loss == 0 gives 100, avg_gain == 0 gives 0, both zero gives 50.

pub fn rsi(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period + 1 {
        return result;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let ch = values[i] - values[i - 1];
        if ch > 0.0 {
            avg_gain += ch;
        } else {
            avg_loss -= ch;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    result[period] = compute_rsi(avg_gain, avg_loss);

    let alpha = 1.0 / period as f64;
    for i in (period + 1)..n {
        let ch = values[i] - values[i - 1];
        avg_gain = alpha * ch.max(0.0) + (1.0 - alpha) * avg_gain;
        avg_loss = alpha * (-ch).max(0.0) + (1.0 - alpha) * avg_loss;
        result[i] = compute_rsi(avg_gain, avg_loss);
    }
    result
}

fn compute_rsi(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else if avg_gain == 0.0 {
        0.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::assert_approx;

    #[test]
    fn rsi_all_gains_is_100() {
        let result = rsi(&[100.0, 101.0, 102.0, 103.0, 104.0], 3);
        assert!(result[2].is_nan());
        assert_approx(result[3], 100.0, 1e-9);
    }

    #[test]
    fn rsi_all_losses_is_0() {
        let result = rsi(&[105.0, 104.0, 103.0, 102.0, 101.0], 3);
        assert_approx(result[3], 0.0, 1e-9);
    }

    #[test]
    fn rsi_stays_in_bounds() {
        let result = rsi(&[100.0, 105.0, 98.0, 110.0, 95.0, 115.0, 90.0, 120.0], 3);
        for v in result.iter().filter(|v| !v.is_nan()) {
            assert!((0.0..=100.0).contains(v), "RSI out of bounds: {v}");
        }
    }
}
