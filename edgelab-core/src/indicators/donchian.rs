//! Donchian channel bands: rolling highest high / lowest low.
//!
//! Lookback: period - 1. The window includes the current candle, so a
//! breakout condition should compare against the previous bar's band.

use crate::domain::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DonchianBand {
    Upper,
    Lower,
}

pub fn donchian(candles: &[Candle], period: usize, band: DonchianBand) -> Vec<f64> {
    let n = candles.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period {
        return result;
    }
    for i in (period - 1)..n {
        let window = &candles[i + 1 - period..=i];
        result[i] = match band {
            DonchianBand::Upper => window.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max),
            DonchianBand::Lower => window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min),
        };
    }
    result
}
