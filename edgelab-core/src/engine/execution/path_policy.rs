//! Path policy: the synthetic price path walked inside one candle.
//!
//! A candle only reports four prices, so the order in which intrabar levels
//! were touched is unknown. The fill policy fixes it deterministically:
//!
//! - `StopLossFirst`: the extreme adverse to the position comes first
//!   (long: O→L→H→C, short: O→H→L→C).
//! - `TakeProfitFirst`: the favorable extreme comes first.
//! - `PathInterpolation`: if |open - high| <= |open - low| the high is
//!   assumed first (O→H→L→C), otherwise O→L→H→C. With no position the
//!   path is always interpolated.

use crate::domain::{Candle, FillPolicy, Side};

pub fn price_path(candle: &Candle, policy: FillPolicy, side: Option<Side>) -> [f64; 4] {
    let high_first = match (policy, side) {
        (FillPolicy::StopLossFirst, Some(Side::Long)) => false,
        (FillPolicy::StopLossFirst, Some(Side::Short)) => true,
        (FillPolicy::TakeProfitFirst, Some(Side::Long)) => true,
        (FillPolicy::TakeProfitFirst, Some(Side::Short)) => false,
        _ => (candle.open - candle.high).abs() <= (candle.open - candle.low).abs(),
    };
    if high_first {
        [candle.open, candle.high, candle.low, candle.close]
    } else {
        [candle.open, candle.low, candle.high, candle.close]
    }
}
