//! Candles, the fundamental market data unit, and the shared candle store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;

use super::ids::RangeHash;

/// OHLCV candle for a single symbol and timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: String,
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub turnover: f64,
}

impl Candle {
    /// OHLC sanity: finite, positive, low <= {open, close} <= high.
    pub fn is_sane(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return false;
        }
        self.low <= self.open
            && self.low <= self.close
            && self.high >= self.open
            && self.high >= self.close
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CandleError {
    #[error("candle {index}: OHLC out of order or non-positive (o={open} h={high} l={low} c={close})")]
    Malformed {
        index: usize,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
    #[error("candle {index}: open_time {time} is not after the previous candle")]
    NotAscending { index: usize, time: DateTime<Utc> },
    #[error("range {start}..{end} out of bounds for {len} candles")]
    OutOfBounds { start: usize, end: usize, len: usize },
}

/// Immutable, validated, time-ordered candle series.
///
/// Cloning and slicing are cheap: the backing vector is shared behind an
/// `Arc`, and a slice is just an index window onto it. Every consumer (engine
/// runs, walk-forward windows, worker threads) reads the same allocation.
#[derive(Debug, Clone)]
pub struct CandleStore {
    data: Arc<Vec<Candle>>,
    start: usize,
    end: usize,
}

impl CandleStore {
    /// Validate and wrap a candle vector.
    pub fn new(candles: Vec<Candle>) -> Result<Self, CandleError> {
        for (i, c) in candles.iter().enumerate() {
            if !c.is_sane() {
                return Err(CandleError::Malformed {
                    index: i,
                    open: c.open,
                    high: c.high,
                    low: c.low,
                    close: c.close,
                });
            }
            if i > 0 && c.open_time <= candles[i - 1].open_time {
                return Err(CandleError::NotAscending {
                    index: i,
                    time: c.open_time,
                });
            }
        }
        let end = candles.len();
        Ok(Self {
            data: Arc::new(candles),
            start: 0,
            end,
        })
    }

    pub fn as_slice(&self) -> &[Candle] {
        &self.data[self.start..self.end]
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Absolute index range of this view within the backing series.
    pub fn absolute_range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Sub-view over `range` (relative to this view).
    pub fn slice(&self, range: Range<usize>) -> Result<Self, CandleError> {
        if range.start > range.end || range.end > self.len() {
            return Err(CandleError::OutOfBounds {
                start: range.start,
                end: range.end,
                len: self.len(),
            });
        }
        Ok(Self {
            data: Arc::clone(&self.data),
            start: self.start + range.start,
            end: self.start + range.end,
        })
    }

    /// Content hash of the candles in this view.
    ///
    /// Two views over identical candle content hash equal even if they come
    /// from different allocations.
    pub fn range_hash(&self) -> RangeHash {
        let mut hasher = blake3::Hasher::new();
        for c in self.as_slice() {
            hasher.update(c.symbol.as_bytes());
            hasher.update(c.timeframe.as_bytes());
            hasher.update(&c.open_time.timestamp_millis().to_le_bytes());
            for v in [c.open, c.high, c.low, c.close, c.volume, c.turnover] {
                hasher.update(&v.to_bits().to_le_bytes());
            }
        }
        RangeHash::from_hash(hasher.finalize())
    }

    /// Median spacing between consecutive candles, in seconds.
    pub fn median_spacing_secs(&self) -> Option<i64> {
        let s = self.as_slice();
        if s.len() < 2 {
            return None;
        }
        let mut gaps: Vec<i64> = s
            .windows(2)
            .map(|w| (w[1].open_time - w[0].open_time).num_seconds())
            .collect();
        gaps.sort_unstable();
        Some(gaps[gaps.len() / 2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle(i: i64, close: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".into(),
            timeframe: "1h".into(),
            open_time: Utc.timestamp_opt(1_700_000_000 + i * 3600, 0).unwrap(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
            turnover: 10.0 * close,
        }
    }

    #[test]
    fn rejects_high_below_close() {
        let mut c = candle(0, 100.0);
        c.high = 99.0;
        let err = CandleStore::new(vec![c]).unwrap_err();
        assert!(matches!(err, CandleError::Malformed { index: 0, .. }));
    }

    #[test]
    fn rejects_duplicate_timestamps() {
        let err = CandleStore::new(vec![candle(0, 100.0), candle(0, 101.0)]).unwrap_err();
        assert!(matches!(err, CandleError::NotAscending { index: 1, .. }));
    }

    #[test]
    fn slice_shares_backing_data() {
        let store = CandleStore::new((0..10).map(|i| candle(i, 100.0 + i as f64)).collect())
            .unwrap();
        let sub = store.slice(2..5).unwrap();
        assert_eq!(sub.len(), 3);
        assert_eq!(sub.as_slice()[0].close, 102.0);
        assert_eq!(sub.absolute_range(), 2..5);
        assert!(Arc::ptr_eq(&store.data, &sub.data));

        let nested = sub.slice(1..3).unwrap();
        assert_eq!(nested.absolute_range(), 3..5);
        assert!(sub.slice(2..4).is_err());
    }

    #[test]
    fn range_hash_tracks_content() {
        let a = CandleStore::new((0..5).map(|i| candle(i, 100.0)).collect()).unwrap();
        let b = CandleStore::new((0..5).map(|i| candle(i, 100.0)).collect()).unwrap();
        assert_eq!(a.range_hash(), b.range_hash());
        assert_ne!(a.range_hash(), a.slice(0..4).unwrap().range_hash());
    }

    #[test]
    fn spacing_is_median_gap() {
        let store = CandleStore::new((0..5).map(|i| candle(i, 100.0)).collect()).unwrap();
        assert_eq!(store.median_spacing_secs(), Some(3600));
    }
}
