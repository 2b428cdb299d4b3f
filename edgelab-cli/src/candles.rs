//! CSV candle loader.
//!
//! Expected header: `open_time,open,high,low,close,volume[,turnover][,symbol][,timeframe]`.
//! `open_time` is either RFC 3339 or integer epoch milliseconds. Rows must be
//! in ascending time order; `CandleStore` rejects anything else.

use std::io::Read;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use edgelab_core::domain::{Candle, CandleStore};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Row {
    open_time: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    #[serde(default)]
    turnover: Option<f64>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    timeframe: Option<String>,
}

/// Fallbacks for files without `symbol` / `timeframe` columns.
#[derive(Debug, Clone)]
pub struct CsvDefaults {
    pub symbol: String,
    pub timeframe: String,
}

pub fn load_csv(path: &Path, defaults: &CsvDefaults) -> Result<CandleStore> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open candles {}", path.display()))?;
    let store = read_csv(file, defaults).with_context(|| format!("in {}", path.display()))?;
    tracing::info!(path = %path.display(), candles = store.len(), "candles loaded");
    Ok(store)
}

pub fn read_csv<R: Read>(reader: R, defaults: &CsvDefaults) -> Result<CandleStore> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut candles = Vec::new();
    for (i, row) in rdr.deserialize::<Row>().enumerate() {
        // Header is line 1.
        let line = i + 2;
        let row = row.with_context(|| format!("line {line}"))?;
        let open_time = parse_time(&row.open_time).with_context(|| format!("line {line}"))?;
        candles.push(Candle {
            symbol: row.symbol.unwrap_or_else(|| defaults.symbol.clone()),
            timeframe: row.timeframe.unwrap_or_else(|| defaults.timeframe.clone()),
            open_time,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
            turnover: row.turnover.unwrap_or(row.volume * row.close),
        });
    }
    Ok(CandleStore::new(candles)?)
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ms) = raw.parse::<i64>() {
        return Utc
            .timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| anyhow!("epoch millis {ms} out of range"));
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("unparseable open_time '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> CsvDefaults {
        CsvDefaults {
            symbol: "BTCUSDT".into(),
            timeframe: "1h".into(),
        }
    }

    #[test]
    fn reads_rfc3339_and_epoch_ms() {
        let csv = "open_time,open,high,low,close,volume\n\
                   2024-01-01T00:00:00Z,100,101,99,100.5,10\n\
                   1704070800000,100.5,102,100,101,12\n";
        let store = read_csv(csv.as_bytes(), &defaults()).unwrap();
        let candles = store.as_slice();
        assert_eq!(candles.len(), 2);
        assert_eq!(
            candles[1].open_time - candles[0].open_time,
            chrono::Duration::hours(1)
        );
        assert_eq!(candles[0].symbol, "BTCUSDT");
        assert!((candles[1].turnover - 12.0 * 101.0).abs() < 1e-10);
    }

    #[test]
    fn optional_columns_override_defaults() {
        let csv = "open_time,open,high,low,close,volume,turnover,symbol,timeframe\n\
                   2024-01-01T00:00:00Z,1,2,0.5,1.5,3,4.5,ETHUSDT,4h\n";
        let store = read_csv(csv.as_bytes(), &defaults()).unwrap();
        let c = &store.as_slice()[0];
        assert_eq!(c.symbol, "ETHUSDT");
        assert_eq!(c.timeframe, "4h");
        assert_eq!(c.turnover, 4.5);
    }

    #[test]
    fn bad_rows_report_their_line() {
        let csv = "open_time,open,high,low,close,volume\n\
                   2024-01-01T00:00:00Z,1,2,0.5,1.5,3\n\
                   yesterday,1,2,0.5,1.5,3\n";
        let err = read_csv(csv.as_bytes(), &defaults()).unwrap_err();
        assert!(format!("{err:#}").contains("line 3"), "{err:#}");
    }

    #[test]
    fn out_of_order_rows_are_rejected() {
        let csv = "open_time,open,high,low,close,volume\n\
                   2024-01-02T00:00:00Z,1,2,0.5,1.5,3\n\
                   2024-01-01T00:00:00Z,1,2,0.5,1.5,3\n";
        assert!(read_csv(csv.as_bytes(), &defaults()).is_err());
    }
}
