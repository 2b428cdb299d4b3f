//! Look-ahead contamination tests.
//!
//! No indicator value or signal at candle t may depend on candles after t.
//!
//! Method: compute on a truncated series (candles 0..100) and the full series
//! (candles 0..200). Everything in 0..100 must be identical between both runs.

use chrono::{TimeZone, Utc};
use edgelab_core::domain::{Candle, StrategyConfig};
use edgelab_core::engine::run;
use edgelab_core::indicators::*;
use edgelab_core::signals::{presets, Signal};

/// Deterministic pseudo-random walk.
fn make_test_candles(n: usize) -> Vec<Candle> {
    let base = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
    let mut price = 100.0;
    (0..n)
        .map(|i| {
            let seed = (i as u64).wrapping_mul(6364136223846793005).wrapping_add(1);
            let change = ((seed >> 33) % 200) as f64 / 100.0 - 1.0;
            price = (price + change).max(10.0);
            let open = price - 0.5;
            let close = price + 0.3;
            Candle {
                symbol: "TEST".into(),
                timeframe: "1d".into(),
                open_time: base + chrono::Duration::days(i as i64),
                open,
                high: open.max(close) + 2.0,
                low: open.min(close) - 2.0,
                close,
                volume: 1000.0 + i as f64,
                turnover: 0.0,
            }
        })
        .collect()
}

fn assert_same_prefix(name: &str, truncated: &[f64], full: &[f64]) {
    assert_eq!(truncated.len(), 100, "{name}: truncated length");
    for (i, (a, b)) in truncated.iter().zip(full).enumerate() {
        let same = (a.is_nan() && b.is_nan()) || (a - b).abs() < 1e-10;
        assert!(same, "{name}: candle {i} differs ({a} vs {b})");
    }
}

#[test]
fn indicators_have_no_lookahead() {
    let full = make_test_candles(200);
    let short = &full[..100];
    let closes = |c: &[Candle]| c.iter().map(|c| c.close).collect::<Vec<_>>();
    let (cf, cs) = (closes(&full), closes(short));

    assert_same_prefix("sma", &sma(&cs, 20), &sma(&cf, 20));
    assert_same_prefix("ema", &ema(&cs, 20), &ema(&cf, 20));
    assert_same_prefix("rsi", &rsi(&cs, 14), &rsi(&cf, 14));
    assert_same_prefix("roc", &roc(&cs, 10), &roc(&cf, 10));
    assert_same_prefix("atr", &atr(short, 14), &atr(&full, 14));
    assert_same_prefix("true_range", &true_range(short), &true_range(&full));
    for band in [DonchianBand::Upper, DonchianBand::Lower] {
        assert_same_prefix(
            "donchian",
            &donchian(short, 20, band),
            &donchian(&full, 20, band),
        );
    }
}

#[test]
fn pipeline_signals_have_no_lookahead() {
    let full = make_test_candles(200);
    for spec in [
        presets::ma_crossover(5, 20),
        presets::donchian_breakout(20, 10),
        presets::always_long(),
    ] {
        let compiled = spec.compile().unwrap();
        let short_signals = compiled.evaluate(&full[..100]);
        let full_signals = compiled.evaluate(&full);
        assert_eq!(short_signals[..], full_signals[..100]);
    }
}

#[test]
fn engine_prefix_is_unaffected_by_future_candles() {
    let full = make_test_candles(200);
    let signals = presets::ma_crossover(5, 20)
        .compile()
        .unwrap()
        .evaluate(&full);
    let config = StrategyConfig {
        stop_loss_pct: Some(3.0),
        close_at_end: false,
        ..StrategyConfig::default()
    };

    let short = run(&full[..100], &signals[..100], &config).unwrap();
    let long = run(&full, &signals, &config).unwrap();

    assert_eq!(short.equity_curve[..], long.equity_curve[..100]);
    let closed_early: Vec<_> = long
        .trades
        .iter()
        .filter(|t| t.exit_index < 99)
        .cloned()
        .collect();
    let short_closed: Vec<_> = short
        .trades
        .iter()
        .filter(|t| t.exit_index < 99)
        .cloned()
        .collect();
    assert_eq!(short_closed, closed_early);
    assert!(signals.iter().any(|s| *s != Signal::None));
}
