//! Criterion benchmarks for EdgeLab hot paths.
//!
//! Benchmarks:
//! 1. Indicator computation (SMA, EMA, RSI, ATR, Donchian)
//! 2. Pipeline compile + evaluate
//! 3. Engine run, plain and with a full DCA / TP / trailing config

use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use edgelab_core::domain::{Candle, DcaGrid, StrategyConfig, TakeProfitLevel, TrailingStop};
use edgelab_core::engine::run;
use edgelab_core::indicators::{atr, donchian, ema, rsi, sma, DonchianBand};
use edgelab_core::signals::presets;

// ── Helpers ──────────────────────────────────────────────────────────

fn make_candles(n: usize) -> Vec<Candle> {
    let base = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    (0..n)
        .map(|i| {
            let close = 100.0 + (i as f64 * 0.1).sin() * 10.0;
            let open = close - 0.3;
            Candle {
                symbol: "BENCH".into(),
                timeframe: "1h".into(),
                open_time: base + chrono::Duration::hours(i as i64),
                open,
                high: close + 1.5,
                low: open - 1.5,
                close,
                volume: 1_000.0,
                turnover: 1_000.0 * close,
            }
        })
        .collect()
}

fn full_config() -> StrategyConfig {
    StrategyConfig {
        stop_loss_pct: Some(8.0),
        take_profits: vec![
            TakeProfitLevel {
                offset_pct: 2.0,
                close_fraction: 0.5,
            },
            TakeProfitLevel {
                offset_pct: 4.0,
                close_fraction: 0.5,
            },
        ],
        trailing_stop: Some(TrailingStop {
            activation_pct: 1.0,
            distance_pct: 0.5,
        }),
        dca: Some(DcaGrid {
            deposit: 5_000.0,
            base_order_size: 500.0,
            safety_order_size: 500.0,
            safety_order_count: 5,
            martingale_multiplier: 1.3,
            step_pct: 1.0,
            step_scale: 1.1,
            max_drawdown_kill_pct: Some(50.0),
        }),
        leverage: 3.0,
        commission_rate: 0.0004,
        ..StrategyConfig::default()
    }
}

// ── Benchmarks ───────────────────────────────────────────────────────

fn bench_indicators(c: &mut Criterion) {
    let candles = make_candles(10_000);
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let mut group = c.benchmark_group("indicators");
    group.bench_function("sma_50", |b| b.iter(|| sma(black_box(&closes), 50)));
    group.bench_function("ema_50", |b| b.iter(|| ema(black_box(&closes), 50)));
    group.bench_function("rsi_14", |b| b.iter(|| rsi(black_box(&closes), 14)));
    group.bench_function("atr_14", |b| b.iter(|| atr(black_box(&candles), 14)));
    group.bench_function("donchian_20", |b| {
        b.iter(|| donchian(black_box(&candles), 20, DonchianBand::Upper))
    });
    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let candles = make_candles(10_000);
    let spec = presets::ma_crossover(10, 30);
    c.bench_function("pipeline/ma_crossover_10k", |b| {
        b.iter(|| {
            let compiled = spec.compile().unwrap();
            compiled.evaluate(black_box(&candles))
        })
    });
}

fn bench_engine(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine");
    for &n in &[1_000usize, 10_000, 100_000] {
        let candles = make_candles(n);
        let signals = presets::ma_crossover(10, 30)
            .compile()
            .unwrap()
            .evaluate(&candles);
        let plain = StrategyConfig::default();
        let full = full_config();
        group.bench_with_input(BenchmarkId::new("plain", n), &n, |b, _| {
            b.iter(|| run(black_box(&candles), black_box(&signals), &plain).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("dca_tp_trailing", n), &n, |b, _| {
            b.iter(|| run(black_box(&candles), black_box(&signals), &full).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_indicators, bench_pipeline, bench_engine);
criterion_main!(benches);
