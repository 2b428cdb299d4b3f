//! Walk-forward analysis over synthetic candles.

mod common;

use edgelab_core::domain::{CandleStore, StrategyConfig};
use edgelab_core::signals::presets;
use edgelab_runner::{
    run_walk_forward, CoordinatorConfig, EvalContext, Objective, ParamSpace, ParamSpec,
    SearchMethod, StrategyTemplate, WalkForwardConfig, WalkForwardError, WindowMode,
};

fn context(store: CandleStore) -> EvalContext {
    EvalContext::new(
        store,
        StrategyTemplate::new(presets::ma_crossover(5, 20), StrategyConfig::default()),
        Objective::maximize("total_return"),
    )
}

fn space() -> ParamSpace {
    ParamSpace::new(vec![
        ParamSpec::discrete("fast.period", 3.0, 9.0, 3.0),
        ParamSpec::discrete("slow.period", 15.0, 25.0, 5.0),
    ])
}

fn wf_config(mode: WindowMode) -> WalkForwardConfig {
    WalkForwardConfig {
        n_windows: 3,
        oos_ratio: 0.25,
        mode,
        min_is_bars: 100,
        min_oos_bars: 20,
    }
}

fn coordinator() -> CoordinatorConfig {
    CoordinatorConfig {
        threads: 2,
        batch_size: 4,
        ..CoordinatorConfig::default()
    }
}

#[test]
fn in_sample_search_never_sees_later_candles() {
    let closes = common::wave_closes(400);
    let baseline = context(CandleStore::new(common::candles_from_closes(&closes)).unwrap());
    let method = SearchMethod::default();
    let config = wf_config(WindowMode::Rolling);
    let before = run_walk_forward(&baseline, &space(), &method, &coordinator(), &config, None).unwrap();
    let first = &before.windows[0];

    // Rewrite everything after the first IS window with a crash.
    let mut tampered = closes.clone();
    for (i, close) in tampered.iter_mut().enumerate().skip(first.spec.is_end) {
        *close = 50.0 + 0.01 * i as f64;
    }
    let altered = context(CandleStore::new(common::candles_from_closes(&tampered)).unwrap());
    let after = run_walk_forward(&altered, &space(), &method, &coordinator(), &config, None).unwrap();

    assert_eq!(after.windows[0].spec, first.spec);
    assert_eq!(after.windows[0].is_best_params, first.is_best_params);
    assert_eq!(after.windows[0].is_score, first.is_score);
}

#[test]
fn windows_are_chronological_and_disjoint() {
    let ctx = context(common::wave_store(400));
    for mode in [WindowMode::Rolling, WindowMode::Anchored] {
        let result = run_walk_forward(
            &ctx,
            &space(),
            &SearchMethod::default(),
            &coordinator(),
            &wf_config(mode),
            None,
        )
        .unwrap();
        assert_eq!(result.windows.len(), 3);
        for pair in result.windows.windows(2) {
            assert_eq!(pair[0].spec.oos_end, pair[1].spec.oos_start);
        }
        for w in &result.windows {
            assert!(w.spec.is_end <= w.spec.oos_start);
            assert!(w.spec.oos_end <= 400);
            if mode == WindowMode::Anchored {
                assert_eq!(w.spec.is_start, 0);
            }
            assert_eq!(w.is_trials.total(), 9);
        }
        assert!((0.0..=100.0).contains(&result.robustness_score));
        assert!(result.evaluated_windows <= 3);
        assert!(!result.cancelled);
    }
}

#[test]
fn too_few_candles_is_an_error() {
    let ctx = context(common::wave_store(120));
    let err = run_walk_forward(
        &ctx,
        &space(),
        &SearchMethod::default(),
        &coordinator(),
        &wf_config(WindowMode::Rolling),
        None,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        WalkForwardError::InsufficientData { total_bars: 120, .. }
    ));
}
