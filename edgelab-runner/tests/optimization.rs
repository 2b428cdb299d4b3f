//! End-to-end optimization runs over synthetic candles.

mod common;

use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use edgelab_core::domain::StrategyConfig;
use edgelab_core::signals::presets;
use edgelab_runner::{
    optimize, CoordinatorConfig, EvalContext, GridSearch, JobSpec, Objective, ParamSpace,
    ParamSpec, RunCache, RunStatus, SearchMethod, StopReason, StrategyTemplate, TpeConfig,
    TpeSearch, TrialStatus,
};

fn context(objective: Objective) -> EvalContext {
    EvalContext::new(
        common::wave_store(300),
        StrategyTemplate::new(presets::ma_crossover(5, 30), StrategyConfig::default()),
        objective,
    )
}

fn periods_space() -> ParamSpace {
    ParamSpace::new(vec![
        ParamSpec::discrete("fast.period", 3.0, 12.0, 3.0),
        ParamSpec::discrete("slow.period", 20.0, 40.0, 10.0),
    ])
}

fn coordinator(threads: usize, batch_size: usize) -> CoordinatorConfig {
    CoordinatorConfig {
        threads,
        batch_size,
        ..CoordinatorConfig::default()
    }
}

#[test]
fn grid_evaluates_every_combination_once() {
    let ctx = context(Objective::maximize("total_return"));
    let mut grid = GridSearch::new(periods_space(), None).unwrap();
    let result = optimize(&ctx, &mut grid, &coordinator(4, 5), None).unwrap();

    assert_eq!(result.trials.len(), 12);
    assert_eq!(result.stop_reason, StopReason::Exhausted);
    assert_eq!(result.status, RunStatus::Completed);
    let keys: HashSet<_> = result.trials.iter().map(|t| t.params.key()).collect();
    assert_eq!(keys.len(), 12);
    for (i, t) in result.trials.iter().enumerate() {
        assert_eq!(t.index, i);
    }
}

#[test]
fn ranking_is_best_first() {
    let ctx = context(Objective::minimize("max_drawdown"));
    let mut grid = GridSearch::new(periods_space(), None).unwrap();
    let result = optimize(&ctx, &mut grid, &coordinator(2, 4), None).unwrap();

    let values: Vec<f64> = result.ranked.iter().map(|r| r.value).collect();
    assert!(values.windows(2).all(|w| w[0] <= w[1]), "{values:?}");
    assert_eq!(result.ranked[0].rank, 1);
    assert_eq!(result.best_params.as_ref(), Some(&result.ranked[0].params));
    let best_dd = result
        .best_metrics
        .as_ref()
        .and_then(|m| m.value("max_drawdown"))
        .unwrap();
    assert!((best_dd - values[0]).abs() < 1e-10);
}

#[test]
fn result_does_not_depend_on_thread_count() {
    let ctx = context(Objective::maximize("sharpe"));
    let space = ParamSpace::new(vec![
        ParamSpec::discrete("fast.period", 2.0, 15.0, 1.0),
        ParamSpec::discrete("slow.period", 16.0, 60.0, 2.0),
        ParamSpec::continuous("stop_loss_pct", 1.0, 8.0),
    ]);
    let tpe = TpeConfig {
        n_trials: 30,
        n_startup: 8,
        seed: 99,
        ..TpeConfig::default()
    };

    let run = |threads: usize| {
        let mut search = TpeSearch::new(space.clone(), tpe.clone()).unwrap();
        optimize(&ctx, &mut search, &coordinator(threads, 6), None).unwrap()
    };
    let single = run(1);
    let multi = run(4);

    assert_eq!(single.trials.len(), multi.trials.len());
    for (a, b) in single.trials.iter().zip(&multi.trials) {
        assert_eq!(a.params, b.params);
        assert_eq!(a.status, b.status);
        assert_eq!(a.objective, b.objective);
    }
    assert_eq!(single.best_params, multi.best_params);
}

#[test]
fn failing_trials_do_not_stop_the_search() {
    let ctx = context(Objective::maximize("total_return"));
    let space = ParamSpace::new(vec![
        ParamSpec::choice("leverage", vec![0.5, 1.0, 2.0]),
        ParamSpec::discrete("fast.period", 5.0, 10.0, 5.0),
    ]);
    let mut grid = GridSearch::new(space, None).unwrap();
    let result = optimize(&ctx, &mut grid, &coordinator(3, 4), None).unwrap();

    assert_eq!(result.trials.len(), 6);
    assert_eq!(result.counts.failed, 2);
    assert_eq!(result.counts.succeeded, 4);
    assert_eq!(result.status, RunStatus::Partial);
    assert_eq!(result.failures.len(), 2);
    for failure in &result.failures {
        assert_eq!(failure.status, TrialStatus::Failed);
        assert_eq!(failure.params.get("leverage"), Some(0.5));
        assert!(failure.reason.contains("leverage"), "{}", failure.reason);
    }
    let best = result.best_params.unwrap();
    assert_ne!(best.get("leverage"), Some(0.5));
}

#[test]
fn repeated_search_is_served_from_cache() {
    let cache = Arc::new(RunCache::new(64, None));
    let ctx = context(Objective::maximize("total_return")).with_cache(Arc::clone(&cache));

    let first = {
        let mut grid = GridSearch::new(periods_space(), None).unwrap();
        optimize(&ctx, &mut grid, &coordinator(4, 4), None).unwrap()
    };
    let second = {
        let mut grid = GridSearch::new(periods_space(), None).unwrap();
        optimize(&ctx, &mut grid, &coordinator(4, 4), None).unwrap()
    };

    let stats = second.cache.unwrap();
    assert_eq!(stats.misses, 12);
    assert_eq!(stats.hits, 12);
    assert_eq!(stats.entries, 12);
    assert_eq!(first.best_params, second.best_params);
    assert_eq!(first.best_score, second.best_score);
}

#[test]
fn budget_and_cancellation_stop_early() {
    let ctx = context(Objective::maximize("total_return"));

    let mut grid = GridSearch::new(periods_space(), None).unwrap();
    let config = CoordinatorConfig {
        max_trials: Some(5),
        ..coordinator(2, 4)
    };
    let result = optimize(&ctx, &mut grid, &config, None).unwrap();
    assert_eq!(result.trials.len(), 5);
    assert_eq!(result.stop_reason, StopReason::Budget);

    let cancel = AtomicBool::new(true);
    let mut grid = GridSearch::new(periods_space(), None).unwrap();
    let result = optimize(&ctx, &mut grid, &coordinator(2, 4), Some(&cancel)).unwrap();
    assert!(result.trials.is_empty());
    assert_eq!(result.stop_reason, StopReason::Cancelled);
    assert_eq!(result.status, RunStatus::Failed);
}

#[test]
fn job_spec_drives_a_search() {
    let spec = JobSpec::from_toml_str(
        r#"
        [strategy]
        preset = "ma_crossover"

        [objective]
        metric = "net_profit"

        [[params]]
        name = "fast.period"
        kind = "discrete"
        min = 4
        max = 8
        step = 2

        [search]
        method = "grid"

        [coordinator]
        threads = 2
        batch_size = 2
        "#,
    )
    .unwrap();
    let ctx = EvalContext::new(common::wave_store(250), spec.template().unwrap(), spec.objective.clone());
    assert_eq!(spec.search, SearchMethod::Grid { max_combinations: None });
    let mut search = spec.search.build(spec.space(), 0).unwrap();
    let result = optimize(&ctx, search.as_mut(), &spec.coordinator, None).unwrap();

    assert_eq!(result.strategy, "grid");
    assert_eq!(result.trials.len(), 3);
    assert!(result.best_score.is_some());
}
