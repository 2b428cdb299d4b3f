//! EdgeLab Runner: optimization on top of the `edgelab-core` engine.
//!
//! This crate provides:
//! - Metric extraction from a finished run (returns, drawdown, ratios, trades, tails)
//! - A content-addressed, bounded run cache
//! - Parameter spaces, strategy templates and objectives
//! - The optimization coordinator with pluggable search strategies (grid, TPE)
//! - Walk-forward validation and Monte Carlo trade resampling
//! - TOML job specs tying all of the above together

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod evaluate;
pub mod metrics;
pub mod monte_carlo;
pub mod objective;
pub mod params;
pub mod search;
pub mod tail_metrics;
pub mod template;
pub mod walk_forward;

#[cfg(test)]
mod test_support;

pub use cache::{CacheConfig, CacheStats, RunCache};
pub use config::{JobSpec, JobSpecError, StrategySection};
pub use coordinator::{
    optimize, CoordinatorConfig, CoordinatorError, FailureRecord, OptimizationResult, RankedTrial,
    RunStatus, SearchStrategy, StopReason, TrialCounts, TrialRecord, TrialStatus,
};
pub use evaluate::{EvalContext, EvalError, Evaluation};
pub use metrics::{MetricSet, MetricValue};
pub use monte_carlo::{
    run_monte_carlo, MonteCarloConfig, MonteCarloError, MonteCarloResult, ResampleMethod,
};
pub use objective::{Direction, Objective};
pub use params::{Distribution, ParamError, ParamKey, ParamKind, ParamSet, ParamSpace, ParamSpec};
pub use search::{GridSearch, SearchMethod, TpeConfig, TpeSearch};
pub use template::StrategyTemplate;
pub use walk_forward::{
    create_windows, run_walk_forward, WalkForwardConfig, WalkForwardError, WalkForwardResult,
    WalkForwardWindow, WindowMode, WindowSpec,
};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn shared_across_workers() {
        assert_send::<EvalContext>();
        assert_sync::<EvalContext>();
        assert_send::<RunCache>();
        assert_sync::<RunCache>();
        assert_send::<ParamSet>();
        assert_sync::<ParamSet>();
    }

    #[test]
    fn results_are_send_sync() {
        assert_send::<Evaluation>();
        assert_sync::<Evaluation>();
        assert_send::<EvalError>();
        assert_send::<OptimizationResult>();
        assert_sync::<OptimizationResult>();
        assert_send::<WalkForwardResult>();
        assert_send::<MonteCarloResult>();
    }

    #[test]
    fn strategies_are_send() {
        assert_send::<GridSearch>();
        assert_send::<TpeSearch>();
        assert_send::<Box<dyn SearchStrategy>>();
    }

    #[test]
    fn configs_are_send_sync() {
        assert_send::<JobSpec>();
        assert_sync::<JobSpec>();
        assert_send::<CoordinatorConfig>();
        assert_send::<WalkForwardConfig>();
        assert_send::<MonteCarloConfig>();
    }
}
