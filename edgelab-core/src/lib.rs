//! EdgeLab Core: candle data, signal pipelines and the trade execution engine.
//!
//! - Domain types (candles, strategy config, trades, equity points)
//! - Indicators as pure functions over candle slices
//! - Declarative signal pipelines compiled ahead of time
//! - A deterministic, single-threaded engine with leverage, TP ladders,
//!   trailing stops and DCA grids
//! - Fingerprinting and seeded RNG used by the optimizer

pub mod domain;
pub mod engine;
pub mod fingerprint;
pub mod indicators;
pub mod rng;
pub mod signals;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything the runner shares across worker threads
    /// is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::Candle>();
        require_sync::<domain::Candle>();
        require_send::<domain::CandleStore>();
        require_sync::<domain::CandleStore>();
        require_send::<domain::StrategyConfig>();
        require_sync::<domain::StrategyConfig>();
        require_send::<domain::Trade>();
        require_sync::<domain::Trade>();

        require_send::<signals::PipelineSpec>();
        require_sync::<signals::PipelineSpec>();
        require_send::<signals::CompiledPipeline>();
        require_sync::<signals::CompiledPipeline>();

        require_send::<engine::RunResult>();
        require_sync::<engine::RunResult>();
        require_send::<engine::EngineError>();
        require_sync::<engine::EngineError>();

        require_send::<fingerprint::StrategyDefinition>();
        require_sync::<fingerprint::StrategyDefinition>();
        require_send::<rng::RngHierarchy>();
        require_sync::<rng::RngHierarchy>();
    }

    /// Signal evaluation takes candles only; it cannot observe engine state.
    #[test]
    fn pipeline_evaluation_sees_only_candles() {
        fn _check(p: &signals::CompiledPipeline, c: &[domain::Candle]) -> Vec<signals::Signal> {
            p.evaluate(c)
        }
    }
}
