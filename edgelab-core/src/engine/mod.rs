//! Trade execution engine.
//!
//! `run(candles, signals, config)` is a pure function: no I/O, no shared
//! state, so the optimizer may call it from any number of threads at once.

pub mod execution;
pub mod loop_runner;
pub(crate) mod position;
pub mod state;

pub use loop_runner::run;
pub use state::RunResult;

use thiserror::Error;

use crate::domain::{Candle, ConfigError};
use crate::signals::{CompiledPipeline, PipelineSpec};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("invalid config: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("insufficient data: {candles} candles < minimum 2")]
    InsufficientData { candles: usize },
    #[error("signal series has {signals} entries for {candles} candles")]
    SignalMismatch { candles: usize, signals: usize },
    #[error("invalid pipeline: {0}")]
    Pipeline(#[from] crate::signals::PipelineError),
}

/// Evaluate `pipeline` over `candles` and run the engine on its signals.
pub fn run_pipeline(
    candles: &[Candle],
    pipeline: &CompiledPipeline,
    config: &crate::domain::StrategyConfig,
) -> Result<RunResult, EngineError> {
    let signals = pipeline.evaluate(candles);
    run(candles, &signals, config)
}

/// Compile `spec` and run it.
pub fn run_spec(
    candles: &[Candle],
    spec: &PipelineSpec,
    config: &crate::domain::StrategyConfig,
) -> Result<RunResult, EngineError> {
    let compiled = spec.compile()?;
    run_pipeline(candles, &compiled, config)
}
