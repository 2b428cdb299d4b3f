//! Evaluation context: one parameter set in, metrics and an objective out.
//!
//! `EvalContext` bundles everything a trial needs (candles, template,
//! objective, optional run cache). It is built once by the caller and shared
//! read-only by every worker thread.

use std::sync::Arc;

use edgelab_core::domain::{CandleError, CandleStore};
use edgelab_core::engine::{self, EngineError, RunResult};
use edgelab_core::fingerprint::RunKey;
use serde::Serialize;
use thiserror::Error;

use crate::cache::RunCache;
use crate::metrics::{self, MetricSet};
use crate::objective::Objective;
use crate::params::{ParamError, ParamSet};
use crate::template::StrategyTemplate;

/// Why a single evaluation failed. Recorded per trial; never aborts a search.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    #[error("parameters: {0}")]
    Param(#[from] ParamError),
    #[error("engine: {0}")]
    Engine(#[from] EngineError),
    #[error("objective metric '{metric}' is undefined for this run")]
    UndefinedObjective { metric: String },
    #[error("objective metric '{metric}' does not exist")]
    UnknownMetric { metric: String },
    #[error("non-finite objective {value}")]
    NonFinite { value: f64 },
    #[error("evaluation panicked: {0}")]
    Panicked(String),
    #[error("evaluation exceeded its {limit_secs}s time limit")]
    TimedOut { limit_secs: f64 },
}

/// Result of scoring one parameter set.
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    pub metrics: MetricSet,
    /// Normalized objective: higher is better.
    pub objective: f64,
    #[serde(skip)]
    pub run: Arc<RunResult>,
}

#[derive(Debug, Clone)]
pub struct EvalContext {
    pub candles: CandleStore,
    pub template: StrategyTemplate,
    pub objective: Objective,
    pub cache: Option<Arc<RunCache>>,
    pub periods_per_year: f64,
}

impl EvalContext {
    pub fn new(candles: CandleStore, template: StrategyTemplate, objective: Objective) -> Self {
        let periods_per_year = metrics::periods_per_year(candles.median_spacing_secs());
        Self {
            candles,
            template,
            objective,
            cache: None,
            periods_per_year,
        }
    }

    pub fn with_cache(mut self, cache: Arc<RunCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Same context over a sub-range of the candles. Shares the candle
    /// allocation and the cache.
    pub fn with_candles(&self, range: std::ops::Range<usize>) -> Result<Self, CandleError> {
        Ok(Self {
            candles: self.candles.slice(range)?,
            ..self.clone()
        })
    }

    /// Resolve `params`, run the engine (through the cache) and score the run.
    pub fn evaluate(&self, params: &ParamSet) -> Result<Evaluation, EvalError> {
        let definition = self.template.apply(params)?;
        let candles = self.candles.as_slice();
        let compute = || engine::run_spec(candles, &definition.pipeline, &definition.config);
        let run = match &self.cache {
            Some(cache) => cache.get_or_compute(RunKey::new(&definition, &self.candles), compute)?,
            None => Arc::new(compute()?),
        };
        let metrics = metrics::extract(&run, self.periods_per_year);
        let objective = self.objective.score(&metrics)?;
        if !objective.is_finite() {
            return Err(EvalError::NonFinite { value: objective });
        }
        Ok(Evaluation {
            metrics,
            objective,
            run,
        })
    }
}
