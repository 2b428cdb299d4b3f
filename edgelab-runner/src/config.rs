//! Job specs: one TOML file describing a strategy, its search space and the
//! search / robustness settings.
//!
//! ```toml
//! [strategy]
//! preset = "ma_crossover"
//!
//! [strategy.config]
//! leverage = 2.0
//! stop_loss_pct = 3.0
//!
//! [objective]
//! metric = "sharpe"
//!
//! [[params]]
//! name = "fast.period"
//! kind = "discrete"
//! min = 5
//! max = 20
//! step = 5
//!
//! [search]
//! method = "grid"
//! ```
//!
//! Every section but `strategy` is optional and falls back to its defaults.

use std::path::Path;

use edgelab_core::domain::StrategyConfig;
use edgelab_core::signals::{presets, PipelineSpec};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheConfig;
use crate::coordinator::CoordinatorConfig;
use crate::monte_carlo::MonteCarloConfig;
use crate::objective::Objective;
use crate::params::{ParamError, ParamSpace, ParamSpec};
use crate::search::SearchMethod;
use crate::template::StrategyTemplate;
use crate::walk_forward::WalkForwardConfig;

#[derive(Debug, Error)]
pub enum JobSpecError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse job spec: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unknown preset '{0}'")]
    UnknownPreset(String),
    #[error("invalid job spec: {0}")]
    Invalid(String),
    #[error(transparent)]
    Param(#[from] ParamError),
}

/// The strategy under test: a preset or an explicit pipeline, plus the
/// engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySection {
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub pipeline: Option<PipelineSpec>,
    #[serde(default)]
    pub config: StrategyConfig,
}

impl StrategySection {
    pub fn template(&self) -> Result<StrategyTemplate, JobSpecError> {
        let pipeline = match (&self.preset, &self.pipeline) {
            (Some(name), None) => {
                presets::by_name(name).ok_or_else(|| JobSpecError::UnknownPreset(name.clone()))?
            }
            (None, Some(pipeline)) => pipeline.clone(),
            (Some(_), Some(_)) => {
                return Err(JobSpecError::Invalid(
                    "strategy sets both `preset` and `pipeline`".into(),
                ))
            }
            (None, None) => {
                return Err(JobSpecError::Invalid(
                    "strategy needs a `preset` or a `pipeline`".into(),
                ))
            }
        };
        Ok(StrategyTemplate::new(pipeline, self.config.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub strategy: StrategySection,
    #[serde(default)]
    pub objective: Objective,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    #[serde(default)]
    pub search: SearchMethod,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub walk_forward: WalkForwardConfig,
    #[serde(default)]
    pub monte_carlo: MonteCarloConfig,
}

impl JobSpec {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, JobSpecError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| JobSpecError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate.
    pub fn from_toml_str(text: &str) -> Result<Self, JobSpecError> {
        let spec: JobSpec = toml::from_str(text)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Checks that need no candles: a resolvable strategy, a valid engine
    /// config, and (when present) a parameter space the template accepts.
    pub fn validate(&self) -> Result<(), JobSpecError> {
        let template = self.strategy.template()?;
        template
            .pipeline
            .compile()
            .map_err(|e| JobSpecError::Invalid(format!("pipeline: {e}")))?;
        self.strategy
            .config
            .validate()
            .map_err(|e| JobSpecError::Invalid(format!("strategy config: {e}")))?;
        if !self.params.is_empty() {
            let space = self.space();
            space.validate()?;
            template.check_space(&space)?;
        }
        if self.coordinator.batch_size == 0 {
            return Err(JobSpecError::Invalid("coordinator.batch_size must be >= 1".into()));
        }
        self.monte_carlo
            .validate()
            .map_err(|e| JobSpecError::Invalid(e.to_string()))?;
        Ok(())
    }

    pub fn template(&self) -> Result<StrategyTemplate, JobSpecError> {
        self.strategy.template()
    }

    pub fn space(&self) -> ParamSpace {
        ParamSpace::new(self.params.clone())
    }
}
