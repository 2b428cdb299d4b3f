//! Objective: which metric a search optimizes, and in which direction.

use serde::{Deserialize, Serialize};

use crate::evaluate::EvalError;
use crate::metrics::{MetricSet, MetricValue};

/// Whether larger or smaller metric values are better.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Maximize,
    Minimize,
}

/// The scalar a search ranks parameter sets by.
///
/// `score` is normalized so that higher is always better: a minimized metric
/// is negated. Searches compare scores with `>` only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Objective {
    pub metric: String,
    #[serde(default)]
    pub direction: Direction,
}

impl Default for Objective {
    fn default() -> Self {
        Self::maximize("sharpe")
    }
}

impl Objective {
    pub fn maximize(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            direction: Direction::Maximize,
        }
    }

    pub fn minimize(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            direction: Direction::Minimize,
        }
    }

    /// Normalized score of `metrics`. Missing or undefined metrics are errors.
    pub fn score(&self, metrics: &MetricSet) -> Result<f64, EvalError> {
        match metrics.get(&self.metric) {
            Some(MetricValue::Value(v)) => Ok(self.normalize(v)),
            Some(MetricValue::Undefined) => Err(EvalError::UndefinedObjective {
                metric: self.metric.clone(),
            }),
            None => Err(EvalError::UnknownMetric {
                metric: self.metric.clone(),
            }),
        }
    }

    /// Map a raw metric value into "higher is better" space.
    pub fn normalize(&self, raw: f64) -> f64 {
        match self.direction {
            Direction::Maximize => raw,
            Direction::Minimize => -raw,
        }
    }

    /// Inverse of [`Objective::normalize`], for reporting raw values.
    pub fn raw(&self, score: f64) -> f64 {
        self.normalize(score)
    }
}
