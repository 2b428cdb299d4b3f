//! Search strategies driven by the coordinator.
//!
//! - [`GridSearch`]: exhaustive (or evenly capped) cartesian product
//! - [`TpeSearch`]: Tree-structured Parzen Estimator
//!
//! Walk-forward and Monte Carlo wrap these; see [`crate::walk_forward`] and
//! [`crate::monte_carlo`].

pub mod bayesian;
pub mod grid;

pub use bayesian::{TpeConfig, TpeSearch};
pub use grid::GridSearch;

use serde::{Deserialize, Serialize};

use crate::coordinator::SearchStrategy;
use crate::params::{ParamError, ParamSpace};

/// Which search to run, with its settings, as read from a job spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SearchMethod {
    Grid {
        #[serde(default)]
        max_combinations: Option<usize>,
    },
    Bayesian(TpeConfig),
}

impl Default for SearchMethod {
    fn default() -> Self {
        SearchMethod::Grid {
            max_combinations: None,
        }
    }
}

impl SearchMethod {
    /// Build a fresh strategy over `space`. `stream` selects an independent
    /// RNG stream, so repeated searches (one per walk-forward window) do not
    /// replay each other's proposals.
    pub fn build(
        &self,
        space: ParamSpace,
        stream: u64,
    ) -> Result<Box<dyn SearchStrategy>, ParamError> {
        Ok(match self {
            SearchMethod::Grid { max_combinations } => {
                Box::new(GridSearch::new(space, *max_combinations)?)
            }
            SearchMethod::Bayesian(config) => {
                Box::new(TpeSearch::with_stream(space, config.clone(), stream)?)
            }
        })
    }
}
