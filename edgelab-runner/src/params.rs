//! Parameter spaces and parameter sets.
//!
//! A [`ParamSpace`] names the tunable dimensions of a strategy template. Each
//! dimension is one of:
//! - `discrete`: `min..=max` in `step` increments
//! - `continuous`: `[low, high]`, uniform or log-uniform
//! - `choice`: an explicit list of values
//!
//! Spaces are validated before any evaluation runs.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Slack for float comparisons on range boundaries.
const BOUND_EPS: f64 = 1e-9;

/// Largest number of points a single discrete dimension may enumerate.
pub const MAX_AXIS_VALUES: usize = 1_000_000;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParamError {
    #[error("parameter space is empty")]
    EmptySpace,
    #[error("parameter '{0}' is declared more than once")]
    DuplicateName(String),
    #[error("parameter '{name}': {reason}")]
    InvalidRange { name: String, reason: String },
    #[error("parameter '{name}' is continuous and cannot be enumerated by a grid")]
    ContinuousInGrid { name: String },
    #[error("unknown parameter '{name}'")]
    UnknownParam { name: String },
    #[error("parameter '{name}' is missing from the parameter set")]
    Missing { name: String },
    #[error("parameter '{name}' = {value}: {reason}")]
    InvalidValue {
        name: String,
        value: f64,
        reason: String,
    },
}

/// Sampling distribution of a continuous parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distribution {
    #[default]
    Uniform,
    LogUniform,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParamKind {
    Discrete {
        min: f64,
        max: f64,
        step: f64,
    },
    Continuous {
        low: f64,
        high: f64,
        #[serde(default)]
        distribution: Distribution,
    },
    Choice {
        values: Vec<f64>,
    },
}

/// One named dimension of a search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: ParamKind,
}

impl ParamSpec {
    pub fn discrete(name: impl Into<String>, min: f64, max: f64, step: f64) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Discrete { min, max, step },
        }
    }

    pub fn continuous(name: impl Into<String>, low: f64, high: f64) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Continuous {
                low,
                high,
                distribution: Distribution::Uniform,
            },
        }
    }

    pub fn log_uniform(name: impl Into<String>, low: f64, high: f64) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Continuous {
                low,
                high,
                distribution: Distribution::LogUniform,
            },
        }
    }

    pub fn choice(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::Choice { values },
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> ParamError {
        ParamError::InvalidRange {
            name: self.name.clone(),
            reason: reason.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ParamError> {
        match &self.kind {
            ParamKind::Discrete { min, max, step } => {
                if !(min.is_finite() && max.is_finite() && step.is_finite()) {
                    return Err(self.invalid("bounds and step must be finite"));
                }
                if min > max {
                    return Err(self.invalid(format!("min {min} > max {max}")));
                }
                if *step <= 0.0 {
                    return Err(self.invalid(format!("step {step} must be > 0")));
                }
                let points = (max - min) / step;
                if points >= MAX_AXIS_VALUES as f64 {
                    return Err(self.invalid(format!(
                        "{points:.0} steps exceed the limit of {MAX_AXIS_VALUES} values"
                    )));
                }
            }
            ParamKind::Continuous {
                low,
                high,
                distribution,
            } => {
                if !(low.is_finite() && high.is_finite()) {
                    return Err(self.invalid("bounds must be finite"));
                }
                if low >= high {
                    return Err(self.invalid(format!("low {low} must be < high {high}")));
                }
                if *distribution == Distribution::LogUniform && *low <= 0.0 {
                    return Err(self.invalid("log-uniform low must be > 0"));
                }
            }
            ParamKind::Choice { values } => {
                if values.is_empty() {
                    return Err(self.invalid("choice list is empty"));
                }
                if values.iter().any(|v| !v.is_finite()) {
                    return Err(self.invalid("choice values must be finite"));
                }
            }
        }
        Ok(())
    }

    /// Number of enumerable values, `None` for a continuous dimension.
    pub fn value_count(&self) -> Option<usize> {
        match &self.kind {
            ParamKind::Discrete { min, max, step } => {
                Some(((max - min) / step + BOUND_EPS).floor() as usize + 1)
            }
            ParamKind::Choice { values } => Some(values.len()),
            ParamKind::Continuous { .. } => None,
        }
    }

    /// The `k`-th enumerable value. `k` must be below [`Self::value_count`].
    pub fn value_at(&self, k: usize) -> f64 {
        match &self.kind {
            ParamKind::Discrete { min, step, .. } => min + k as f64 * step,
            ParamKind::Choice { values } => values[k],
            ParamKind::Continuous { low, .. } => *low,
        }
    }

    /// Enumerated values for grid search, in ascending (or declared) order.
    pub fn grid_values(&self) -> Result<Vec<f64>, ParamError> {
        match self.value_count() {
            Some(count) => Ok((0..count).map(|k| self.value_at(k)).collect()),
            None => Err(ParamError::ContinuousInGrid {
                name: self.name.clone(),
            }),
        }
    }

    /// Uniform draw from the dimension (log-uniform where declared).
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match &self.kind {
            ParamKind::Discrete { .. } | ParamKind::Choice { .. } => {
                let count = self.value_count().unwrap_or(1).max(1);
                self.value_at(rng.gen_range(0..count))
            }
            ParamKind::Continuous {
                low,
                high,
                distribution: Distribution::Uniform,
            } => rng.gen_range(*low..=*high),
            ParamKind::Continuous {
                low,
                high,
                distribution: Distribution::LogUniform,
            } => rng.gen_range(low.ln()..=high.ln()).exp().clamp(*low, *high),
        }
    }

    /// Whether `value` is a legal point of this dimension.
    pub fn contains(&self, value: f64) -> bool {
        match &self.kind {
            ParamKind::Discrete { min, max, step } => {
                if value < min - BOUND_EPS || value > max + BOUND_EPS {
                    return false;
                }
                let k = (value - min) / step;
                (k - k.round()).abs() < 1e-6
            }
            ParamKind::Continuous { low, high, .. } => {
                value >= low - BOUND_EPS && value <= high + BOUND_EPS
            }
            ParamKind::Choice { values } => values.iter().any(|v| (v - value).abs() < BOUND_EPS),
        }
    }
}

/// Validated collection of parameter dimensions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSpace {
    pub params: Vec<ParamSpec>,
}

impl ParamSpace {
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self { params }
    }

    pub fn validate(&self) -> Result<(), ParamError> {
        if self.params.is_empty() {
            return Err(ParamError::EmptySpace);
        }
        let mut seen = HashSet::new();
        for p in &self.params {
            if !seen.insert(p.name.as_str()) {
                return Err(ParamError::DuplicateName(p.name.clone()));
            }
            p.validate()?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Number of grid points, `None` if any dimension is continuous.
    /// Saturates instead of overflowing.
    pub fn grid_size(&self) -> Option<usize> {
        self.params.iter().try_fold(1usize, |acc, p| {
            p.value_count().map(|n| acc.saturating_mul(n))
        })
    }

    /// A uniformly random point in the space.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ParamSet {
        self.params
            .iter()
            .map(|p| (p.name.clone(), p.sample(rng)))
            .collect()
    }

    /// Whether `set` assigns a legal value to exactly the space's names.
    pub fn contains(&self, set: &ParamSet) -> bool {
        set.len() == self.params.len()
            && self
                .params
                .iter()
                .all(|p| set.get(&p.name).is_some_and(|v| p.contains(v)))
    }
}

/// A concrete assignment of values to named parameters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSet(BTreeMap<String, f64>);

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn require(&self, name: &str) -> Result<f64, ParamError> {
        self.get(name).ok_or_else(|| ParamError::Missing {
            name: name.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Fingerprint used to key results and deduplicate proposals.
    ///
    /// Exact on the value bits, so -0.0 and 0.0 are normalized first.
    pub fn key(&self) -> ParamKey {
        let mut hasher = blake3::Hasher::new();
        for (name, value) in &self.0 {
            let v = if *value == 0.0 { 0.0_f64 } else { *value };
            hasher.update(name.as_bytes());
            hasher.update(&[0]);
            hasher.update(&v.to_bits().to_le_bytes());
        }
        ParamKey(*hasher.finalize().as_bytes())
    }
}

impl FromIterator<(String, f64)> for ParamSet {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for ParamSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.0 {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{k}={v}")?;
            first = false;
        }
        Ok(())
    }
}

/// Content fingerprint of a [`ParamSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamKey([u8; 32]);

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..6] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}
