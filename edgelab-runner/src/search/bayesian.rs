//! Bayesian search with a Tree-structured Parzen Estimator (TPE).
//!
//! After `n_startup` random trials, succeeded trials are ranked by objective
//! and split into a "good" head (`ceil(n * gamma)`) and a "bad" tail. For each
//! numeric dimension, `n_candidates` draws come from a Gaussian mixture
//! around the good values; the candidate maximizing `l(x) / g(x)` wins.
//! Choice dimensions use Laplace-smoothed good/bad frequencies.
//!
//! Dimensions are modelled independently. Log-uniform dimensions are modelled
//! in log space; discrete ones snap to their grid.

use edgelab_core::rng::RngHierarchy;
use rand::distributions::WeightedIndex;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution as _, Normal};
use serde::{Deserialize, Serialize};

use crate::coordinator::{SearchStrategy, TrialRecord};
use crate::params::{Distribution, ParamError, ParamKind, ParamSet, ParamSpace, ParamSpec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TpeConfig {
    /// Proposals before the search reports done.
    pub n_trials: usize,
    /// Random proposals before the model kicks in.
    pub n_startup: usize,
    /// Share of succeeded trials treated as "good".
    pub gamma: f64,
    /// Candidates drawn per dimension per proposal.
    pub n_candidates: usize,
    pub seed: u64,
}

impl Default for TpeConfig {
    fn default() -> Self {
        Self {
            n_trials: 100,
            n_startup: 10,
            gamma: 0.2,
            n_candidates: 24,
            seed: 42,
        }
    }
}

pub struct TpeSearch {
    space: ParamSpace,
    config: TpeConfig,
    rng: StdRng,
    proposed: usize,
}

impl TpeSearch {
    pub fn new(space: ParamSpace, config: TpeConfig) -> Result<Self, ParamError> {
        Self::with_stream(space, config, 0)
    }

    /// Like [`TpeSearch::new`] on an independent RNG stream of the same seed.
    pub fn with_stream(space: ParamSpace, config: TpeConfig, stream: u64) -> Result<Self, ParamError> {
        space.validate()?;
        if !(config.gamma > 0.0 && config.gamma < 1.0) {
            return Err(ParamError::InvalidValue {
                name: "gamma".into(),
                value: config.gamma,
                reason: "must be in (0, 1)".into(),
            });
        }
        let rng = RngHierarchy::new(config.seed).rng_for("tpe", stream);
        Ok(Self {
            space,
            config: TpeConfig {
                n_candidates: config.n_candidates.max(1),
                ..config
            },
            rng,
            proposed: 0,
        })
    }

    fn suggest(&mut self, history: &[TrialRecord]) -> ParamSet {
        let mut scored: Vec<(f64, &ParamSet)> = history
            .iter()
            .filter_map(|t| t.objective.map(|o| (o, &t.params)))
            .collect();
        if scored.len() < self.config.n_startup.max(2) {
            return self.space.sample(&mut self.rng);
        }
        // Best first; the sort is stable so ties keep dispatch order.
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        let n_good = ((scored.len() as f64 * self.config.gamma).ceil() as usize)
            .clamp(1, scored.len() - 1);
        let (good, bad) = scored.split_at(n_good);

        let mut out = ParamSet::new();
        for spec in &self.space.params {
            let column = |group: &[(f64, &ParamSet)]| -> Vec<f64> {
                group.iter().filter_map(|(_, p)| p.get(&spec.name)).collect()
            };
            let (good_vals, bad_vals) = (column(good), column(bad));
            let value = match &spec.kind {
                ParamKind::Choice { values } => {
                    sample_choice(values, &good_vals, &bad_vals, &mut self.rng)
                }
                _ => sample_numeric(
                    spec,
                    &good_vals,
                    &bad_vals,
                    self.config.n_candidates,
                    &mut self.rng,
                ),
            };
            out.insert(spec.name.clone(), value);
        }
        out
    }
}

impl SearchStrategy for TpeSearch {
    fn name(&self) -> &'static str {
        "bayesian"
    }

    fn space(&self) -> &ParamSpace {
        &self.space
    }

    fn propose_next(&mut self, history: &[TrialRecord]) -> Option<ParamSet> {
        if self.proposed >= self.config.n_trials {
            return None;
        }
        self.proposed += 1;
        Some(self.suggest(history))
    }

    fn is_done(&self, _history: &[TrialRecord]) -> bool {
        self.proposed >= self.config.n_trials
    }
}

// ── Helpers ──

/// Bounds and forward / inverse transform of a numeric dimension.
struct Axis {
    low: f64,
    high: f64,
    log: bool,
}

impl Axis {
    fn of(spec: &ParamSpec) -> Self {
        match &spec.kind {
            ParamKind::Discrete { min, max, .. } => Self {
                low: *min,
                high: *max,
                log: false,
            },
            ParamKind::Continuous {
                low,
                high,
                distribution,
            } => {
                let log = *distribution == Distribution::LogUniform;
                let t = |v: f64| if log { v.ln() } else { v };
                Self {
                    low: t(*low),
                    high: t(*high),
                    log,
                }
            }
            ParamKind::Choice { .. } => Self {
                low: 0.0,
                high: 0.0,
                log: false,
            },
        }
    }

    fn forward(&self, v: f64) -> f64 {
        if self.log {
            v.max(f64::MIN_POSITIVE).ln()
        } else {
            v
        }
    }

    fn inverse(&self, v: f64) -> f64 {
        if self.log {
            v.exp()
        } else {
            v
        }
    }
}

fn sample_numeric<R: Rng + ?Sized>(
    spec: &ParamSpec,
    good: &[f64],
    bad: &[f64],
    n_candidates: usize,
    rng: &mut R,
) -> f64 {
    if good.is_empty() {
        return spec.sample(rng);
    }
    let axis = Axis::of(spec);
    let width = axis.high - axis.low;
    if width <= 0.0 {
        return snap(spec, axis.inverse(axis.low));
    }
    let sigma = 0.1 * width;
    let good_t: Vec<f64> = good.iter().map(|v| axis.forward(*v)).collect();
    let bad_t: Vec<f64> = bad.iter().map(|v| axis.forward(*v)).collect();

    let mut best = good_t[0];
    let mut best_ratio = f64::NEG_INFINITY;
    for _ in 0..n_candidates {
        let center = good_t[rng.gen_range(0..good_t.len())];
        let draw = match Normal::new(center, sigma) {
            Ok(normal) => normal.sample(rng),
            Err(_) => center,
        };
        let candidate = draw.clamp(axis.low, axis.high);
        let lx = mixture_pdf(candidate, &good_t, sigma);
        let gx = mixture_pdf(candidate, &bad_t, sigma);
        let ratio = lx / (gx + 1e-10);
        if ratio > best_ratio {
            best_ratio = ratio;
            best = candidate;
        }
    }
    snap(spec, axis.inverse(best))
}

fn sample_choice<R: Rng + ?Sized>(values: &[f64], good: &[f64], bad: &[f64], rng: &mut R) -> f64 {
    let count = |group: &[f64], target: f64| {
        1.0 + group.iter().filter(|v| (**v - target).abs() < 1e-9).count() as f64
    };
    let weights: Vec<f64> = values
        .iter()
        .map(|v| count(good, *v) / count(bad, *v))
        .collect();
    match WeightedIndex::new(&weights) {
        Ok(dist) => values[dist.sample(rng)],
        Err(_) => values[rng.gen_range(0..values.len())],
    }
}

/// Mean Gaussian density of `x` under kernels centred on `centers`.
fn mixture_pdf(x: f64, centers: &[f64], sigma: f64) -> f64 {
    if centers.is_empty() {
        return 0.0;
    }
    centers.iter().map(|c| gaussian_pdf(x, *c, sigma)).sum::<f64>() / centers.len() as f64
}

fn gaussian_pdf(x: f64, mean: f64, sigma: f64) -> f64 {
    let z = (x - mean) / sigma;
    (-0.5 * z * z).exp() / (sigma * (2.0 * std::f64::consts::PI).sqrt())
}

/// Clamp into the dimension and round discrete values onto the step grid.
fn snap(spec: &ParamSpec, v: f64) -> f64 {
    match &spec.kind {
        ParamKind::Discrete { min, max, step } => {
            let k = ((v - min) / step).round().max(0.0);
            let last = ((max - min) / step + 1e-9).floor();
            min + k.min(last) * step
        }
        ParamKind::Continuous { low, high, .. } => v.clamp(*low, *high),
        ParamKind::Choice { .. } => v,
    }
}
