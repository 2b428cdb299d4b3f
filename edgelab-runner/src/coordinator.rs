//! Optimization coordinator: proposal loop, parallel dispatch, bookkeeping.
//!
//! The coordinator owns the search loop:
//! 1. ask the [`SearchStrategy`] for a batch of parameter sets
//! 2. evaluate the batch on a rayon pool; workers send `(key, outcome)` over a
//!    crossbeam channel
//! 3. re-order outcomes into dispatch order and append them to the history
//! 4. check stop conditions (budget, timeout, patience, cancellation)
//!
//! Only the coordinator thread touches the history, so the proposal sequence,
//! and therefore the whole result, does not depend on the worker count or on
//! completion order.
//!
//! A failing evaluation (engine error, undefined objective, panic) becomes a
//! `failed` trial and the search carries on. Timeouts and cancellation are
//! cooperative: in-flight evaluations always finish.

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheStats;
use crate::evaluate::{EvalContext, EvalError, Evaluation};
use crate::metrics::MetricSet;
use crate::objective::Objective;
use crate::params::{ParamError, ParamKey, ParamSet, ParamSpace};

/// Consecutive all-duplicate proposal rounds after which a search counts as
/// exhausted.
const MAX_STALE_ROUNDS: usize = 16;

// ─── Search strategy contract ────────────────────────────────────────

/// A proposal policy over a parameter space.
///
/// `history` is every trial so far, in dispatch order. Implementations may
/// keep internal state (a grid cursor, an RNG) but must derive proposals only
/// from that state and `history`.
pub trait SearchStrategy: Send {
    fn name(&self) -> &'static str;

    fn space(&self) -> &ParamSpace;

    /// Next parameter set to try, or `None` when nothing is left.
    fn propose_next(&mut self, history: &[TrialRecord]) -> Option<ParamSet>;

    /// Up to `n` proposals evaluated together. Proposals within one batch see
    /// the same history.
    fn propose_batch(&mut self, history: &[TrialRecord], n: usize) -> Vec<ParamSet> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            match self.propose_next(history) {
                Some(p) => out.push(p),
                None => break,
            }
        }
        out
    }

    fn is_done(&self, history: &[TrialRecord]) -> bool;
}

// ─── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Worker threads; 0 uses rayon's default (one per core).
    pub threads: usize,
    /// Proposals dispatched per round.
    pub batch_size: usize,
    /// Stop after this many trials.
    pub max_trials: Option<usize>,
    /// Wall-clock budget of the whole search, checked between batches.
    pub timeout_secs: Option<f64>,
    /// A trial that takes longer is recorded as `timed_out` and its result
    /// discarded.
    pub trial_timeout_secs: Option<f64>,
    /// Stop after this many consecutive trials without improvement.
    pub patience: Option<usize>,
    /// Smallest objective gain that counts as an improvement.
    pub min_improvement: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            batch_size: 16,
            max_trials: None,
            timeout_secs: None,
            trial_timeout_secs: None,
            patience: None,
            min_improvement: 0.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("invalid parameter space: {0}")]
    InvalidSpace(#[from] ParamError),
    #[error("batch_size must be >= 1")]
    ZeroBatch,
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

// ─── Results ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Succeeded,
    Failed,
    TimedOut,
}

/// One evaluated parameter set.
#[derive(Debug, Clone, Serialize)]
pub struct TrialRecord {
    /// Position in dispatch order.
    pub index: usize,
    pub params: ParamSet,
    pub status: TrialStatus,
    /// Normalized objective (higher is better), set when succeeded.
    pub objective: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub elapsed_ms: f64,
}

impl TrialRecord {
    pub fn succeeded(&self) -> bool {
        self.status == TrialStatus::Succeeded
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The strategy has nothing left to propose.
    Exhausted,
    /// `max_trials` reached.
    Budget,
    Timeout,
    EarlyStopped,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialCounts {
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl TrialCounts {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.timed_out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedTrial {
    pub rank: usize,
    pub index: usize,
    pub params: ParamSet,
    /// Normalized objective.
    pub score: f64,
    /// Objective metric as reported by the metrics extractor.
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub index: usize,
    pub params: ParamSet,
    pub status: TrialStatus,
    pub reason: String,
}

/// Everything a finished (or stopped) search returns.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationResult {
    pub strategy: String,
    pub space: ParamSpace,
    pub objective: Objective,
    pub status: RunStatus,
    pub stop_reason: StopReason,
    pub best_params: Option<ParamSet>,
    /// Normalized objective of `best_params`.
    pub best_score: Option<f64>,
    pub best_metrics: Option<MetricSet>,
    pub ranked: Vec<RankedTrial>,
    pub trials: Vec<TrialRecord>,
    pub counts: TrialCounts,
    pub failures: Vec<FailureRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
    pub elapsed_secs: f64,
}

// ─── Coordinator ─────────────────────────────────────────────────────

type Outcome = (Result<Evaluation, EvalError>, Duration);

/// Run `strategy` to completion (or until a stop condition) over `ctx`.
///
/// The parameter space is validated against the template before the first
/// evaluation; a bad space is an error, not a failed run.
pub fn optimize(
    ctx: &EvalContext,
    strategy: &mut dyn SearchStrategy,
    config: &CoordinatorConfig,
    cancel: Option<&AtomicBool>,
) -> Result<OptimizationResult, CoordinatorError> {
    strategy.space().validate()?;
    ctx.template.check_space(strategy.space())?;
    if config.batch_size == 0 {
        return Err(CoordinatorError::ZeroBatch);
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build()?;

    let start = Instant::now();
    let deadline = config
        .timeout_secs
        .map(|s| start + Duration::from_secs_f64(s.max(0.0)));
    let trial_limit = config.trial_timeout_secs.map(|s| Duration::from_secs_f64(s.max(0.0)));

    tracing::info!(
        strategy = strategy.name(),
        params = strategy.space().len(),
        objective = %ctx.objective.metric,
        threads = pool.current_num_threads(),
        batch = config.batch_size,
        "search started"
    );

    let mut trials: Vec<TrialRecord> = Vec::new();
    let mut seen: HashSet<ParamKey> = HashSet::new();
    let mut best: Option<f64> = None;
    let mut since_improvement = 0usize;
    let mut stale_rounds = 0usize;

    let stop_reason = loop {
        if cancel.is_some_and(|f| f.load(Ordering::Relaxed)) {
            break StopReason::Cancelled;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break StopReason::Timeout;
        }
        if strategy.is_done(&trials) {
            break StopReason::Exhausted;
        }
        let remaining = config
            .max_trials
            .map_or(usize::MAX, |m| m.saturating_sub(trials.len()));
        if remaining == 0 {
            break StopReason::Budget;
        }
        if config
            .patience
            .is_some_and(|p| best.is_some() && since_improvement >= p)
        {
            break StopReason::EarlyStopped;
        }

        let proposed = strategy.propose_batch(&trials, config.batch_size.min(remaining));
        if proposed.is_empty() {
            break StopReason::Exhausted;
        }
        let batch: Vec<(ParamKey, ParamSet)> = proposed
            .into_iter()
            .filter_map(|p| {
                let key = p.key();
                seen.insert(key).then_some((key, p))
            })
            .collect();
        if batch.is_empty() {
            stale_rounds += 1;
            if stale_rounds >= MAX_STALE_ROUNDS {
                break StopReason::Exhausted;
            }
            continue;
        }
        stale_rounds = 0;

        let outcomes = dispatch(&pool, ctx, &batch);
        for ((_, params), (outcome, elapsed)) in batch.into_iter().zip(outcomes) {
            let record = record_trial(trials.len(), params, outcome, elapsed, trial_limit);
            match record.objective {
                Some(score) if best.map_or(true, |b| score > b + config.min_improvement) => {
                    best = Some(score);
                    since_improvement = 0;
                }
                _ => since_improvement += 1,
            }
            trials.push(record);
        }
    };

    let result = summarize(ctx, strategy, trials, stop_reason, start.elapsed());
    tracing::info!(
        strategy = %result.strategy,
        status = ?result.status,
        stop = ?result.stop_reason,
        succeeded = result.counts.succeeded,
        failed = result.counts.failed,
        timed_out = result.counts.timed_out,
        best = ?result.best_score,
        elapsed_secs = result.elapsed_secs,
        "search finished"
    );
    Ok(result)
}

/// Evaluate one batch in parallel; outcomes come back in batch order.
fn dispatch(
    pool: &rayon::ThreadPool,
    ctx: &EvalContext,
    batch: &[(ParamKey, ParamSet)],
) -> Vec<Outcome> {
    let (tx, rx) = crossbeam_channel::unbounded::<(ParamKey, Outcome)>();
    pool.scope(|s| {
        for (key, params) in batch {
            let tx = tx.clone();
            s.spawn(move |_| {
                let started = Instant::now();
                let outcome = catch_unwind(AssertUnwindSafe(|| ctx.evaluate(params)))
                    .unwrap_or_else(|payload| Err(EvalError::Panicked(panic_message(&*payload))));
                // The receiver outlives the scope, so this cannot fail.
                let _ = tx.send((*key, (outcome, started.elapsed())));
            });
        }
    });
    drop(tx);

    let mut by_key: HashMap<ParamKey, Outcome> = rx.into_iter().collect();
    batch
        .iter()
        .map(|(key, _)| {
            by_key.remove(key).unwrap_or_else(|| {
                (
                    Err(EvalError::Panicked("worker produced no result".into())),
                    Duration::ZERO,
                )
            })
        })
        .collect()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn record_trial(
    index: usize,
    params: ParamSet,
    outcome: Result<Evaluation, EvalError>,
    elapsed: Duration,
    limit: Option<Duration>,
) -> TrialRecord {
    let elapsed_ms = elapsed.as_secs_f64() * 1_000.0;
    let outcome = match limit {
        Some(limit) if elapsed > limit => Err(EvalError::TimedOut {
            limit_secs: limit.as_secs_f64(),
        }),
        _ => outcome,
    };
    match outcome {
        Ok(eval) => {
            tracing::debug!(trial = index, params = %params, score = eval.objective, "trial succeeded");
            TrialRecord {
                index,
                params,
                status: TrialStatus::Succeeded,
                objective: Some(eval.objective),
                metrics: Some(eval.metrics),
                reason: None,
                elapsed_ms,
            }
        }
        Err(err) => {
            let status = match err {
                EvalError::TimedOut { .. } => TrialStatus::TimedOut,
                _ => TrialStatus::Failed,
            };
            tracing::warn!(trial = index, params = %params, error = %err, "trial failed");
            TrialRecord {
                index,
                params,
                status,
                objective: None,
                metrics: None,
                reason: Some(err.to_string()),
                elapsed_ms,
            }
        }
    }
}

fn summarize(
    ctx: &EvalContext,
    strategy: &dyn SearchStrategy,
    trials: Vec<TrialRecord>,
    stop_reason: StopReason,
    elapsed: Duration,
) -> OptimizationResult {
    let mut counts = TrialCounts::default();
    let mut failures = Vec::new();
    for t in &trials {
        match t.status {
            TrialStatus::Succeeded => counts.succeeded += 1,
            TrialStatus::Failed => counts.failed += 1,
            TrialStatus::TimedOut => counts.timed_out += 1,
        }
        if !t.succeeded() {
            failures.push(FailureRecord {
                index: t.index,
                params: t.params.clone(),
                status: t.status,
                reason: t.reason.clone().unwrap_or_default(),
            });
        }
    }

    let mut ranked: Vec<RankedTrial> = trials
        .iter()
        .filter_map(|t| {
            t.objective.map(|score| RankedTrial {
                rank: 0,
                index: t.index,
                params: t.params.clone(),
                score,
                value: ctx.objective.raw(score),
            })
        })
        .collect();
    // Descending score; ties keep dispatch order.
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.index.cmp(&b.index)));
    for (i, r) in ranked.iter_mut().enumerate() {
        r.rank = i + 1;
    }

    let best = ranked.first();
    let best_metrics = best.and_then(|b| trials[b.index].metrics.clone());

    let status = if counts.succeeded == 0 {
        RunStatus::Failed
    } else if matches!(stop_reason, StopReason::Timeout | StopReason::Cancelled)
        || counts.failed + counts.timed_out > 0
    {
        RunStatus::Partial
    } else {
        RunStatus::Completed
    };

    OptimizationResult {
        strategy: strategy.name().to_string(),
        space: strategy.space().clone(),
        objective: ctx.objective.clone(),
        status,
        stop_reason,
        best_params: best.map(|b| b.params.clone()),
        best_score: best.map(|b| b.score),
        best_metrics,
        ranked,
        trials,
        counts,
        failures,
        cache: ctx.cache.as_ref().map(|c| c.stats()),
        elapsed_secs: elapsed.as_secs_f64(),
    }
}
